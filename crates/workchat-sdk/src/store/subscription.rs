//! 订阅/通知层 - 按作用域分发存储变更
//!
//! 任何存储变更（追加页、归并事件、乐观插入/对账）只通知
//! 受影响作用域的订阅者，把重算成本限定在 O(受影响作用域)，
//! 而不是每次事件 O(全部消费者)。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::store::scope::ScopeKey;

/// 一次存储变更通知
#[derive(Debug, Clone)]
pub struct StoreChange {
    /// 受影响的作用域
    pub scope: ScopeKey,
    /// 该作用域变更后的版本号
    pub version: u64,
}

/// 订阅回调类型
pub type SubscriberCallback = Box<dyn Fn(&StoreChange) + Send + Sync>;

/// 订阅凭据 - 注销时使用
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// 通知统计信息
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    /// 总通知数
    pub total_notifications: u64,
    /// 按作用域分组的通知数
    pub notifications_by_scope: HashMap<String, u64>,
    /// 当前订阅者数量
    pub subscriber_count: usize,
}

/// 订阅管理器
///
/// 订阅者归存储所有：组件挂载时注册、卸载时注销。
/// 回调内禁止再调用会拿写锁的存储入口（通知在变更的同步片段后发出）。
pub struct SubscriptionHub {
    /// 作用域 → 订阅者列表
    listeners: RwLock<HashMap<ScopeKey, Vec<(u64, SubscriberCallback)>>>,
    /// 订阅ID → 作用域反查表
    id_index: RwLock<HashMap<u64, ScopeKey>>,
    next_id: AtomicU64,
    stats: RwLock<HubStats>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            id_index: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats: RwLock::new(HubStats::default()),
        }
    }

    /// 订阅一个作用域的变更通知
    pub fn subscribe<F>(&self, scope: ScopeKey, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .write()
            .entry(scope.clone())
            .or_insert_with(Vec::new)
            .push((id, Box::new(callback)));
        self.id_index.write().insert(id, scope.clone());
        self.refresh_subscriber_count();

        debug!("注册订阅: scope={}, id={}", scope, id);
        SubscriptionId(id)
    }

    /// 注销订阅，返回是否命中
    pub fn unsubscribe(&self, subscription: &SubscriptionId) -> bool {
        let scope = match self.id_index.write().remove(&subscription.0) {
            Some(scope) => scope,
            None => return false,
        };

        let mut listeners = self.listeners.write();
        if let Some(entries) = listeners.get_mut(&scope) {
            entries.retain(|(id, _)| *id != subscription.0);
            if entries.is_empty() {
                listeners.remove(&scope);
            }
        }
        drop(listeners);
        self.refresh_subscriber_count();

        debug!("注销订阅: scope={}, id={}", scope, subscription.0);
        true
    }

    /// 向受影响作用域的订阅者分发变更
    pub fn notify(&self, change: &StoreChange) {
        {
            let mut stats = self.stats.write();
            stats.total_notifications += 1;
            *stats
                .notifications_by_scope
                .entry(change.scope.to_string())
                .or_insert(0) += 1;
        }

        let listeners = self.listeners.read();
        if let Some(entries) = listeners.get(&change.scope) {
            debug!(
                "分发存储变更: scope={}, version={}, subscribers={}",
                change.scope,
                change.version,
                entries.len()
            );
            for (_, callback) in entries {
                callback(change);
            }
        }
    }

    /// 当前订阅者总数
    pub fn subscriber_count(&self) -> usize {
        self.id_index.read().len()
    }

    /// 获取通知统计
    pub fn stats(&self) -> HubStats {
        self.stats.read().clone()
    }

    /// 清空所有订阅（登出 / 切换用户）
    pub fn clear(&self) {
        self.listeners.write().clear();
        self.id_index.write().clear();
        self.refresh_subscriber_count();
    }

    fn refresh_subscriber_count(&self) {
        let count = self.id_index.read().len();
        self.stats.write().subscriber_count = count;
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}
