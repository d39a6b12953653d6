//! 统一 SDK 接口 - WorkchatSDK 主入口
//!
//! 分层架构设计：
//! ```text
//! WorkchatSDK (门面层)
//!   ├── CacheStore (分页缓存 + 订阅通知)
//!   ├── EventReducer (实时事件归并)
//!   ├── OutboxManager (乐观发送协调)
//!   └── ChatTransport (传输边界，外部注入)
//! ```
//!
//! 设计原则：
//! - 显式生命周期：会话开始时创建，登出时 clear，绝不做环境单例
//! - UI 只读投影：一切变更都走归并器/协调器入口
//! - 实时侧异常就地吸收，只有用户直接动作（发送）的错误才上抛

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, WorkchatSDKError};
use crate::events::RealtimeEvent;
use crate::outbox::{OptimisticEnvelope, OutboxManager, RetryPolicy, SendHandle};
use crate::reducer::EventReducer;
use crate::session::SessionState;
use crate::store::entities::{
    Attachment, ContentKind, Conversation, ConversationKind, Message,
};
use crate::store::scope::ScopeKey;
use crate::store::subscription::{StoreChange, SubscriptionId};
use crate::store::CacheStore;
use crate::transport::ChatTransport;

/// Workchat SDK 配置
#[derive(Debug, Clone)]
pub struct WorkchatConfig {
    /// 分页拉取的页大小
    pub page_size: u32,
    /// 发送重试策略
    pub retry_policy: RetryPolicy,
    /// 自发回声匹配窗口（毫秒）
    pub echo_window_ms: i64,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for WorkchatConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            retry_policy: RetryPolicy::default(),
            echo_window_ms: 5_000,
            debug_mode: false,
        }
    }
}

impl WorkchatConfig {
    pub fn builder() -> WorkchatConfigBuilder {
        WorkchatConfigBuilder::default()
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(WorkchatSDKError::Config(
                "page_size must be greater than 0".to_string(),
            ));
        }
        if self.echo_window_ms < 0 {
            return Err(WorkchatSDKError::Config(
                "echo_window_ms must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct WorkchatConfigBuilder {
    page_size: Option<u32>,
    retry_policy: Option<RetryPolicy>,
    echo_window_ms: Option<i64>,
    debug_mode: bool,
}

impl WorkchatConfigBuilder {
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn echo_window_ms(mut self, window_ms: i64) -> Self {
        self.echo_window_ms = Some(window_ms);
        self
    }

    pub fn debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn build(self) -> WorkchatConfig {
        let defaults = WorkchatConfig::default();
        WorkchatConfig {
            page_size: self.page_size.unwrap_or(defaults.page_size),
            retry_policy: self.retry_policy.unwrap_or(defaults.retry_policy),
            echo_window_ms: self.echo_window_ms.unwrap_or(defaults.echo_window_ms),
            debug_mode: self.debug_mode,
        }
    }
}

/// Workchat SDK 门面
pub struct WorkchatSDK {
    config: WorkchatConfig,
    store: Arc<CacheStore>,
    session: Arc<SessionState>,
    outbox: Arc<OutboxManager>,
    reducer: EventReducer,
    transport: Arc<dyn ChatTransport>,
}

impl WorkchatSDK {
    /// 初始化 SDK
    ///
    /// 显式注入传输实现与本地用户身份；不持有任何全局状态。
    pub fn initialize(
        local_user_id: impl Into<String>,
        config: WorkchatConfig,
        transport: Arc<dyn ChatTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(CacheStore::new());
        let session = Arc::new(SessionState::new(local_user_id));
        let outbox = Arc::new(OutboxManager::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            Arc::clone(&session),
            config.retry_policy.clone(),
            config.echo_window_ms,
        ));
        let reducer = EventReducer::new(
            Arc::clone(&store),
            Arc::clone(&session),
            Arc::clone(&outbox),
        );

        info!(
            "WorkchatSDK 初始化完成: user_id={}, page_size={}",
            session.local_user_id(),
            config.page_size
        );

        Ok(Self {
            config,
            store,
            session,
            outbox,
            reducer,
            transport,
        })
    }

    pub fn config(&self) -> &WorkchatConfig {
        &self.config
    }

    pub fn local_user_id(&self) -> &str {
        self.session.local_user_id()
    }

    // ============================================================
    // REST 拉取
    // ============================================================

    /// 拉取下一页（更旧方向）会话列表，返回本次新增条数
    pub async fn load_conversations(&self, kind: ConversationKind) -> Result<usize> {
        let (cursor, has_more) = self.store.conversation_cursor(kind);
        if !has_more {
            debug!("会话列表已拉取完毕: kind={}", kind.as_str());
            return Ok(0);
        }

        let page = self
            .transport
            .fetch_conversations(kind, cursor, self.config.page_size)
            .await?;
        let count = page.len();
        self.store.append_conversation_page(kind, page);
        Ok(count)
    }

    /// 从头全量刷新会话列表（丢弃旧页）
    pub async fn reload_conversations(&self, kind: ConversationKind) -> Result<usize> {
        let page = self
            .transport
            .fetch_conversations(kind, None, self.config.page_size)
            .await?;
        let count = page.len();
        self.store.replace_conversation_pages(kind, vec![page]);
        Ok(count)
    }

    /// 拉取某会话下一页（更旧方向）消息，返回本次新增条数
    pub async fn load_older_messages(&self, conversation_id: &str) -> Result<usize> {
        let (cursor, has_more) = self.store.message_cursor(conversation_id);
        if !has_more {
            debug!("消息历史已拉取完毕: conversation_id={}", conversation_id);
            return Ok(0);
        }

        let page = self
            .transport
            .fetch_messages(conversation_id, cursor, self.config.page_size)
            .await?;
        let count = page.len();
        self.store.append_message_page(conversation_id, page);
        Ok(count)
    }

    /// 从头全量刷新某会话的消息时间线
    pub async fn reload_messages(&self, conversation_id: &str) -> Result<usize> {
        let page = self
            .transport
            .fetch_messages(conversation_id, None, self.config.page_size)
            .await?;
        let count = page.len();
        self.store.replace_message_pages(conversation_id, vec![page]);
        Ok(count)
    }

    // ============================================================
    // 实时事件入口
    // ============================================================

    /// 处理一个实时通道事件
    ///
    /// 在实时连接的事件回调里调用。畸形负载记日志后丢弃，
    /// 不向消费者传播（保持长连接对单条坏消息的韧性）。
    pub fn handle_realtime_event(&self, event_name: &str, payload: Value) {
        let event = match RealtimeEvent::parse(event_name, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    "丢弃畸形实时事件: event={}, error={}",
                    event_name,
                    WorkchatSDKError::from(e)
                );
                return;
            }
        };

        if let Err(e) = self.reducer.apply(event) {
            if e.is_benign() {
                debug!("忽略良性事件异常: event={}, error={}", event_name, e);
            } else {
                warn!("实时事件归并失败: event={}, error={}", event_name, e);
            }
        }
    }

    // ============================================================
    // 发送
    // ============================================================

    /// 发送消息（乐观插入立即可见）
    pub fn send_message(
        &self,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        content_kind: ContentKind,
        attachments: Vec<Attachment>,
    ) -> SendHandle {
        self.outbox
            .send(conversation_id, content, content_kind, attachments)
    }

    /// 重试一条失败的发送（复用同一临时ID，上限 3 轮）
    pub fn retry_send(&self, local_message_id: &str) -> Result<SendHandle> {
        self.outbox.retry(local_message_id)
    }

    /// 查询发送簿记（失败原因、重试轮数）
    pub fn send_status(&self, local_message_id: &str) -> Option<OptimisticEnvelope> {
        self.outbox.envelope(local_message_id)
    }

    // ============================================================
    // 只读投影（UI 消费）
    // ============================================================

    /// 会话列表（最近活动倒序，无消息的排最后）
    pub fn conversations(&self, kind: ConversationKind) -> Arc<Vec<Conversation>> {
        self.store.flatten_conversations(kind)
    }

    /// 某会话的消息时间线（时间升序）
    pub fn messages(&self, conversation_id: &str) -> Arc<Vec<Message>> {
        self.store.flatten_messages(conversation_id)
    }

    /// 某会话的未读数
    pub fn unread_count(&self, conversation_id: &str) -> u32 {
        self.store
            .find_conversation(conversation_id)
            .map(|c| c.unread_count)
            .unwrap_or(0)
    }

    /// 全部会话的未读总数
    pub fn total_unread_count(&self) -> u64 {
        self.store.total_unread_count()
    }

    /// 某会话的置顶消息
    pub fn pinned_messages(&self, conversation_id: &str) -> Vec<Message> {
        self.store
            .flatten_messages(conversation_id)
            .iter()
            .filter(|m| m.is_pinned)
            .cloned()
            .collect()
    }

    /// 某会话的星标消息
    pub fn starred_messages(&self, conversation_id: &str) -> Vec<Message> {
        self.store
            .flatten_messages(conversation_id)
            .iter()
            .filter(|m| m.is_starred)
            .cloned()
            .collect()
    }

    /// 读取并清除"建议刷新会话列表"提示
    pub fn take_refresh_recommended(&self) -> bool {
        self.store.take_refresh_recommended()
    }

    // ============================================================
    // 订阅
    // ============================================================

    /// 订阅某作用域的存储变更（组件挂载时调用）
    pub fn subscribe<F>(&self, scope: ScopeKey, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        self.store.hub().subscribe(scope, callback)
    }

    /// 注销订阅（组件卸载时调用）
    pub fn unsubscribe(&self, subscription: &SubscriptionId) -> bool {
        self.store.hub().unsubscribe(subscription)
    }

    // ============================================================
    // 会话态与生命周期
    // ============================================================

    /// 切换当前激活会话（用于未读抑制）
    pub fn set_active_conversation(&self, conversation_id: Option<String>) {
        self.session.set_active_conversation(conversation_id);
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.session.active_conversation()
    }

    /// 清空全部缓存与簿记（登出 / 切换用户）
    pub fn clear(&self) {
        self.store.clear();
        self.outbox.clear();
        self.store.hub().clear();
        info!("WorkchatSDK 状态已清空");
    }
}
