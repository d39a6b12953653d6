//! 缓存存储层 - 会话/消息的分页缓存与变更通知
//!
//! 存储是唯一的共享可变资源：
//! - REST 拉取的分页结果按作用域追加
//! - 实时事件和乐观写入通过归并器/协调器入口变更
//! - 任何变更只通知受影响作用域的订阅者
//!
//! 所有变更都发生在持锁的同步片段内（单个同步瞬间原子），
//! 任何挂起点（await）都不持有存储锁。

pub mod entities;
pub mod pages;
pub mod scope;
pub mod subscription;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

pub use entities::{
    new_local_message_id, Attachment, ContentKind, Conversation, ConversationKind, DeliveryState,
    LastMessagePreview, Message, Page, LOCAL_MESSAGE_ID_PREFIX, SNIPPET_MAX_CHARS,
};
pub use pages::{CacheEntity, PagedCollection, ReplaceOutcome};
pub use scope::ScopeKey;
pub use subscription::{HubStats, StoreChange, SubscriberCallback, SubscriptionHub, SubscriptionId};

impl CacheEntity for Message {
    fn identity(&self) -> &str {
        &self.message_id
    }
}

impl CacheEntity for Conversation {
    fn identity(&self) -> &str {
        &self.conversation_id
    }
}

/// 缓存存储
///
/// 显式对象 + 显式生命周期：会话开始时创建，登出/切换用户时清空。
/// 消费方（UI）只读 flatten 投影，所有变更走归并器/协调器入口。
pub struct CacheStore {
    /// 会话列表缓存：按会话类型分作用域
    conversations: RwLock<HashMap<ConversationKind, PagedCollection<Conversation>>>,
    /// 消息时间线缓存：按会话ID分作用域
    messages: RwLock<HashMap<String, PagedCollection<Message>>>,
    /// 订阅/通知层
    hub: Arc<SubscriptionHub>,
    /// 会话元数据可能过期的低优先级提示（ConversationUpdated 设置）
    refresh_recommended: AtomicBool,
    /// 空投影的稳定引用
    empty_conversations: Arc<Vec<Conversation>>,
    empty_messages: Arc<Vec<Message>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::with_hub(Arc::new(SubscriptionHub::new()))
    }

    pub fn with_hub(hub: Arc<SubscriptionHub>) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            hub,
            refresh_recommended: AtomicBool::new(false),
            empty_conversations: Arc::new(Vec::new()),
            empty_messages: Arc::new(Vec::new()),
        }
    }

    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    // ============================================================
    // 分页操作
    // ============================================================

    /// 读取某类会话列表的页序列
    pub fn conversation_pages(&self, kind: ConversationKind) -> Vec<Page<Conversation>> {
        self.conversations
            .read()
            .get(&kind)
            .map(|c| c.pages().to_vec())
            .unwrap_or_default()
    }

    /// 读取某个会话消息时间线的页序列
    pub fn message_pages(&self, conversation_id: &str) -> Vec<Page<Message>> {
        self.messages
            .read()
            .get(conversation_id)
            .map(|c| c.pages().to_vec())
            .unwrap_or_default()
    }

    /// 追加一页更旧的会话列表数据
    pub fn append_conversation_page(&self, kind: ConversationKind, page: Page<Conversation>) {
        let version = {
            let mut scopes = self.conversations.write();
            let collection = scopes.entry(kind).or_insert_with(PagedCollection::new);
            collection.append_older(page);
            collection.version()
        };
        self.notify(ScopeKey::conversations(kind), version);
    }

    /// 全量替换某类会话列表
    pub fn replace_conversation_pages(
        &self,
        kind: ConversationKind,
        pages: Vec<Page<Conversation>>,
    ) {
        let version = {
            let mut scopes = self.conversations.write();
            let collection = scopes.entry(kind).or_insert_with(PagedCollection::new);
            collection.replace_all(pages);
            collection.version()
        };
        self.notify(ScopeKey::conversations(kind), version);
    }

    /// 追加一页更旧的消息数据
    pub fn append_message_page(&self, conversation_id: &str, page: Page<Message>) {
        let version = {
            let mut scopes = self.messages.write();
            let collection = scopes
                .entry(conversation_id.to_string())
                .or_insert_with(PagedCollection::new);
            collection.append_older(page);
            collection.version()
        };
        self.notify(ScopeKey::messages(conversation_id), version);
    }

    /// 全量替换某个会话的消息时间线
    pub fn replace_message_pages(&self, conversation_id: &str, pages: Vec<Page<Message>>) {
        let version = {
            let mut scopes = self.messages.write();
            let collection = scopes
                .entry(conversation_id.to_string())
                .or_insert_with(PagedCollection::new);
            collection.replace_all(pages);
            collection.version()
        };
        self.notify(ScopeKey::messages(conversation_id), version);
    }

    /// 某类会话列表下一页（更旧方向）的游标与是否还有数据
    pub fn conversation_cursor(&self, kind: ConversationKind) -> (Option<String>, bool) {
        let scopes = self.conversations.read();
        match scopes.get(&kind) {
            Some(c) => (c.next_cursor(), c.has_more()),
            None => (None, true),
        }
    }

    /// 某个会话消息时间线下一页（更旧方向）的游标与是否还有数据
    pub fn message_cursor(&self, conversation_id: &str) -> (Option<String>, bool) {
        let scopes = self.messages.read();
        match scopes.get(conversation_id) {
            Some(c) => (c.next_cursor(), c.has_more()),
            None => (None, true),
        }
    }

    // ============================================================
    // 展平投影
    // ============================================================

    /// 会话列表规范显示顺序：最近活动倒序，没有消息的排最后
    pub fn flatten_conversations(&self, kind: ConversationKind) -> Arc<Vec<Conversation>> {
        let scopes = self.conversations.read();
        match scopes.get(&kind) {
            Some(collection) => collection.flatten_with(conversation_display_order),
            None => Arc::clone(&self.empty_conversations),
        }
    }

    /// 消息时间线规范显示顺序：发送时间升序（拉取顺序反转）
    pub fn flatten_messages(&self, conversation_id: &str) -> Arc<Vec<Message>> {
        let scopes = self.messages.read();
        match scopes.get(conversation_id) {
            Some(collection) => collection.flatten_with(message_display_order),
            None => Arc::clone(&self.empty_messages),
        }
    }

    // ============================================================
    // 归并器 / 协调器变更入口
    // ============================================================

    /// 消息是否已缓存（任意页）
    pub fn contains_message(&self, conversation_id: &str, message_id: &str) -> bool {
        self.messages
            .read()
            .get(conversation_id)
            .map(|c| c.contains(message_id))
            .unwrap_or(false)
    }

    /// 把新消息插入会话时间线最新页头部
    pub fn insert_newest_message(&self, message: Message) {
        let conversation_id = message.conversation_id.clone();
        let version = {
            let mut scopes = self.messages.write();
            let collection = scopes
                .entry(conversation_id.clone())
                .or_insert_with(PagedCollection::new);
            collection.push_newest(message);
            collection.version()
        };
        self.notify(ScopeKey::messages(&conversation_id), version);
    }

    /// 按ID更新消息，返回是否命中
    pub fn update_message<F>(&self, conversation_id: &str, message_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let version = {
            let mut scopes = self.messages.write();
            match scopes.get_mut(conversation_id) {
                Some(collection) => {
                    if !collection.update_item(message_id, f) {
                        return false;
                    }
                    collection.version()
                }
                None => return false,
            }
        };
        self.notify(ScopeKey::messages(conversation_id), version);
        true
    }

    /// 用服务端确认实体原子替换本地乐观消息
    pub fn reconcile_message(
        &self,
        conversation_id: &str,
        local_message_id: &str,
        confirmed: Message,
    ) -> ReplaceOutcome {
        let (outcome, version) = {
            let mut scopes = self.messages.write();
            match scopes.get_mut(conversation_id) {
                Some(collection) => {
                    let outcome = collection.replace_item(local_message_id, confirmed);
                    (outcome, collection.version())
                }
                None => (ReplaceOutcome::NotFound, 0),
            }
        };
        if outcome != ReplaceOutcome::NotFound {
            self.notify(ScopeKey::messages(conversation_id), version);
        }
        outcome
    }

    /// 在所有会话类型作用域里查找会话（克隆返回）
    pub fn find_conversation(&self, conversation_id: &str) -> Option<Conversation> {
        let scopes = self.conversations.read();
        for collection in scopes.values() {
            for page in collection.pages() {
                if let Some(found) = page
                    .items
                    .iter()
                    .find(|c| c.conversation_id == conversation_id)
                {
                    return Some(found.clone());
                }
            }
        }
        None
    }

    /// 按ID更新会话（跨会话类型作用域查找），返回是否命中
    pub fn update_conversation<F>(&self, conversation_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Conversation),
    {
        let notified = {
            let mut scopes = self.conversations.write();
            // 先定位会话所在的类型作用域，再做一次更新
            let hit_kind = scopes
                .iter()
                .find(|(_, collection)| collection.contains(conversation_id))
                .map(|(kind, _)| *kind);
            hit_kind.and_then(|kind| {
                scopes.get_mut(&kind).map(|collection| {
                    collection.update_item(conversation_id, f);
                    (kind, collection.version())
                })
            })
        };
        match notified {
            Some((kind, version)) => {
                self.notify(ScopeKey::conversations(kind), version);
                true
            }
            None => false,
        }
    }

    /// 全部会话的未读总数
    pub fn total_unread_count(&self) -> u64 {
        let scopes = self.conversations.read();
        let mut seen = std::collections::HashSet::new();
        let mut total: u64 = 0;
        for collection in scopes.values() {
            for page in collection.pages() {
                for conversation in &page.items {
                    if seen.insert(conversation.conversation_id.clone()) {
                        total += conversation.unread_count as u64;
                    }
                }
            }
        }
        total
    }

    // ============================================================
    // 元数据过期提示（低优先级信号，不触发任何缓存失效）
    // ============================================================

    /// 标记会话元数据可能过期
    pub fn mark_refresh_recommended(&self) {
        self.refresh_recommended.store(true, AtomicOrdering::SeqCst);
    }

    /// 读取并清除过期提示
    pub fn take_refresh_recommended(&self) -> bool {
        self.refresh_recommended.swap(false, AtomicOrdering::SeqCst)
    }

    /// 清空全部缓存（登出 / 切换用户）
    pub fn clear(&self) {
        self.conversations.write().clear();
        self.messages.write().clear();
        self.refresh_recommended.store(false, AtomicOrdering::SeqCst);
        debug!("缓存已清空");
    }

    fn notify(&self, scope: ScopeKey, version: u64) {
        self.hub.notify(&StoreChange { scope, version });
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 会话列表显示顺序：最近活动倒序，无消息的排最后
fn conversation_display_order(mut items: Vec<Conversation>) -> Vec<Conversation> {
    items.sort_by(|a, b| match (a.last_activity_at(), b.last_activity_at()) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.updated_at.cmp(&a.updated_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.updated_at.cmp(&a.updated_at),
    });
    items
}

/// 消息显示顺序：发送时间升序（把最新在前的拉取顺序反转）
fn message_display_order(mut items: Vec<Message>) -> Vec<Message> {
    items.reverse();
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn message(id: &str, conversation_id: &str, sent_at: i64) -> Message {
        Message {
            message_id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "user-1".to_string(),
            content: format!("content-{}", id),
            content_kind: ContentKind::Text,
            sent_at,
            edited_at: None,
            is_pinned: false,
            is_starred: false,
            attachments: Vec::new(),
            delivery_state: DeliveryState::Sent,
        }
    }

    fn conversation(id: &str, kind: ConversationKind, last_sent_at: Option<i64>) -> Conversation {
        let last_message = last_sent_at.map(|sent_at| {
            LastMessagePreview::from_message(&message(&format!("last-{}", id), id, sent_at))
        });
        Conversation {
            conversation_id: id.to_string(),
            name: format!("name-{}", id),
            kind,
            member_count: 3,
            last_message,
            unread_count: 0,
            updated_at: 100,
        }
    }

    #[test]
    fn test_flatten_messages_oldest_first() {
        let store = CacheStore::new();
        // 拉取顺序：最新页在前，页内最新在前
        store.append_message_page(
            "conv-1",
            Page::new(
                vec![message("m3", "conv-1", 30), message("m2", "conv-1", 20)],
                true,
                Some("cursor-1".to_string()),
            ),
        );
        store.append_message_page(
            "conv-1",
            Page::new(vec![message("m1", "conv-1", 10)], false, None),
        );

        let flat = store.flatten_messages("conv-1");
        let ids: Vec<&str> = flat.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_flatten_unknown_scope_is_empty_and_stable() {
        let store = CacheStore::new();
        let first = store.flatten_messages("conv-missing");
        let second = store.flatten_messages("conv-missing");
        assert!(first.is_empty());
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_flatten_conversations_recency_order() {
        let store = CacheStore::new();
        store.append_conversation_page(
            ConversationKind::Group,
            Page::new(
                vec![
                    conversation("conv-a", ConversationKind::Group, Some(10)),
                    conversation("conv-b", ConversationKind::Group, Some(30)),
                    conversation("conv-empty", ConversationKind::Group, None),
                    conversation("conv-c", ConversationKind::Group, Some(20)),
                ],
                false,
                None,
            ),
        );

        let flat = store.flatten_conversations(ConversationKind::Group);
        let ids: Vec<&str> = flat.iter().map(|c| c.conversation_id.as_str()).collect();
        // 活动倒序，无消息的排最后
        assert_eq!(ids, vec!["conv-b", "conv-c", "conv-a", "conv-empty"]);
    }

    #[test]
    fn test_insert_newest_notifies_only_affected_scope() {
        let store = CacheStore::new();
        let affected = Arc::new(AtomicUsize::new(0));
        let unaffected = Arc::new(AtomicUsize::new(0));

        let counter = affected.clone();
        store.hub().subscribe(ScopeKey::messages("conv-1"), move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });
        let counter = unaffected.clone();
        store.hub().subscribe(ScopeKey::messages("conv-2"), move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });

        store.insert_newest_message(message("m1", "conv-1", 10));

        assert_eq!(affected.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(unaffected.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_reconcile_message_swaps_identity_atomically() {
        let store = CacheStore::new();
        let mut local = message("local-abc", "conv-1", 10);
        local.delivery_state = DeliveryState::Sending;
        store.insert_newest_message(local);

        let mut confirmed = message("srv-123", "conv-1", 10);
        confirmed.delivery_state = DeliveryState::Sent;
        let outcome = store.reconcile_message("conv-1", "local-abc", confirmed);

        assert_eq!(outcome, ReplaceOutcome::Swapped);
        let flat = store.flatten_messages("conv-1");
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].message_id, "srv-123");
        assert_eq!(flat[0].delivery_state, DeliveryState::Sent);
    }

    #[test]
    fn test_update_conversation_across_kinds() {
        let store = CacheStore::new();
        store.append_conversation_page(
            ConversationKind::Direct,
            Page::new(
                vec![conversation("conv-d", ConversationKind::Direct, None)],
                false,
                None,
            ),
        );

        assert!(store.update_conversation("conv-d", |c| c.unread_count = 7));
        assert!(!store.update_conversation("conv-missing", |c| c.unread_count = 1));

        let found = store.find_conversation("conv-d").unwrap();
        assert_eq!(found.unread_count, 7);
        assert_eq!(store.total_unread_count(), 7);
    }

    #[test]
    fn test_clear_wipes_pages_and_hint() {
        let store = CacheStore::new();
        store.insert_newest_message(message("m1", "conv-1", 10));
        store.mark_refresh_recommended();

        store.clear();

        assert!(store.flatten_messages("conv-1").is_empty());
        assert!(!store.take_refresh_recommended());
    }
}
