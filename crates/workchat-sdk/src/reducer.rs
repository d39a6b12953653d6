//! 实时事件归并器
//!
//! 把归一化后的推送事件按幂等与有序规则归并进缓存：
//! - 同一消息无论从哪条路径到达都只出现一次
//! - 同一会话的事件假定按服务端发出顺序到达（单有序通道），
//!   归并器不做乱序缓冲；通道失序时最新页内可能短暂乱序，
//!   直到下一次全量拉取
//! - 实时侧的一切异常都被吸收，不向消费者传播

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, WorkchatSDKError};
use crate::events::RealtimeEvent;
use crate::outbox::OutboxManager;
use crate::session::SessionState;
use crate::store::entities::{LastMessagePreview, Message};
use crate::store::CacheStore;
use crate::unread;

/// 实时事件归并器
pub struct EventReducer {
    store: Arc<CacheStore>,
    session: Arc<SessionState>,
    outbox: Arc<OutboxManager>,
}

impl EventReducer {
    pub fn new(
        store: Arc<CacheStore>,
        session: Arc<SessionState>,
        outbox: Arc<OutboxManager>,
    ) -> Self {
        Self {
            store,
            session,
            outbox,
        }
    }

    /// 归并一个规范事件
    pub fn apply(&self, event: RealtimeEvent) -> Result<()> {
        match event {
            RealtimeEvent::MessageSent { message } => self.apply_message_sent(message),
            RealtimeEvent::MessageRead {
                conversation_id,
                user_id,
            } => self.apply_message_read(&conversation_id, &user_id),
            RealtimeEvent::ConversationUpdated => {
                self.apply_conversation_updated();
                Ok(())
            }
        }
    }

    /// 归并新消息事件
    pub fn apply_message_sent(&self, message: Message) -> Result<()> {
        // 1. 解析目标会话；不在缓存里则为良性 no-op
        //    （该会话会在下一次全量拉取时出现）
        let conversation = match self.store.find_conversation(&message.conversation_id) {
            Some(conversation) => conversation,
            None => {
                return Err(WorkchatSDKError::ScopeNotFound(format!(
                    "conversation {}",
                    message.conversation_id
                )));
            }
        };

        // 2. 幂等：同一身份已缓存则 no-op（覆盖重复投递）
        if self
            .store
            .contains_message(&message.conversation_id, &message.message_id)
        {
            debug!(
                "重复投递，忽略: conversation_id={}, message_id={}",
                message.conversation_id, message.message_id
            );
            return Ok(());
        }

        // 2b. 自发回声：发送者是本地用户且协调器有匹配的在途信封时，
        //     以协调器的确认路径为准，回声只是信息性的
        if message.sender_id == self.session.local_user_id()
            && self.outbox.is_own_echo(&message)
        {
            debug!(
                "在途发送的回声，忽略: conversation_id={}, message_id={}",
                message.conversation_id, message.message_id
            );
            return Ok(());
        }

        // 3. 插入最新页头部（保持最新在前的拉取顺序）
        self.store.insert_newest_message(message.clone());

        // 4. 无条件更新会话摘要（事件按会话单通道有序投递，最新事件总是赢）
        // 5. 未读记账：非激活会话 且 非本地用户发出 才 +1
        let active = self.session.active_conversation();
        let should_increment = unread::should_increment(
            &conversation,
            &message,
            active.as_deref(),
            self.session.local_user_id(),
        );
        let preview = LastMessagePreview::from_message(&message);
        self.store
            .update_conversation(&message.conversation_id, |c| {
                if c.updated_at < preview.sent_at {
                    c.updated_at = preview.sent_at;
                }
                c.last_message = Some(preview.clone());
                if should_increment {
                    unread::increment(c);
                }
            });
        Ok(())
    }

    /// 归并已读回执：未读绝对清零
    pub fn apply_message_read(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let hit = self.store.update_conversation(conversation_id, |c| {
            unread::clear(c);
        });
        if !hit {
            return Err(WorkchatSDKError::ScopeNotFound(format!(
                "conversation {}",
                conversation_id
            )));
        }
        debug!(
            "已读回执: conversation_id={}, user_id={}",
            conversation_id, user_id
        );
        Ok(())
    }

    /// 归并泛化的会话更新提示
    ///
    /// 低置信度信号：只标记元数据可能过期，不做任何缓存失效。
    /// 全量失效会抹掉专用事件精确维护的未读计数，这里刻意不刷。
    pub fn apply_conversation_updated(&self) {
        warn!("收到泛化会话更新提示，仅标记刷新建议");
        self.store.mark_refresh_recommended();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::RetryPolicy;
    use crate::store::entities::{
        ContentKind, Conversation, ConversationKind, DeliveryState, Page,
    };
    use crate::transport::testing::MockTransport;

    fn conversation(id: &str, unread: u32) -> Conversation {
        Conversation {
            conversation_id: id.to_string(),
            name: format!("会话-{}", id),
            kind: ConversationKind::Group,
            member_count: 3,
            last_message: None,
            unread_count: unread,
            updated_at: 0,
        }
    }

    fn message(id: &str, conversation_id: &str, sender_id: &str, sent_at: i64) -> Message {
        Message {
            message_id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
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

    struct Fixture {
        store: Arc<CacheStore>,
        session: Arc<SessionState>,
        outbox: Arc<OutboxManager>,
        reducer: EventReducer,
        transport: Arc<MockTransport>,
    }

    fn setup(conversations: Vec<Conversation>) -> Fixture {
        let store = Arc::new(CacheStore::new());
        let session = Arc::new(SessionState::new("user-1"));
        let transport = Arc::new(MockTransport::new());
        let outbox = Arc::new(OutboxManager::new(
            Arc::clone(&store),
            Arc::clone(&transport) as Arc<dyn crate::transport::ChatTransport>,
            Arc::clone(&session),
            RetryPolicy::default(),
            5_000,
        ));
        let reducer = EventReducer::new(
            Arc::clone(&store),
            Arc::clone(&session),
            Arc::clone(&outbox),
        );
        store.append_conversation_page(
            ConversationKind::Group,
            Page::new(conversations, false, None),
        );
        Fixture {
            store,
            session,
            outbox,
            reducer,
            transport,
        }
    }

    #[tokio::test]
    async fn test_idempotent_merge() {
        let fx = setup(vec![conversation("conv-1", 0)]);
        let event = message("srv-1", "conv-1", "user-2", 100);

        fx.reducer.apply_message_sent(event.clone()).unwrap();
        let once = fx.store.flatten_messages("conv-1");

        // 同一事件再归并一次，展平结果不变
        fx.reducer.apply_message_sent(event).unwrap();
        let twice = fx.store.flatten_messages("conv-1");
        assert_eq!(*once, *twice);
        assert_eq!(twice.len(), 1);

        // 未读也只加了一次
        assert_eq!(fx.store.find_conversation("conv-1").unwrap().unread_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_benign_noop() {
        let fx = setup(vec![conversation("conv-1", 0)]);
        let err = fx
            .reducer
            .apply_message_sent(message("srv-1", "conv-unknown", "user-2", 100))
            .unwrap_err();

        // 良性 no-op：缓存不变，错误不上抛给用户
        assert!(err.is_benign());
        assert!(matches!(err, WorkchatSDKError::ScopeNotFound(_)));
        assert!(fx.store.flatten_messages("conv-unknown").is_empty());
        assert_eq!(fx.store.total_unread_count(), 0);
    }

    #[tokio::test]
    async fn test_unread_scenario_increment_then_absolute_clear() {
        // conv-1 未读=2，非激活
        let fx = setup(vec![conversation("conv-1", 2)]);

        fx.reducer
            .apply_message_sent(message("srv-9", "conv-1", "user-2", 500))
            .unwrap();

        let conv = fx.store.find_conversation("conv-1").unwrap();
        assert_eq!(conv.unread_count, 3);
        let preview = conv.last_message.unwrap();
        assert_eq!(preview.message_id, "srv-9");

        // 已读回执绝对清零
        fx.reducer.apply_message_read("conv-1", "user-1").unwrap();
        assert_eq!(fx.store.find_conversation("conv-1").unwrap().unread_count, 0);

        // 0 → 0 也成立
        fx.reducer.apply_message_read("conv-1", "user-1").unwrap();
        assert_eq!(fx.store.find_conversation("conv-1").unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn test_unread_suppressed_for_active_conversation() {
        let fx = setup(vec![conversation("conv-1", 5)]);
        fx.session.set_active_conversation(Some("conv-1".to_string()));

        fx.reducer
            .apply_message_sent(message("srv-1", "conv-1", "user-2", 100))
            .unwrap();

        // 未读不变，消息照常插入
        assert_eq!(fx.store.find_conversation("conv-1").unwrap().unread_count, 5);
        assert_eq!(fx.store.flatten_messages("conv-1").len(), 1);
    }

    #[tokio::test]
    async fn test_unread_suppressed_for_own_sender() {
        let fx = setup(vec![conversation("conv-1", 0)]);

        // 自己在另一台设备发的消息：插入但不计未读
        fx.reducer
            .apply_message_sent(message("srv-1", "conv-1", "user-1", 100))
            .unwrap();

        assert_eq!(fx.store.find_conversation("conv-1").unwrap().unread_count, 0);
        assert_eq!(fx.store.flatten_messages("conv-1").len(), 1);
    }

    #[tokio::test]
    async fn test_own_echo_deduplicated_against_pending_send() {
        let fx = setup(vec![conversation("conv-9", 0)]);
        fx.transport.push_send_result(Ok(message(
            "srv-123",
            "conv-9",
            "user-1",
            chrono::Utc::now().timestamp_millis(),
        )));

        let handle = fx
            .outbox
            .send("conv-9", "content-srv-123", ContentKind::Text, Vec::new());

        // 在途期间到达的自发回声（指纹匹配）不产生第二个条目
        let mut echo = message(
            "srv-echo",
            "conv-9",
            "user-1",
            chrono::Utc::now().timestamp_millis(),
        );
        echo.content = "content-srv-123".to_string();
        fx.reducer.apply_message_sent(echo).unwrap();

        let flat = fx.store.flatten_messages("conv-9");
        assert_eq!(flat.len(), 1);
        assert!(flat[0].is_local());

        // 协调器确认路径胜出
        handle.wait().await.unwrap();
        let flat = fx.store.flatten_messages("conv-9");
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].message_id, "srv-123");
    }

    #[tokio::test]
    async fn test_messages_insert_preserves_display_order() {
        let fx = setup(vec![conversation("conv-1", 0)]);

        fx.reducer
            .apply_message_sent(message("srv-1", "conv-1", "user-2", 10))
            .unwrap();
        fx.reducer
            .apply_message_sent(message("srv-2", "conv-1", "user-2", 20))
            .unwrap();

        let flat = fx.store.flatten_messages("conv-1");
        let ids: Vec<&str> = flat.iter().map(|m| m.message_id.as_str()).collect();
        // 显示顺序：时间升序
        assert_eq!(ids, vec!["srv-1", "srv-2"]);
    }

    #[tokio::test]
    async fn test_conversation_updated_only_marks_hint() {
        let fx = setup(vec![conversation("conv-1", 4)]);

        fx.reducer.apply_conversation_updated();

        // 未读计数原样保留，没有任何缓存失效
        assert_eq!(fx.store.find_conversation("conv-1").unwrap().unread_count, 4);
        assert!(fx.store.take_refresh_recommended());
        assert!(!fx.store.take_refresh_recommended());
    }

    #[tokio::test]
    async fn test_apply_dispatches_all_event_kinds() {
        let fx = setup(vec![conversation("conv-1", 1)]);

        fx.reducer
            .apply(RealtimeEvent::MessageSent {
                message: message("srv-1", "conv-1", "user-2", 100),
            })
            .unwrap();
        assert_eq!(fx.store.find_conversation("conv-1").unwrap().unread_count, 2);

        fx.reducer
            .apply(RealtimeEvent::MessageRead {
                conversation_id: "conv-1".to_string(),
                user_id: "user-1".to_string(),
            })
            .unwrap();
        assert_eq!(fx.store.find_conversation("conv-1").unwrap().unread_count, 0);

        fx.reducer.apply(RealtimeEvent::ConversationUpdated).unwrap();
        assert!(fx.store.take_refresh_recommended());
    }
}
