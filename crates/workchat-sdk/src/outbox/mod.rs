//! 乐观发送协调器（Outbox）
//!
//! 职责：
//! - 用户发送时同步构造本地乐观消息并插入缓存（UI 立即可见）
//! - 在途请求成功后用服务端实体原子换掉临时身份
//! - 失败时保留消息并标记 failed，支持用户重试（同一临时ID，上限 3 轮）
//! - 为归并器提供自发回声的去重指纹
//!
//! 协调器只拥有在途簿记（信封）；对账完成后簿记即销毁，
//! 缓存仍是唯一的真相来源。

pub mod envelope;
pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{Result, WorkchatSDKError};
use crate::session::SessionState;
use crate::store::entities::{
    Attachment, ContentKind, DeliveryState, LastMessagePreview, Message,
};
use crate::store::pages::ReplaceOutcome;
use crate::store::{new_local_message_id, CacheStore};
use crate::transport::{ChatTransport, OutgoingMessage};

pub use envelope::{EnvelopeState, OptimisticEnvelope};
pub use retry::{RetryPolicy, SendFailureReason};

/// 发送凭据 - UI 用它追踪一次发送轮次的完成
///
/// 本地乐观消息在 `send` 返回时已经可见（flatten 立即包含它），
/// 凭据只负责等待网络结果。
#[derive(Debug)]
pub struct SendHandle {
    /// 本地临时消息ID
    pub local_message_id: String,
    rx: oneshot::Receiver<Result<Message>>,
}

impl SendHandle {
    /// 等待本轮发送的网络结果
    pub async fn wait(self) -> Result<Message> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(WorkchatSDKError::Other(
                "send task dropped before completion".to_string(),
            )),
        }
    }
}

/// 乐观发送协调器
pub struct OutboxManager {
    store: Arc<CacheStore>,
    transport: Arc<dyn ChatTransport>,
    session: Arc<SessionState>,
    /// 在途信封：local_message_id → 簿记
    envelopes: Arc<Mutex<HashMap<String, OptimisticEnvelope>>>,
    policy: RetryPolicy,
    /// 回声匹配时间窗口（毫秒）
    echo_window_ms: i64,
}

impl OutboxManager {
    pub fn new(
        store: Arc<CacheStore>,
        transport: Arc<dyn ChatTransport>,
        session: Arc<SessionState>,
        policy: RetryPolicy,
        echo_window_ms: i64,
    ) -> Self {
        Self {
            store,
            transport,
            session,
            envelopes: Arc::new(Mutex::new(HashMap::new())),
            policy,
            echo_window_ms,
        }
    }

    /// 发送一条消息
    ///
    /// 同步完成乐观插入（调用返回前 flatten 已包含 `sending` 消息），
    /// 网络请求在后台任务中进行。必须在 Tokio runtime 内调用。
    pub fn send(
        &self,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        content_kind: ContentKind,
        attachments: Vec<Attachment>,
    ) -> SendHandle {
        let conversation_id = conversation_id.into();
        let content = content.into();
        let now = chrono::Utc::now().timestamp_millis();
        let local_message_id = new_local_message_id();

        let provisional = Message {
            message_id: local_message_id.clone(),
            conversation_id: conversation_id.clone(),
            sender_id: self.session.local_user_id().to_string(),
            content: content.clone(),
            content_kind,
            sent_at: now,
            edited_at: None,
            is_pinned: false,
            is_starred: false,
            attachments: attachments.clone(),
            delivery_state: DeliveryState::Sending,
        };

        // 1. 乐观插入 + 登记信封（同一个同步片段内完成）
        self.store.insert_newest_message(provisional);
        self.envelopes.lock().insert(
            local_message_id.clone(),
            OptimisticEnvelope::new(
                local_message_id.clone(),
                conversation_id.clone(),
                content.clone(),
                content_kind,
                attachments.clone(),
                now,
            ),
        );
        debug!(
            "乐观消息已插入: conversation_id={}, local_message_id={}",
            conversation_id, local_message_id
        );

        // 2. 派发网络请求
        let outgoing = OutgoingMessage {
            conversation_id,
            content,
            content_kind,
            attachments,
        };
        self.dispatch(local_message_id, outgoing, None)
    }

    /// 重试一条失败的发送
    ///
    /// 复用同一个临时ID；超过重试上限后保持终态 failed。
    pub fn retry(&self, local_message_id: &str) -> Result<SendHandle> {
        let (outgoing, delay_ms) = {
            let mut envelopes = self.envelopes.lock();
            let envelope = envelopes.get_mut(local_message_id).ok_or_else(|| {
                WorkchatSDKError::NotFound(format!("envelope {}", local_message_id))
            })?;

            if envelope.is_in_flight() {
                return Err(WorkchatSDKError::InvalidOperation(format!(
                    "send {} still in flight",
                    local_message_id
                )));
            }

            let reason = envelope
                .failure
                .clone()
                .unwrap_or(SendFailureReason::Unknown("unclassified".to_string()));
            let retries_so_far = envelope.attempts.saturating_sub(1);
            if !self.policy.should_retry(retries_so_far, &reason) {
                return Err(WorkchatSDKError::RetryExhausted {
                    local_message_id: local_message_id.to_string(),
                    attempts: envelope.attempts,
                });
            }

            envelope.mark_retrying();
            let outgoing = OutgoingMessage {
                conversation_id: envelope.conversation_id.clone(),
                content: envelope.content.clone(),
                content_kind: envelope.content_kind,
                attachments: envelope.attachments.clone(),
            };
            let delay_ms = self.policy.next_delay_ms(envelope.attempts, &reason);
            (outgoing, delay_ms)
        };

        self.store
            .update_message(&outgoing.conversation_id, local_message_id, |m| {
                m.delivery_state = DeliveryState::Retrying;
            });
        debug!(
            "重试发送: local_message_id={}, delay_ms={}",
            local_message_id, delay_ms
        );

        Ok(self.dispatch(local_message_id.to_string(), outgoing, Some(delay_ms)))
    }

    /// 判断一条实时消息是否是本客户端某次在途发送的回声
    ///
    /// 只在发送者是本地用户时有意义，由归并器调用。
    pub fn is_own_echo(&self, message: &Message) -> bool {
        let envelopes = self.envelopes.lock();
        envelopes
            .values()
            .any(|envelope| envelope.matches_echo(message, self.echo_window_ms))
    }

    /// 读取信封快照（失败原因、重试轮数等）
    pub fn envelope(&self, local_message_id: &str) -> Option<OptimisticEnvelope> {
        self.envelopes.lock().get(local_message_id).cloned()
    }

    /// 在途 + 失败滞留的信封数量
    pub fn pending_count(&self) -> usize {
        self.envelopes.lock().len()
    }

    /// 清空簿记（登出 / 切换用户）
    pub fn clear(&self) {
        self.envelopes.lock().clear();
    }

    /// 派发一轮发送任务
    fn dispatch(
        &self,
        local_message_id: String,
        outgoing: OutgoingMessage,
        delay_ms: Option<u64>,
    ) -> SendHandle {
        let (tx, rx) = oneshot::channel();
        let store = Arc::clone(&self.store);
        let transport = Arc::clone(&self.transport);
        let envelopes = Arc::clone(&self.envelopes);
        let task_local_id = local_message_id.clone();

        tokio::spawn(async move {
            let conversation_id = outgoing.conversation_id.clone();

            // 退避窗口（仅重试轮）
            if let Some(delay) = delay_ms {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if let Some(envelope) = envelopes.lock().get_mut(&task_local_id) {
                    envelope.mark_sending();
                }
                store.update_message(&conversation_id, &task_local_id, |m| {
                    m.delivery_state = DeliveryState::Sending;
                });
            }

            match transport.send_message(outgoing).await {
                Ok(mut confirmed) => {
                    confirmed.delivery_state = DeliveryState::Sent;
                    // 簿记销毁在对账之前：归并器此后不再把回声当作在途
                    envelopes.lock().remove(&task_local_id);
                    let outcome = store.reconcile_message(
                        &conversation_id,
                        &task_local_id,
                        confirmed.clone(),
                    );
                    if outcome == ReplaceOutcome::NotFound {
                        // 缓存可能在请求期间被清空，确认结果只能丢弃
                        warn!(
                            "对账目标不存在: conversation_id={}, local_message_id={}",
                            conversation_id, task_local_id
                        );
                    } else {
                        // 自发消息的回声按策略被归并器忽略，
                        // 会话摘要在确认路径上更新
                        let preview = LastMessagePreview::from_message(&confirmed);
                        store.update_conversation(&conversation_id, |c| {
                            if c.updated_at < preview.sent_at {
                                c.updated_at = preview.sent_at;
                            }
                            c.last_message = Some(preview.clone());
                        });
                    }
                    let _ = tx.send(Ok(confirmed));
                }
                Err(e) => {
                    let reason = SendFailureReason::from(&e);
                    error!(
                        "发送失败: conversation_id={}, local_message_id={}, reason={:?}",
                        conversation_id, task_local_id, reason
                    );
                    if let Some(envelope) = envelopes.lock().get_mut(&task_local_id) {
                        envelope.mark_failed(reason);
                    }
                    // 消息保留在缓存中，仅标记失败
                    store.update_message(&conversation_id, &task_local_id, |m| {
                        m.delivery_state = DeliveryState::Failed;
                    });
                    let _ = tx.send(Err(e));
                }
            }
        });

        SendHandle {
            local_message_id,
            rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 1,
        }
    }

    fn setup(transport: Arc<MockTransport>) -> OutboxManager {
        let store = Arc::new(CacheStore::new());
        let session = Arc::new(SessionState::new("user-1"));
        OutboxManager::new(store, transport, session, fast_policy(), 5_000)
    }

    fn confirmed(id: &str, conversation_id: &str, content: &str) -> Message {
        Message {
            message_id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "user-1".to_string(),
            content: content.to_string(),
            content_kind: ContentKind::Text,
            sent_at: chrono::Utc::now().timestamp_millis(),
            edited_at: None,
            is_pinned: false,
            is_starred: false,
            attachments: Vec::new(),
            delivery_state: DeliveryState::Sent,
        }
    }

    #[tokio::test]
    async fn test_send_optimistic_then_confirmed() {
        let transport = Arc::new(MockTransport::new());
        let outbox = setup(Arc::clone(&transport));
        transport.push_send_result(Ok(confirmed("srv-123", "conv-9", "Hello")));

        let handle = outbox.send("conv-9", "Hello", ContentKind::Text, Vec::new());

        // 发送返回后立即可见一条 sending 状态的乐观消息
        let flat = outbox.store.flatten_messages("conv-9");
        assert_eq!(flat.len(), 1);
        assert!(flat[0].is_local());
        assert_eq!(flat[0].delivery_state, DeliveryState::Sending);
        assert_eq!(flat[0].message_id, handle.local_message_id);

        let result = handle.wait().await.unwrap();
        assert_eq!(result.message_id, "srv-123");

        // 确认后恰好一条消息：服务端ID、sent 状态，无临时条目残留
        let flat = outbox.store.flatten_messages("conv-9");
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].message_id, "srv-123");
        assert_eq!(flat[0].delivery_state, DeliveryState::Sent);
        assert_eq!(outbox.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_send_is_retained() {
        let transport = Arc::new(MockTransport::new());
        let outbox = setup(Arc::clone(&transport));
        transport.push_send_result(Err(WorkchatSDKError::Transport(
            "connection reset".to_string(),
        )));

        let handle = outbox.send("conv-1", "你好", ContentKind::Text, Vec::new());
        let local_id = handle.local_message_id.clone();
        assert!(handle.wait().await.is_err());

        // 失败的消息保留在时间线里，状态 failed
        let flat = outbox.store.flatten_messages("conv-1");
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].message_id, local_id);
        assert_eq!(flat[0].delivery_state, DeliveryState::Failed);

        // 信封保留失败原因
        let envelope = outbox.envelope(&local_id).unwrap();
        assert_eq!(envelope.state, EnvelopeState::Failed);
        assert!(envelope.failure.is_some());
    }

    #[tokio::test]
    async fn test_retry_reuses_local_id_until_ceiling() {
        let transport = Arc::new(MockTransport::new());
        let outbox = setup(Arc::clone(&transport));
        for _ in 0..4 {
            transport.push_send_result(Err(WorkchatSDKError::Transport("timeout".to_string())));
        }

        let handle = outbox.send("conv-1", "retry me", ContentKind::Text, Vec::new());
        let local_id = handle.local_message_id.clone();
        assert!(handle.wait().await.is_err());

        // 3 轮重试都复用同一个临时ID
        for expected_attempts in 2..=4 {
            let handle = outbox.retry(&local_id).unwrap();
            assert_eq!(handle.local_message_id, local_id);
            assert!(handle.wait().await.is_err());
            assert_eq!(outbox.envelope(&local_id).unwrap().attempts, expected_attempts);
        }

        // 超过上限后保持终态 failed
        let err = outbox.retry(&local_id).unwrap_err();
        assert!(matches!(err, WorkchatSDKError::RetryExhausted { .. }));
        let flat = outbox.store.flatten_messages("conv-1");
        assert_eq!(flat[0].delivery_state, DeliveryState::Failed);
        assert_eq!(transport.sent_count(), 4);
    }

    #[tokio::test]
    async fn test_retry_rejected_while_in_flight() {
        let transport = Arc::new(MockTransport::new());
        let outbox = setup(Arc::clone(&transport));
        transport.push_send_result(Ok(confirmed("srv-1", "conv-1", "hi")));

        let handle = outbox.send("conv-1", "hi", ContentKind::Text, Vec::new());
        // 在途期间拒绝重试
        let err = outbox.retry(&handle.local_message_id).unwrap_err();
        assert!(matches!(err, WorkchatSDKError::InvalidOperation(_)));
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_echo_fingerprint_matching() {
        let transport = Arc::new(MockTransport::new());
        let outbox = setup(Arc::clone(&transport));
        transport.push_send_result(Ok(confirmed("srv-1", "conv-1", "echo me")));

        let handle = outbox.send("conv-1", "echo me", ContentKind::Text, Vec::new());

        let echo = confirmed("srv-echo", "conv-1", "echo me");
        assert!(outbox.is_own_echo(&echo));

        let other = confirmed("srv-other", "conv-1", "different");
        assert!(!outbox.is_own_echo(&other));

        // 对账完成后信封销毁，不再匹配回声
        handle.wait().await.unwrap();
        assert!(!outbox.is_own_echo(&echo));
    }
}
