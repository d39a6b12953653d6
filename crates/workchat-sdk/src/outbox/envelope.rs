//! 乐观信封 - 在途发送的临时簿记
//!
//! 把一条本地乐观消息与它的在途网络请求绑定：重试计数、
//! 失败原因、回声匹配所需的最小指纹。对账完成后整个信封被丢弃。

use crate::outbox::retry::SendFailureReason;
use crate::store::entities::{Attachment, ContentKind, Message};

/// 信封生命周期状态
///
/// 确认成功的信封直接销毁，不存在 Confirmed 状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    /// 网络请求在途
    Sending,
    /// 等待退避后重派
    Retrying,
    /// 发送失败，等待用户重试或放弃
    Failed,
}

/// 乐观信封
#[derive(Debug, Clone)]
pub struct OptimisticEnvelope {
    /// 本地临时消息ID（`local-` 前缀）
    pub local_message_id: String,
    pub conversation_id: String,
    /// 回声匹配指纹：内容
    pub content: String,
    pub content_kind: ContentKind,
    /// 重派时重建请求所需的附件
    pub attachments: Vec<Attachment>,
    /// 入队时间（毫秒时间戳）
    pub queued_at: i64,
    /// 已尝试的发送轮数（首次发送算第 1 轮）
    pub attempts: u32,
    pub state: EnvelopeState,
    /// 最近一次失败原因
    pub failure: Option<SendFailureReason>,
}

impl OptimisticEnvelope {
    pub fn new(
        local_message_id: impl Into<String>,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        content_kind: ContentKind,
        attachments: Vec<Attachment>,
        queued_at: i64,
    ) -> Self {
        Self {
            local_message_id: local_message_id.into(),
            conversation_id: conversation_id.into(),
            content: content.into(),
            content_kind,
            attachments,
            queued_at,
            attempts: 1,
            state: EnvelopeState::Sending,
            failure: None,
        }
    }

    /// 是否仍在等待网络结果
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, EnvelopeState::Sending | EnvelopeState::Retrying)
    }

    /// 标记失败并记录原因（消息保留在缓存中，不移除）
    pub fn mark_failed(&mut self, reason: SendFailureReason) {
        self.state = EnvelopeState::Failed;
        self.failure = Some(reason);
    }

    /// 进入重试：轮数 +1，清除上次失败原因
    pub fn mark_retrying(&mut self) {
        self.attempts += 1;
        self.state = EnvelopeState::Retrying;
        self.failure = None;
    }

    /// 退避结束，重新进入在途
    pub fn mark_sending(&mut self) {
        self.state = EnvelopeState::Sending;
    }

    /// 判断一条实时消息是否是本信封的回声
    ///
    /// 发出时拿不到服务端ID，只能用指纹近似匹配：
    /// 同会话 + 同内容 + 发送时间在窗口内，且信封还在途。
    /// 这是尽力而为的启发式，待协议携带端到端关联ID后改为精确匹配。
    pub fn matches_echo(&self, message: &Message, window_ms: i64) -> bool {
        self.is_in_flight()
            && self.conversation_id == message.conversation_id
            && self.content == message.content
            && self.content_kind == message.content_kind
            && (message.sent_at - self.queued_at).abs() <= window_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::entities::DeliveryState;

    fn envelope() -> OptimisticEnvelope {
        OptimisticEnvelope::new("local-1", "conv-1", "Hello", ContentKind::Text, Vec::new(), 1_000)
    }

    fn echo(conversation_id: &str, content: &str, sent_at: i64) -> Message {
        Message {
            message_id: "srv-1".to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "user-1".to_string(),
            content: content.to_string(),
            content_kind: ContentKind::Text,
            sent_at,
            edited_at: None,
            is_pinned: false,
            is_starred: false,
            attachments: Vec::new(),
            delivery_state: DeliveryState::Sent,
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut env = envelope();
        assert_eq!(env.attempts, 1);
        assert!(env.is_in_flight());

        env.mark_failed(SendFailureReason::NetworkTimeout);
        assert_eq!(env.state, EnvelopeState::Failed);
        assert!(!env.is_in_flight());
        assert_eq!(env.failure, Some(SendFailureReason::NetworkTimeout));

        env.mark_retrying();
        assert_eq!(env.attempts, 2);
        assert_eq!(env.state, EnvelopeState::Retrying);
        assert_eq!(env.failure, None);

        env.mark_sending();
        assert_eq!(env.state, EnvelopeState::Sending);
    }

    #[test]
    fn test_echo_matching_within_window() {
        let env = envelope();
        assert!(env.matches_echo(&echo("conv-1", "Hello", 3_000), 5_000));
        // 会话不同
        assert!(!env.matches_echo(&echo("conv-2", "Hello", 3_000), 5_000));
        // 内容不同
        assert!(!env.matches_echo(&echo("conv-1", "Hi", 3_000), 5_000));
        // 超出时间窗口
        assert!(!env.matches_echo(&echo("conv-1", "Hello", 60_000), 5_000));
    }

    #[test]
    fn test_echo_not_matched_after_failure() {
        let mut env = envelope();
        env.mark_failed(SendFailureReason::Forbidden);
        // 信封不在途时不做回声去重
        assert!(!env.matches_echo(&echo("conv-1", "Hello", 2_000), 5_000));
    }
}
