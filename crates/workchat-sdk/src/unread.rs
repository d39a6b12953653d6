//! 未读计数 - 纯函数式的记账规则
//!
//! 不持有任何隐藏状态：全部输入都是归并器本来就有的数据，
//! 可以脱离传输层单独测试。

use crate::store::entities::{Conversation, Message};

/// 判断一条新消息是否应该让会话未读数 +1
///
/// 两段抑制条件，缺一不可：
/// - 目标会话是当前激活会话 → 用户正在看，视为已读
/// - 发送者是本地用户自己 → 多端回声，对自己不算新消息
pub fn should_increment(
    conversation: &Conversation,
    message: &Message,
    active_conversation_id: Option<&str>,
    local_user_id: &str,
) -> bool {
    let is_active = active_conversation_id == Some(conversation.conversation_id.as_str());
    let is_own = message.sender_id == local_user_id;
    !is_active && !is_own
}

/// 未读数 +1
pub fn increment(conversation: &mut Conversation) {
    conversation.unread_count = conversation.unread_count.saturating_add(1);
}

/// 未读数绝对清零（已读回执语义，与之前的值无关）
pub fn clear(conversation: &mut Conversation) {
    conversation.unread_count = 0;
}
