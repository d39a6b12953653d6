//! 缓存作用域键（Scope Key）
//!
//! 每个分页缓存切片、每个订阅都挂在一个作用域键下：
//! - 某个会话的消息时间线
//! - 某一类会话（群组 / 单聊）的会话列表

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::entities::ConversationKind;

/// 缓存作用域键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKey {
    /// 某一类会话的列表（群组 / 单聊）
    Conversations(ConversationKind),
    /// 某个会话的消息时间线
    Messages { conversation_id: String },
}

impl ScopeKey {
    /// 会话列表作用域
    pub fn conversations(kind: ConversationKind) -> Self {
        ScopeKey::Conversations(kind)
    }

    /// 消息时间线作用域
    pub fn messages(conversation_id: impl Into<String>) -> Self {
        ScopeKey::Messages {
            conversation_id: conversation_id.into(),
        }
    }

    /// 是否为消息时间线作用域
    pub fn is_messages(&self) -> bool {
        matches!(self, ScopeKey::Messages { .. })
    }

    /// 取出消息作用域关联的会话ID
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ScopeKey::Messages { conversation_id } => Some(conversation_id),
            ScopeKey::Conversations(_) => None,
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Conversations(kind) => write!(f, "conversations:{}", kind.as_str()),
            ScopeKey::Messages { conversation_id } => write!(f, "messages:{}", conversation_id),
        }
    }
}
