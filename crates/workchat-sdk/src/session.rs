//! 会话态（Session）- 本地用户身份与当前激活会话
//!
//! 激活会话用于未读抑制：用户正在看的会话不应累计未读徽标。

use parking_lot::RwLock;
use tracing::debug;

/// 本地会话态
#[derive(Debug)]
pub struct SessionState {
    /// 当前登录用户ID
    local_user_id: String,
    /// 当前激活（打开中）的会话，None 表示没有会话被打开
    active_conversation: RwLock<Option<String>>,
}

impl SessionState {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            active_conversation: RwLock::new(None),
        }
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// 当前激活会话ID（克隆返回）
    pub fn active_conversation(&self) -> Option<String> {
        self.active_conversation.read().clone()
    }

    /// 切换激活会话（进入聊天面板 / 返回列表）
    pub fn set_active_conversation(&self, conversation_id: Option<String>) {
        debug!("切换激活会话: {:?}", conversation_id);
        *self.active_conversation.write() = conversation_id;
    }

    /// 判断某个会话是否为激活会话
    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active_conversation
            .read()
            .as_deref()
            .map(|active| active == conversation_id)
            .unwrap_or(false)
    }
}
