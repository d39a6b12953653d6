//! 传输边界 - REST 拉取与发送的外部协作者接口
//!
//! 连接生命周期（连接/重连/退避）、HTTP 细节、认证都在边界之外。
//! 本核心只依赖这三个操作的语义：
//! - 游标分页拉取（最新在前）
//! - 发送（失败时 Err）
//!
//! 实时通道不在此 trait 上：外部在收到事件时调用
//! SDK 的事件入口即可（见 `WorkchatSDK::handle_realtime_event`）。

use async_trait::async_trait;

use crate::error::Result;
use crate::store::entities::{
    Attachment, ContentKind, Conversation, ConversationKind, Message, Page,
};

/// 待发送消息
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub content: String,
    pub content_kind: ContentKind,
    pub attachments: Vec<Attachment>,
}

/// 聊天传输接口
#[async_trait]
pub trait ChatTransport: Send + Sync + std::fmt::Debug {
    /// 拉取一页会话列表（最新在前）
    async fn fetch_conversations(
        &self,
        kind: ConversationKind,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<Page<Conversation>>;

    /// 拉取一页消息（最新在前）
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<Page<Message>>;

    /// 发送消息，返回服务端确认实体
    async fn send_message(&self, outgoing: OutgoingMessage) -> Result<Message>;
}
