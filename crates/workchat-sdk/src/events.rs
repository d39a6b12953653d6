//! 实时事件模块 - 异构线上形状的归一化
//!
//! 实时通道的负载形状并不稳定：
//! - 有的事件把实体包在 `payload` / `data` 信封里，有的直接平铺
//! - 内容类型有时是整数编码，有时是字符串编码
//! - 字段命名在 snake_case / camelCase 之间摇摆
//!
//! 归一化只在归并器的入口边界做一次，后续业务逻辑只面对
//! 统一的 [`RealtimeEvent`] 形状，与传输层的怪癖隔离。

use serde::Deserialize;
use serde_json::Value;

use crate::error::WorkchatSDKError;
use crate::store::entities::{Attachment, ContentKind, DeliveryState, Message};

/// 事件负载解码错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventDecodeError {
    #[error("unknown event name: {0}")]
    UnknownEvent(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid content kind: {0}")]
    InvalidContentKind(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<EventDecodeError> for WorkchatSDKError {
    fn from(error: EventDecodeError) -> Self {
        WorkchatSDKError::MalformedEvent(error.to_string())
    }
}

/// 归一化后的实时事件（规范内部形状）
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// 新消息投递
    MessageSent { message: Message },
    /// 已读回执（绝对语义：未读清零）
    MessageRead {
        conversation_id: String,
        user_id: String,
    },
    /// 低置信度的会话更新提示（无具体负载）
    ConversationUpdated,
}

impl RealtimeEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            RealtimeEvent::MessageSent { .. } => "message_sent",
            RealtimeEvent::MessageRead { .. } => "message_read",
            RealtimeEvent::ConversationUpdated => "conversation_updated",
        }
    }

    /// 获取事件关联的会话ID
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            RealtimeEvent::MessageSent { message } => Some(&message.conversation_id),
            RealtimeEvent::MessageRead {
                conversation_id, ..
            } => Some(conversation_id),
            RealtimeEvent::ConversationUpdated => None,
        }
    }

    /// 从线上事件名 + 原始负载解析出规范事件
    pub fn parse(event_name: &str, payload: Value) -> Result<Self, EventDecodeError> {
        // 1. 归一化事件名（大小写 / 分隔符不敏感）
        let normalized: String = event_name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        // 2. 解开可能存在的负载信封
        let payload = unwrap_envelope(payload);

        // 3. 按事件类型解码
        match normalized.as_str() {
            "messagesent" => {
                let envelope: WireMessageSent = serde_json::from_value(payload.clone())
                    .map_err(|e| EventDecodeError::InvalidPayload(e.to_string()))?;
                // 实体可能在 `message` 字段下，也可能平铺在事件顶层
                let wire = if envelope.message.message_id.is_some() {
                    envelope.message
                } else {
                    serde_json::from_value::<WireMessage>(payload)
                        .map_err(|e| EventDecodeError::InvalidPayload(e.to_string()))?
                };
                let message = wire.into_message()?;
                Ok(RealtimeEvent::MessageSent { message })
            }
            "messageread" => {
                let wire: WireMessageRead = serde_json::from_value(payload)
                    .map_err(|e| EventDecodeError::InvalidPayload(e.to_string()))?;
                let conversation_id = wire
                    .conversation_id
                    .ok_or(EventDecodeError::MissingField("conversation_id"))?;
                let user_id = wire.user_id.ok_or(EventDecodeError::MissingField("user_id"))?;
                Ok(RealtimeEvent::MessageRead {
                    conversation_id,
                    user_id,
                })
            }
            // 无具体负载，信封内容直接忽略
            "conversationupdated" => Ok(RealtimeEvent::ConversationUpdated),
            _ => Err(EventDecodeError::UnknownEvent(event_name.to_string())),
        }
    }
}

/// 解开 `payload` / `data` / `event` 信封（只解一层）
fn unwrap_envelope(value: Value) -> Value {
    if let Value::Object(ref map) = value {
        for key in ["payload", "data", "event"] {
            if let Some(inner) = map.get(key) {
                if inner.is_object() {
                    return inner.clone();
                }
            }
        }
    }
    value
}

/// 线上内容类型：整数编码或字符串编码
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireContentKind {
    Code(i32),
    Name(String),
}

impl WireContentKind {
    fn into_content_kind(self) -> Result<ContentKind, EventDecodeError> {
        match self {
            WireContentKind::Code(code) => ContentKind::from_i32(code)
                .ok_or_else(|| EventDecodeError::InvalidContentKind(code.to_string())),
            WireContentKind::Name(name) => ContentKind::from_str_code(&name)
                .ok_or(EventDecodeError::InvalidContentKind(name)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WireAttachment {
    pub url: String,
    #[serde(alias = "mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(alias = "thumbnailUrl", default)]
    pub thumbnail_url: Option<String>,
}

impl From<WireAttachment> for Attachment {
    fn from(wire: WireAttachment) -> Self {
        Attachment {
            url: wire.url,
            mime_type: wire.mime_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            size: wire.size.unwrap_or(0),
            filename: wire.filename,
            thumbnail_url: wire.thumbnail_url,
        }
    }
}

/// MessageSent 事件的线上形状
///
/// `message` 自身也可能被平铺到事件顶层（兼容旧网关），
/// 所以字段全部可选、最后统一校验。
#[derive(Debug, Clone, Deserialize)]
struct WireMessageSent {
    #[serde(default)]
    message: WireMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WireMessage {
    #[serde(alias = "messageId", alias = "id", default)]
    pub message_id: Option<String>,
    #[serde(alias = "conversationId", default)]
    pub conversation_id: Option<String>,
    #[serde(alias = "senderId", alias = "from_uid", default)]
    pub sender_id: Option<String>,
    #[serde(alias = "body", default)]
    pub content: Option<String>,
    #[serde(alias = "contentKind", alias = "message_type", default)]
    pub content_kind: Option<WireContentKind>,
    #[serde(alias = "sentAt", alias = "timestamp", default)]
    pub sent_at: Option<i64>,
    #[serde(alias = "editedAt", default)]
    pub edited_at: Option<i64>,
    #[serde(alias = "isPinned", alias = "pinned", default)]
    pub is_pinned: bool,
    #[serde(alias = "isStarred", alias = "starred", default)]
    pub is_starred: bool,
    #[serde(default)]
    pub attachments: Vec<WireAttachment>,
}

impl WireMessage {
    fn into_message(self) -> Result<Message, EventDecodeError> {
        let message_id = self
            .message_id
            .ok_or(EventDecodeError::MissingField("message_id"))?;
        let conversation_id = self
            .conversation_id
            .ok_or(EventDecodeError::MissingField("conversation_id"))?;
        let sender_id = self
            .sender_id
            .ok_or(EventDecodeError::MissingField("sender_id"))?;
        let sent_at = self.sent_at.ok_or(EventDecodeError::MissingField("sent_at"))?;
        let content_kind = match self.content_kind {
            Some(kind) => kind.into_content_kind()?,
            None => ContentKind::Text,
        };

        Ok(Message {
            message_id,
            conversation_id,
            sender_id,
            content: self.content.unwrap_or_default(),
            content_kind,
            sent_at,
            edited_at: self.edited_at,
            is_pinned: self.is_pinned,
            is_starred: self.is_starred,
            attachments: self.attachments.into_iter().map(Attachment::from).collect(),
            // 实时投递的消息一定已被服务端接受
            delivery_state: DeliveryState::Sent,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WireMessageRead {
    #[serde(alias = "conversationId", default)]
    pub conversation_id: Option<String>,
    #[serde(alias = "userId", alias = "reader_uid", default)]
    pub user_id: Option<String>,
}
