//! 数据实体定义 - 缓存中的会话 / 消息模型
//!
//! 这里定义了缓存层的所有核心结构体，用于：
//! - 类型安全的数据传输
//! - 统一的数据表示
//! - 序列化/反序列化支持

use std::fmt;

use serde::{Deserialize, Serialize};

/// 本地临时消息ID前缀
///
/// 乐观消息在服务端确认前使用 `local-<uuid>` 形式的临时ID，
/// 与服务端分配的 UUID 在构造上可区分。
pub const LOCAL_MESSAGE_ID_PREFIX: &str = "local-";

/// 生成一个本地临时消息ID
pub fn new_local_message_id() -> String {
    format!("{}{}", LOCAL_MESSAGE_ID_PREFIX, uuid::Uuid::new_v4())
}

/// 会话类型（1: 群组, 2: 单聊）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ConversationKind {
    Group = 1,
    Direct = 2,
}

impl ConversationKind {
    /// 从线上整数编码转换
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(ConversationKind::Group),
            2 => Some(ConversationKind::Direct),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Group => "group",
            ConversationKind::Direct => "direct",
        }
    }
}

/// 消息内容类型（线上可能是整数编码，也可能是字符串编码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ContentKind {
    Text = 1,
    Image = 2,
    File = 3,
    Task = 4,
}

impl ContentKind {
    /// 从线上整数编码转换
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(ContentKind::Text),
            2 => Some(ContentKind::Image),
            3 => Some(ContentKind::File),
            4 => Some(ContentKind::Task),
            _ => None,
        }
    }

    /// 从线上字符串编码转换
    pub fn from_str_code(value: &str) -> Option<Self> {
        match value {
            "text" => Some(ContentKind::Text),
            "image" => Some(ContentKind::Image),
            "file" => Some(ContentKind::File),
            "task" => Some(ContentKind::Task),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
            ContentKind::File => "file",
            ContentKind::Task => "task",
        }
    }
}

impl Default for ContentKind {
    fn default() -> Self {
        ContentKind::Text
    }
}

/// 消息投递状态
///
/// 状态流转图：
/// Sending → Sent
///    ↓
/// Failed → Retrying → Sending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DeliveryState {
    Sending = 1,  // 发送中
    Sent = 2,     // 已发送
    Retrying = 3, // 重试中
    Failed = 4,   // 发送失败
}

impl DeliveryState {
    /// 检查是否可以从当前状态转换到目标状态
    pub fn can_transition_to(&self, target: DeliveryState) -> bool {
        match (self, target) {
            (DeliveryState::Sending, DeliveryState::Sent) => true,
            (DeliveryState::Sending, DeliveryState::Failed) => true,
            (DeliveryState::Failed, DeliveryState::Retrying) => true,
            (DeliveryState::Retrying, DeliveryState::Sending) => true,
            (DeliveryState::Retrying, DeliveryState::Sent) => true,
            (DeliveryState::Retrying, DeliveryState::Failed) => true,
            _ => false,
        }
    }

    /// 检查状态是否表示发送成功
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryState::Sent)
    }

    /// 检查状态是否表示发送失败
    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryState::Failed)
    }

    /// 检查状态是否还在等待网络结果
    pub fn is_in_flight(&self) -> bool {
        matches!(self, DeliveryState::Sending | DeliveryState::Retrying)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DeliveryState::Sending => "发送中",
            DeliveryState::Sent => "已发送",
            DeliveryState::Retrying => "重试中",
            DeliveryState::Failed => "发送失败",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// 附件信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// 附件 URL（服务端返回的文件访问地址）
    pub url: String,
    /// MIME 类型
    pub mime_type: String,
    /// 文件大小（字节）
    pub size: u64,
    /// 文件名（可选）
    pub filename: Option<String>,
    /// 缩略图 URL（可选，主要用于图片）
    pub thumbnail_url: Option<String>,
}

/// 消息实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// 消息ID：服务端 UUID；确认前为 `local-` 前缀的临时ID
    pub message_id: String,
    /// 所属会话ID
    pub conversation_id: String,
    /// 发送方用户ID
    pub sender_id: String,
    /// 消息内容
    pub content: String,
    /// 内容类型
    pub content_kind: ContentKind,
    /// 发送时间（毫秒时间戳，与服务端一致）
    pub sent_at: i64,
    /// 编辑时间（毫秒时间戳，未编辑为 None）
    pub edited_at: Option<i64>,
    /// 是否置顶
    pub is_pinned: bool,
    /// 是否星标
    pub is_starred: bool,
    /// 附件列表
    pub attachments: Vec<Attachment>,
    /// 投递状态
    pub delivery_state: DeliveryState,
}

impl Message {
    /// 是否为本地乐观消息（尚未获得服务端ID）
    pub fn is_local(&self) -> bool {
        self.message_id.starts_with(LOCAL_MESSAGE_ID_PREFIX)
    }
}

/// 最后一条消息摘要 - 会话上的反规范化投影
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessagePreview {
    pub message_id: String,
    pub sender_id: String,
    /// 内容摘要（截断到 [`SNIPPET_MAX_CHARS`] 个字符）
    pub snippet: String,
    pub content_kind: ContentKind,
    /// 毫秒时间戳（与服务端一致）
    pub sent_at: i64,
}

/// 摘要截断长度（字符数）
pub const SNIPPET_MAX_CHARS: usize = 120;

impl LastMessagePreview {
    /// 从消息构造摘要投影
    pub fn from_message(message: &Message) -> Self {
        Self {
            message_id: message.message_id.clone(),
            sender_id: message.sender_id.clone(),
            snippet: truncate_chars(&message.content, SNIPPET_MAX_CHARS),
            content_kind: message.content_kind,
            sent_at: message.sent_at,
        }
    }
}

/// 按字符边界截断（避免截断多字节字符）
fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// 会话实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// 会话ID（稳定 UUID）
    pub conversation_id: String,
    /// 展示名称
    pub name: String,
    /// 会话类型
    pub kind: ConversationKind,
    /// 成员数量
    pub member_count: u32,
    /// 最后一条消息摘要
    pub last_message: Option<LastMessagePreview>,
    /// 未读计数（无符号，恒 >= 0）
    pub unread_count: u32,
    /// 更新时间（毫秒时间戳，与服务端一致）
    pub updated_at: i64,
}

impl Conversation {
    /// 最近活动时间：优先取最后一条消息的发送时间
    ///
    /// 没有任何消息的会话返回 None，在会话列表中排在最后。
    pub fn last_activity_at(&self) -> Option<i64> {
        self.last_message.as_ref().map(|m| m.sent_at)
    }
}

/// 游标分页结果 - 一次 REST 拉取返回的切片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// 本页条目（拉取方向：最新在前）
    pub items: Vec<T>,
    /// 是否还有更旧的数据
    pub has_more: bool,
    /// 下一页（更旧方向）的游标
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, has_more: bool, next_cursor: Option<String>) -> Self {
        Self {
            items,
            has_more,
            next_cursor,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
