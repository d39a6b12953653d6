//! Workchat SDK - 业务聊天客户端缓存同步引擎
//!
//! 把三条并发数据路径调和进一个一致、可观察的数据模型：
//! - 📄 REST 分页拉取的历史（游标分页，最新在前）
//! - 📡 实时推送事件（新消息、已读回执、会话更新提示）
//! - ✍️ 本地乐观写入（发送消息的 pending → confirmed 流转）
//!
//! 多个 UI 面（侧边栏列表、聊天面板、未读徽标）同时读取同一份
//! 存储投影，不会出现分叉或重复：
//! - 🔁 幂等归并：同一消息无论从哪条路径到达都只出现一次
//! - 🔄 乐观对账：临时消息被服务端实体原子替换，无闪烁
//! - 🔔 按作用域通知：变更只唤醒受影响的订阅者
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use workchat_sdk::{ChatTransport, ContentKind, ConversationKind, WorkchatConfig, WorkchatSDK};
//!
//! async fn run(transport: Arc<dyn ChatTransport>) -> workchat_sdk::Result<()> {
//!     // 初始化 SDK（显式注入传输实现与用户身份）
//!     let sdk = WorkchatSDK::initialize("user-1", WorkchatConfig::default(), transport)?;
//!
//!     // 拉取会话列表与消息历史
//!     sdk.load_conversations(ConversationKind::Group).await?;
//!     sdk.load_older_messages("conv-1").await?;
//!
//!     // 发送消息（乐观插入立即可见）
//!     let handle = sdk.send_message("conv-1", "Hello!", ContentKind::Text, Vec::new());
//!     let confirmed = handle.wait().await?;
//!     println!("服务端确认: {}", confirmed.message_id);
//!
//!     // 实时事件入口（在连接回调里调用）
//!     sdk.handle_realtime_event("message_read", serde_json::json!({
//!         "conversation_id": "conv-1",
//!         "user_id": "user-1",
//!     }));
//!
//!     // 登出时清空
//!     sdk.clear();
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod error;
pub mod events;
pub mod outbox;
pub mod reducer;
pub mod sdk;
pub mod session;
pub mod store;
pub mod transport;
pub mod unread;
pub mod version;

// 重新导出核心类型，方便使用
pub use error::{Result, WorkchatSDKError};
pub use events::{EventDecodeError, RealtimeEvent};
pub use outbox::{
    EnvelopeState, OptimisticEnvelope, OutboxManager, RetryPolicy, SendFailureReason, SendHandle,
};
pub use reducer::EventReducer;
pub use sdk::{WorkchatConfig, WorkchatConfigBuilder, WorkchatSDK};
pub use session::SessionState;
pub use store::{
    Attachment, CacheStore, ContentKind, Conversation, ConversationKind, DeliveryState, HubStats,
    LastMessagePreview, Message, Page, ScopeKey, StoreChange, SubscriptionHub, SubscriptionId,
    LOCAL_MESSAGE_ID_PREFIX,
};
pub use transport::{ChatTransport, OutgoingMessage};
pub use version::SDK_VERSION;
