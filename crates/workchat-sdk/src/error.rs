use std::fmt;

#[derive(Debug)]
pub enum WorkchatSDKError {
    JsonError(String),
    InvalidArgument(String),
    NotFound(String),
    Other(String),
    // 传输层错误（fetch / send 网络失败）
    Transport(String),
    // 实时事件负载缺字段 / 形状非法
    MalformedEvent(String),
    // 事件引用的会话不在缓存中（良性，不上抛给用户）
    ScopeNotFound(String),
    InvalidOperation(String),
    Timeout(String),
    // SDK 相关错误
    Config(String),         // 配置错误
    NotInitialized(String), // 未初始化错误
    // 发送重试次数耗尽（终态 failed）
    RetryExhausted {
        local_message_id: String,
        attempts: u32,
    },
}

impl fmt::Display for WorkchatSDKError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkchatSDKError::JsonError(e) => write!(f, "JSON error: {}", e),
            WorkchatSDKError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            WorkchatSDKError::NotFound(e) => write!(f, "Not found: {}", e),
            WorkchatSDKError::Other(e) => write!(f, "Other error: {}", e),
            WorkchatSDKError::Transport(e) => write!(f, "Transport error: {}", e),
            WorkchatSDKError::MalformedEvent(e) => write!(f, "Malformed event: {}", e),
            WorkchatSDKError::ScopeNotFound(e) => write!(f, "Scope not found: {}", e),
            WorkchatSDKError::InvalidOperation(e) => write!(f, "Invalid operation: {}", e),
            WorkchatSDKError::Timeout(e) => write!(f, "Timeout: {}", e),
            WorkchatSDKError::Config(e) => write!(f, "Config error: {}", e),
            WorkchatSDKError::NotInitialized(e) => write!(f, "Not initialized: {}", e),
            WorkchatSDKError::RetryExhausted {
                local_message_id,
                attempts,
            } => {
                write!(
                    f,
                    "Retry exhausted for {} after {} attempts",
                    local_message_id, attempts
                )
            }
        }
    }
}

impl std::error::Error for WorkchatSDKError {}

impl From<serde_json::Error> for WorkchatSDKError {
    fn from(error: serde_json::Error) -> Self {
        WorkchatSDKError::JsonError(error.to_string())
    }
}

impl WorkchatSDKError {
    /// 判断是否属于良性 no-op 类错误（不上抛给用户，见错误传播策略）
    pub fn is_benign(&self) -> bool {
        matches!(self, WorkchatSDKError::ScopeNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, WorkchatSDKError>;
