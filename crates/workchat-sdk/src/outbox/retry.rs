//! 发送失败分类与重试策略

use serde::{Deserialize, Serialize};

use crate::error::WorkchatSDKError;

/// 发送失败原因分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SendFailureReason {
    /// 网络超时 - 可重试
    NetworkTimeout,
    /// 网络不可用 - 等待恢复后重试
    NetworkUnavailable,
    /// 服务端错误 - 根据错误码决定
    ServerError(u16),
    /// 限流 - 延迟重试
    RateLimited,
    /// 消息过大 - 不重试
    MessageTooLarge,
    /// 权限不足 - 不重试
    Forbidden,
    /// 未知错误
    Unknown(String),
}

impl SendFailureReason {
    /// 判断是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            SendFailureReason::NetworkTimeout => true,
            SendFailureReason::NetworkUnavailable => true,
            SendFailureReason::ServerError(code) => {
                // 5xx 服务端错误可重试，4xx 客户端错误不重试
                *code >= 500 && *code < 600
            }
            SendFailureReason::RateLimited => true,
            SendFailureReason::MessageTooLarge => false,
            SendFailureReason::Forbidden => false,
            SendFailureReason::Unknown(_) => true, // 保守策略：未知错误可重试
        }
    }

    /// 获取重试延迟倍数
    pub fn delay_multiplier(&self) -> f64 {
        match self {
            SendFailureReason::NetworkTimeout => 1.0,
            SendFailureReason::NetworkUnavailable => 2.0,
            SendFailureReason::ServerError(_) => 1.5,
            SendFailureReason::RateLimited => 3.0, // 限流需要更长延迟
            _ => 1.0,
        }
    }
}

impl From<&WorkchatSDKError> for SendFailureReason {
    fn from(error: &WorkchatSDKError) -> Self {
        match error {
            WorkchatSDKError::Timeout(_) => SendFailureReason::NetworkTimeout,
            WorkchatSDKError::Transport(msg) => {
                if msg.contains("timeout") {
                    SendFailureReason::NetworkTimeout
                } else if msg.contains("unavailable") || msg.contains("connection") {
                    SendFailureReason::NetworkUnavailable
                } else {
                    SendFailureReason::Unknown(msg.clone())
                }
            }
            other => SendFailureReason::Unknown(other.to_string()),
        }
    }
}

/// 重试策略配置
///
/// 重试由用户显式触发，策略只决定是否允许以及重派前的退避延迟。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大发送尝试轮数（首次发送 + 重试）
    pub max_attempts: u32,
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// 检查是否还允许重试
    pub fn should_retry(&self, attempts: u32, failure_reason: &SendFailureReason) -> bool {
        attempts < self.max_attempts && failure_reason.is_retryable()
    }

    /// 计算重派前的退避延迟（指数退避 + 随机抖动）
    pub fn next_delay_ms(&self, attempts: u32, failure_reason: &SendFailureReason) -> u64 {
        let backoff = self.base_delay_ms as f64 * 2f64.powf(attempts.saturating_sub(1) as f64);
        let adjusted = backoff * failure_reason.delay_multiplier();
        // 95%-105% 的随机抖动，避免所有重试同时发出
        let jitter = rand::random::<f64>() * 0.1 + 0.95;
        ((adjusted * jitter) as u64).min(self.max_delay_ms)
    }
}
