//! 投递渠道
//!
//! `DeliveryProvider` 是处理链路对外部渠道的唯一依赖：一次调用对应一个收件人，
//! 失败以 `ProviderError` 值返回并标明是否可重试。当前提供模拟实现（仅记录日志），
//! 替换为真实 SDK 时只需实现同一 trait。

pub mod email;
pub mod sms;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use email::SimulatedEmailProvider;
pub use sms::SimulatedSmsProvider;

/// 渠道错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    // ==================== 暂时性错误（可重试） ====================
    #[error("渠道请求超时: {0}")]
    Timeout(String),

    #[error("渠道服务端错误: status={status}, {message}")]
    Server { status: u16, message: String },

    #[error("渠道限流")]
    RateLimited,

    #[error("渠道网络错误: {0}")]
    Network(String),

    // ==================== 永久性错误（不可重试） ====================
    #[error("收件人无效: {0}")]
    InvalidRecipient(String),

    #[error("渠道认证失败: {0}")]
    Authentication(String),

    #[error("内容被拒绝: {0}")]
    ContentRejected(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Server { .. } | Self::RateLimited | Self::Network(_)
        )
    }
}

/// 发送内容
#[derive(Debug, Clone, PartialEq)]
pub enum SendContent {
    Text(String),
    Template {
        subject: String,
        template_name: String,
        variables: HashMap<String, Value>,
        from_address: Option<String>,
    },
}

/// 单个收件人的发送请求
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    /// 所属通知的 ID
    pub notification_id: String,
    pub recipient: String,
    pub content: SendContent,
}

/// 单个收件人的发送结果
#[derive(Debug, Clone, PartialEq)]
pub struct SendResult {
    pub recipient: String,
    pub success: bool,
    /// 渠道返回的消息标识，用于追踪投递状态
    pub message_id: Option<String>,
    pub error: Option<ProviderError>,
}

impl SendResult {
    pub fn delivered(recipient: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failed(recipient: impl Into<String>, error: ProviderError) -> Self {
        Self {
            recipient: recipient.into(),
            success: false,
            message_id: None,
            error: Some(error),
        }
    }
}

/// 投递渠道 trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// 渠道名称，用于日志
    fn channel(&self) -> &'static str;

    /// 发送给单个收件人
    async fn send(&self, request: &SendRequest) -> SendResult;

    /// 批量发送，按输入顺序逐一返回结果
    async fn send_batch(&self, requests: &[SendRequest]) -> Vec<SendResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.send(request).await);
        }
        results
    }

    /// 渠道不可用时返回错误
    async fn health_check(&self) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Timeout("5s".to_string()).is_retryable());
        assert!(
            ProviderError::Server {
                status: 503,
                message: "unavailable".to_string()
            }
            .is_retryable()
        );
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::Network("reset".to_string()).is_retryable());

        assert!(!ProviderError::InvalidRecipient("+1".to_string()).is_retryable());
        assert!(!ProviderError::Authentication("bad key".to_string()).is_retryable());
        assert!(!ProviderError::ContentRejected("spam".to_string()).is_retryable());
    }

    #[test]
    fn test_send_result_constructors() {
        let ok = SendResult::delivered("+14155550100", "sm-1");
        assert!(ok.success);
        assert_eq!(ok.message_id.as_deref(), Some("sm-1"));
        assert!(ok.error.is_none());

        let failed = SendResult::failed("+14155550100", ProviderError::RateLimited);
        assert!(!failed.success);
        assert!(failed.message_id.is_none());
        assert_eq!(failed.error, Some(ProviderError::RateLimited));
    }
}
