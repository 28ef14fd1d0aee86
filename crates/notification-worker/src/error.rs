//! 通知服务错误类型
//!
//! 覆盖消息解码、负载校验与启动期的注册错误。
//! 投递渠道的失败以 `ProviderError` 值的形式返回，不经过这里。

use notify_shared::error::NotifyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("通知反序列化失败: {0}")]
    Decode(String),

    #[error("通知校验失败: 字段={field}, 原因={message}")]
    Validation { field: String, message: String },

    #[error("通知类型重复注册: {0}")]
    DuplicateHandler(String),

    #[error("地址校验规则无效: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error(transparent)]
    Shared(#[from] NotifyError),
}

impl NotificationError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
