//! 通知处理器
//!
//! 每种通知类型一个 Handler：先校验负载，再按收件人拆分为 `SendRequest`
//! 调用渠道，最后把逐个收件人的结果折叠为一个 `ProcessingResult`。

pub mod email;
pub mod sms;

use std::fmt;

use async_trait::async_trait;
use notify_shared::message::Message;

use crate::error::NotificationError;
use crate::provider::{SendRequest, SendResult};

pub use email::EmailHandler;
pub use sms::SmsHandler;

/// 失败原因，决定死信指标的 reason 标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Decode,
    UnknownType,
    Validation,
    Delivery,
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decode => "decode_error",
            Self::UnknownType => "unknown_type",
            Self::Validation => "validation",
            Self::Delivery => "delivery",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Failure {
    reason: FailureReason,
    retryable: bool,
    failed_items: Vec<String>,
    error: String,
}

/// 一次处理的结果
///
/// 成功的结果不携带任何失败项；字段私有，只能通过构造函数创建。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingResult {
    failure: Option<Failure>,
}

impl ProcessingResult {
    pub fn success() -> Self {
        Self { failure: None }
    }

    pub fn failure(
        reason: FailureReason,
        retryable: bool,
        failed_items: Vec<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            failure: Some(Failure {
                reason,
                retryable,
                failed_items,
                error: error.into(),
            }),
        }
    }

    /// 不可重试的失败，直接进入死信队列
    pub fn permanent(reason: FailureReason, error: impl Into<String>) -> Self {
        Self::failure(reason, false, Vec::new(), error)
    }

    /// 可重试的失败
    pub fn transient(reason: FailureReason, error: impl Into<String>) -> Self {
        Self::failure(reason, true, Vec::new(), error)
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// 仅在失败时有意义
    pub fn is_retryable(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.retryable)
    }

    pub fn failed_items(&self) -> &[String] {
        self.failure
            .as_ref()
            .map(|f| f.failed_items.as_slice())
            .unwrap_or_default()
    }

    pub fn error(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.error.as_str())
    }

    pub fn reason(&self) -> Option<FailureReason> {
        self.failure.as_ref().map(|f| f.reason)
    }
}

impl From<NotificationError> for ProcessingResult {
    fn from(err: NotificationError) -> Self {
        let reason = match err {
            NotificationError::Decode(_) => FailureReason::Decode,
            _ => FailureReason::Validation,
        };
        Self::permanent(reason, err.to_string())
    }
}

/// 把逐个收件人的发送结果折叠为一个处理结果
///
/// 全部成功才算成功；只要有一个失败可重试，整条消息按可重试处理，
/// 重试时会重新发送给所有收件人，包括已经永久失败的收件人。
pub fn fold_send_results(requests: &[SendRequest], results: &[SendResult]) -> ProcessingResult {
    if results.len() != requests.len() {
        return ProcessingResult::transient(
            FailureReason::Delivery,
            format!(
                "渠道返回的结果数量不匹配: 请求 {} 个, 结果 {} 个",
                requests.len(),
                results.len()
            ),
        );
    }

    let failures: Vec<&SendResult> = results.iter().filter(|r| !r.success).collect();
    if failures.is_empty() {
        return ProcessingResult::success();
    }

    let retryable = failures
        .iter()
        .any(|r| r.error.as_ref().is_none_or(|e| e.is_retryable()));

    let error = failures
        .iter()
        .map(|r| match &r.error {
            Some(e) => format!("{}: {e}", r.recipient),
            None => format!("{}: 未知错误", r.recipient),
        })
        .collect::<Vec<_>>()
        .join("; ");

    ProcessingResult::failure(
        FailureReason::Delivery,
        retryable,
        failures.iter().map(|r| r.recipient.clone()).collect(),
        error,
    )
}

/// 通知处理器 trait
///
/// `handle` 只会在 `validate` 通过后被调用；处理器不接触投递句柄，也不负责确认。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// 负载结构校验，失败一律不可重试
    fn validate(&self, message: &Message) -> Result<(), NotificationError>;

    async fn handle(&self, message: &Message) -> ProcessingResult;
}
