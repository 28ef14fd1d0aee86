//! 重试引擎
//!
//! 根据处理结果决定确认、延迟重新入队或进入死信队列，并通过发布者执行。
//! 重新入队是一次新的发布（retry_count 加一，经延迟交换机），而不是 Broker 原生的 requeue。
//! 无论发布是否成功，原始投递都由消费者确认；发布失败只记录错误，该消息不再重试。

use std::sync::Arc;
use std::time::Duration;

use notify_shared::amqp::MessagePublisher;
use notify_shared::message::Message;
use notify_shared::observability::metrics as obs;
use notify_shared::retry::RetryPolicy;
use tracing::{error, info, warn};

use crate::handler::{FailureReason, ProcessingResult};

/// 重试次数耗尽时的死信原因
pub const REASON_RETRIES_EXHAUSTED: &str = "retries_exhausted";

/// 处理结果对应的去向
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue { retry_count: u32, delay: Duration },
    DeadLetter { reason: &'static str },
}

impl Disposition {
    /// 用于 `notifications_processed_total` 的 outcome 标签
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Ack => "success",
            Self::Requeue { .. } => "retried",
            Self::DeadLetter { .. } => "dead_lettered",
        }
    }
}

pub struct RetryEngine {
    publisher: Arc<dyn MessagePublisher>,
    policy: RetryPolicy,
}

impl RetryEngine {
    pub fn new(publisher: Arc<dyn MessagePublisher>, policy: RetryPolicy) -> Self {
        Self { publisher, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 纯决策，不产生任何副作用
    ///
    /// 延迟按递增前的 retry_count 计算。
    pub fn decide(&self, message: &Message, result: &ProcessingResult) -> Disposition {
        if result.is_success() {
            return Disposition::Ack;
        }

        if !result.is_retryable() {
            let reason = result
                .reason()
                .map(|r| r.as_str())
                .unwrap_or(FailureReason::Delivery.as_str());
            return Disposition::DeadLetter { reason };
        }

        if !self.policy.should_retry(message.retry_count) {
            return Disposition::DeadLetter {
                reason: REASON_RETRIES_EXHAUSTED,
            };
        }

        Disposition::Requeue {
            retry_count: message.retry_count.saturating_add(1),
            delay: self.policy.jittered_delay(message.retry_count),
        }
    }

    /// 决策并执行发布
    ///
    /// `routing_key` 为消息来源队列对应的通知类型。
    pub async fn apply(
        &self,
        routing_key: &str,
        message: &Message,
        result: &ProcessingResult,
    ) -> Disposition {
        let disposition = self.decide(message, result);

        match &disposition {
            Disposition::Ack => {}
            Disposition::Requeue { retry_count, delay } => {
                let next = message.next_attempt();
                warn!(
                    next_retry_count = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    failed_items = ?result.failed_items(),
                    error = result.error().unwrap_or_default(),
                    "处理失败，延迟后重试"
                );
                match self
                    .publisher
                    .publish_with_delay(routing_key, &next, *delay)
                    .await
                {
                    Ok(()) => obs::record_retried(routing_key),
                    Err(e) => error!(error = %e, "重新入队失败，消息丢失"),
                }
            }
            Disposition::DeadLetter { reason } => {
                warn!(
                    reason,
                    failed_items = ?result.failed_items(),
                    error = result.error().unwrap_or_default(),
                    "消息进入死信队列"
                );
                match self
                    .publisher
                    .publish_to_dead_letter(routing_key, message)
                    .await
                {
                    Ok(()) => obs::record_dead_lettered(routing_key, reason),
                    Err(e) => error!(error = %e, "投递到死信队列失败，消息丢失"),
                }
            }
        }

        disposition
    }

    /// 无法解码的消息体原样进入来源队列对应的死信队列
    pub async fn dead_letter_undecodable(&self, routing_key: &str, body: &[u8]) -> Disposition {
        let reason = FailureReason::Decode.as_str();
        match self
            .publisher
            .publish_raw_to_dead_letter(routing_key, body)
            .await
        {
            Ok(()) => {
                info!(routing_key, bytes = body.len(), "无法解码的消息已进入死信队列");
                obs::record_dead_lettered(routing_key, reason);
            }
            Err(e) => error!(routing_key, error = %e, "投递到死信队列失败，消息丢失"),
        }
        Disposition::DeadLetter { reason }
    }
}
