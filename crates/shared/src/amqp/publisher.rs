//! 消息发布
//!
//! 三种出口：立即投递（经延迟交换机，无延迟头）、延迟投递（带 `x-delay` 头）
//! 以及直接投递到死信交换机。所有消息均为持久化消息。
//! 发布失败直接返回给调用方，不在内部重试。

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel};
use tokio::sync::Mutex;
use tracing::debug;

use super::connection::ConnectionManager;
use super::topology::names;
use crate::error::{NotifyError, Result};
use crate::message::Message;

/// 持久化投递模式
const PERSISTENT: u8 = 2;
const CONTENT_TYPE_JSON: &str = "application/json";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// 立即投递到类型对应的主队列
    async fn publish(&self, notification_type: &str, message: &Message) -> Result<()>;

    /// 延迟投递；`delay` 为零时等同于立即投递
    async fn publish_with_delay(
        &self,
        notification_type: &str,
        message: &Message,
        delay: Duration,
    ) -> Result<()>;

    /// 绕过延迟路径，直接投递到类型对应的死信队列
    async fn publish_to_dead_letter(&self, notification_type: &str, message: &Message)
    -> Result<()>;

    /// 将无法解码的原始消息体投递到死信队列
    async fn publish_raw_to_dead_letter(&self, notification_type: &str, body: &[u8])
    -> Result<()>;
}

/// 将延迟转换为 `x-delay` 头的毫秒值
///
/// 零延迟不设置头部；超出 32 位无符号范围返回错误，由调用方负责封顶。
pub fn delay_header_millis(delay: Duration) -> Result<Option<u32>> {
    let delay_ms = delay.as_millis();
    if delay_ms == 0 {
        return Ok(None);
    }
    u32::try_from(delay_ms)
        .map(Some)
        .map_err(|_| NotifyError::DelayOutOfRange { delay_ms })
}

/// 构造消息属性：持久化、JSON 内容类型，按需附带延迟头
pub fn message_properties(message_id: Option<&str>, delay: Duration) -> Result<BasicProperties> {
    let mut properties = BasicProperties::default()
        .with_delivery_mode(PERSISTENT)
        .with_content_type(ShortString::from(CONTENT_TYPE_JSON.to_string()));

    if let Some(id) = message_id {
        properties = properties.with_message_id(ShortString::from(id.to_string()));
    }

    if let Some(delay_ms) = delay_header_millis(delay)? {
        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from(names::DELAY_HEADER.to_string()),
            AMQPValue::LongLongInt(i64::from(delay_ms)),
        );
        properties = properties.with_headers(headers);
    }

    Ok(properties)
}

// ---------------------------------------------------------------------------
// AmqpPublisher
// ---------------------------------------------------------------------------

/// 可复用 channel 的缓存
///
/// 重建期间持有锁，并发发布在缓存失效时只会打开一个新的 channel。
struct ChannelCache<C> {
    slot: Mutex<Option<C>>,
}

impl<C: Clone> ChannelCache<C> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    async fn get_or_open<U, F, Fut>(&self, usable: U, open: F) -> Result<C>
    where
        U: Fn(&C) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref()
            && usable(cached)
        {
            return Ok(cached.clone());
        }

        let opened = open().await?;
        *slot = Some(opened.clone());
        Ok(opened)
    }

    async fn invalidate(&self) {
        self.slot.lock().await.take();
    }
}

/// 基于 lapin 的发布者
///
/// 复用一个开启了 publisher confirm 的 channel；channel 失效时在下一次发布时重建。
/// Broker 返回 nack 视为发布失败。
pub struct AmqpPublisher {
    manager: ConnectionManager,
    channel: ChannelCache<Channel>,
}

impl AmqpPublisher {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            channel: ChannelCache::new(),
        }
    }

    async fn confirm_channel(&self) -> Result<Channel> {
        self.channel
            .get_or_open(
                |channel| channel.status().connected(),
                || async {
                    let channel = self.manager.channel().await?;
                    channel
                        .confirm_select(ConfirmSelectOptions::default())
                        .await?;
                    Ok(channel)
                },
            )
            .await
    }

    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<()> {
        let publish_error = |reason: String| NotifyError::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            reason,
        };

        let channel = self.confirm_channel().await?;

        let confirm = match channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
        {
            Ok(confirm) => confirm,
            Err(e) => {
                self.channel.invalidate().await;
                return Err(publish_error(e.to_string()));
            }
        };

        let confirmation = match confirm.await {
            Ok(confirmation) => confirmation,
            Err(e) => {
                self.channel.invalidate().await;
                return Err(publish_error(e.to_string()));
            }
        };

        if confirmation.is_nack() {
            return Err(publish_error("broker nack".to_string()));
        }

        debug!(exchange, routing_key, bytes = body.len(), "消息已发布");
        Ok(())
    }
}

#[async_trait]
impl MessagePublisher for AmqpPublisher {
    async fn publish(&self, notification_type: &str, message: &Message) -> Result<()> {
        self.publish_with_delay(notification_type, message, Duration::ZERO)
            .await
    }

    async fn publish_with_delay(
        &self,
        notification_type: &str,
        message: &Message,
        delay: Duration,
    ) -> Result<()> {
        let properties = message_properties(Some(message.id.as_str()), delay)?;
        let body = message.encode()?;
        self.send(names::DELAY_EXCHANGE, notification_type, &body, properties)
            .await
    }

    async fn publish_to_dead_letter(
        &self,
        notification_type: &str,
        message: &Message,
    ) -> Result<()> {
        let properties = message_properties(Some(message.id.as_str()), Duration::ZERO)?;
        let body = message.encode()?;
        self.send(
            names::DEAD_LETTER_EXCHANGE,
            notification_type,
            &body,
            properties,
        )
        .await
    }

    async fn publish_raw_to_dead_letter(
        &self,
        notification_type: &str,
        body: &[u8],
    ) -> Result<()> {
        let properties = message_properties(None, Duration::ZERO)?;
        self.send(names::DEAD_LETTER_EXCHANGE, notification_type, body, properties)
            .await
    }
}
