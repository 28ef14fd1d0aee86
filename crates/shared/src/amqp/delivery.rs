//! 入站投递
//!
//! 消费者独占未确认的投递句柄，Handler 与 Provider 只看到解码后的消息。

use async_trait::async_trait;
use lapin::message::Delivery;
use lapin::options::BasicAckOptions;

use crate::error::Result;

/// 一条尚未确认的投递
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    /// 原始消息体
    fn body(&self) -> &[u8];

    /// 投递时使用的路由键
    fn routing_key(&self) -> &str;

    /// 是否为 Broker 的重复投递（例如连接断开前未确认）
    fn redelivered(&self) -> bool;

    /// 确认投递
    async fn ack(&self) -> Result<()>;
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn body(&self) -> &[u8] {
        &self.data
    }

    fn routing_key(&self) -> &str {
        self.routing_key.as_str()
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(&self) -> Result<()> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }
}
