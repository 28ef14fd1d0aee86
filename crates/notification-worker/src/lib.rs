//! 通知分发服务
//!
//! 从 RabbitMQ 消费通知请求，按类型分发给各渠道处理器，
//! 失败时按指数退避延迟重试，重试耗尽或不可重试时进入死信队列。

pub mod app;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod provider;
pub mod retry_engine;
pub mod router;
