//! 共享库
//!
//! 包含通知分发服务共用的配置、错误处理、消息模型、重试策略、可观测性
//! 以及 RabbitMQ（AMQP）基础设施代码。

pub mod amqp;
pub mod config;
pub mod error;
pub mod message;
pub mod observability;
pub mod retry;
pub mod test_utils;
