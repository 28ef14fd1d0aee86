//! RabbitMQ（AMQP 0-9-1）基础设施
//!
//! - `connection`：单连接管理与断线重连
//! - `topology`：交换机 / 队列 / 绑定声明
//! - `publisher`：立即、延迟与死信发布
//! - `delivery`：入站投递抽象

pub mod connection;
pub mod delivery;
pub mod publisher;
pub mod topology;

pub use connection::{ConnectionManager, ConnectionState};
pub use delivery::InboundDelivery;
pub use publisher::{AmqpPublisher, MessagePublisher};
pub use topology::{AmqpTopology, TopologyBackend, TopologyManager, TopologyPlan, names};
