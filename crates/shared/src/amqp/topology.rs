//! 拓扑声明
//!
//! 为每种通知类型声明主队列、死信队列及其绑定，所有类型共享一个延迟交换机与一个死信交换机。
//! 声明是幂等的：参数相同的重复声明不产生任何变化；与已有资源参数冲突则是致命配置错误，
//! 直接中止启动而不重试。声明延迟交换机前先确认 Broker 具备 x-delayed-message 能力。

use std::collections::BTreeMap;

use async_trait::async_trait;
use lapin::options::{
    ExchangeDeclareOptions, ExchangeDeleteOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{Channel, ExchangeKind};
use tracing::{debug, info, warn};

use super::connection::ConnectionManager;
use crate::error::{NotifyError, Result};

/// 固定的交换机、队列与参数名称
pub mod names {
    pub const DELAY_EXCHANGE: &str = "notifications.delay";
    pub const DEAD_LETTER_EXCHANGE: &str = "notifications.dlx";
    pub const DELAYED_EXCHANGE_TYPE: &str = "x-delayed-message";
    pub const DELAY_HEADER: &str = "x-delay";

    pub const ARG_DELAYED_TYPE: &str = "x-delayed-type";
    pub const ARG_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
    pub const ARG_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

    /// 能力探测使用的临时交换机
    pub const PROBE_EXCHANGE: &str = "notifications.delay.probe";

    pub fn primary_queue(notification_type: &str) -> String {
        format!("notifications.{notification_type}")
    }

    pub fn dead_letter_queue(notification_type: &str) -> String {
        format!("notifications.{notification_type}.dlq")
    }
}

// ---------------------------------------------------------------------------
// 声明描述
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    /// x-delayed-message，底层按 direct 路由
    Delayed,
    Direct,
}

/// 交换机声明（均为 durable）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDeclaration {
    pub name: String,
    pub kind: ExchangeType,
    pub arguments: BTreeMap<String, String>,
}

/// 队列声明（均为 durable）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub name: String,
    pub arguments: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueBinding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// 完整的拓扑计划，按声明顺序排列：交换机 → 队列 → 绑定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    pub exchanges: Vec<ExchangeDeclaration>,
    pub queues: Vec<QueueDeclaration>,
    pub bindings: Vec<QueueBinding>,
}

impl TopologyPlan {
    pub fn for_types<S: AsRef<str>>(notification_types: &[S]) -> Self {
        let exchanges = vec![
            ExchangeDeclaration {
                name: names::DELAY_EXCHANGE.to_string(),
                kind: ExchangeType::Delayed,
                arguments: BTreeMap::from([(
                    names::ARG_DELAYED_TYPE.to_string(),
                    "direct".to_string(),
                )]),
            },
            ExchangeDeclaration {
                name: names::DEAD_LETTER_EXCHANGE.to_string(),
                kind: ExchangeType::Direct,
                arguments: BTreeMap::new(),
            },
        ];

        let mut queues = Vec::with_capacity(notification_types.len() * 2);
        let mut bindings = Vec::with_capacity(notification_types.len() * 2);

        for notification_type in notification_types {
            let notification_type = notification_type.as_ref();
            let primary = names::primary_queue(notification_type);
            let dead_letter = names::dead_letter_queue(notification_type);

            queues.push(QueueDeclaration {
                name: primary.clone(),
                arguments: BTreeMap::from([
                    (
                        names::ARG_DEAD_LETTER_EXCHANGE.to_string(),
                        names::DEAD_LETTER_EXCHANGE.to_string(),
                    ),
                    (
                        names::ARG_DEAD_LETTER_ROUTING_KEY.to_string(),
                        notification_type.to_string(),
                    ),
                ]),
            });
            queues.push(QueueDeclaration {
                name: dead_letter.clone(),
                arguments: BTreeMap::new(),
            });

            bindings.push(QueueBinding {
                queue: primary,
                exchange: names::DELAY_EXCHANGE.to_string(),
                routing_key: notification_type.to_string(),
            });
            bindings.push(QueueBinding {
                queue: dead_letter,
                exchange: names::DEAD_LETTER_EXCHANGE.to_string(),
                routing_key: notification_type.to_string(),
            });
        }

        Self {
            exchanges,
            queues,
            bindings,
        }
    }
}

// ---------------------------------------------------------------------------
// TopologyBackend：声明操作的抽象
// ---------------------------------------------------------------------------

/// 拓扑声明后端
///
/// 生产环境由 `AmqpTopology` 实现；测试中可替换为内存实现或 mock。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopologyBackend: Send + Sync {
    /// Broker 是否支持延迟交换机
    async fn supports_delayed_exchange(&self) -> Result<bool>;

    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<()>;

    async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<()>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<()>;
}

// ---------------------------------------------------------------------------
// TopologyManager
// ---------------------------------------------------------------------------

pub struct TopologyManager<B> {
    backend: B,
    notification_types: Vec<String>,
}

impl<B: TopologyBackend> TopologyManager<B> {
    pub fn new(backend: B, notification_types: Vec<String>) -> Self {
        Self {
            backend,
            notification_types,
        }
    }

    pub fn plan(&self) -> TopologyPlan {
        TopologyPlan::for_types(&self.notification_types)
    }

    /// 声明全部拓扑
    ///
    /// 缺少延迟交换机能力或声明冲突都会返回错误，调用方应中止启动。
    pub async fn setup_topology(&self) -> Result<()> {
        if !self.backend.supports_delayed_exchange().await? {
            return Err(NotifyError::DelayedExchangeUnavailable);
        }

        let plan = self.plan();

        for exchange in &plan.exchanges {
            self.backend.declare_exchange(exchange).await?;
            debug!(exchange = %exchange.name, kind = ?exchange.kind, "交换机已声明");
        }
        for queue in &plan.queues {
            self.backend.declare_queue(queue).await?;
            debug!(queue = %queue.name, "队列已声明");
        }
        for binding in &plan.bindings {
            self.backend.bind_queue(binding).await?;
            debug!(
                queue = %binding.queue,
                exchange = %binding.exchange,
                routing_key = %binding.routing_key,
                "队列已绑定"
            );
        }

        info!(
            notification_types = ?self.notification_types,
            exchanges = plan.exchanges.len(),
            queues = plan.queues.len(),
            bindings = plan.bindings.len(),
            "消息拓扑声明完成"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AmqpTopology：基于 lapin 的实现
// ---------------------------------------------------------------------------

pub struct AmqpTopology {
    manager: ConnectionManager,
    channel: Channel,
}

impl AmqpTopology {
    pub async fn open(manager: &ConnectionManager) -> Result<Self> {
        let channel = manager.channel().await?;
        Ok(Self {
            manager: manager.clone(),
            channel,
        })
    }
}

fn field_table(arguments: &BTreeMap<String, String>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments {
        table.insert(
            ShortString::from(key.clone()),
            AMQPValue::LongString(LongString::from(value.clone())),
        );
    }
    table
}

fn exchange_kind(kind: ExchangeType) -> ExchangeKind {
    match kind {
        ExchangeType::Delayed => ExchangeKind::Custom(names::DELAYED_EXCHANGE_TYPE.to_string()),
        ExchangeType::Direct => ExchangeKind::Direct,
    }
}

/// 参数与已有资源冲突时 Broker 返回 406 PRECONDITION_FAILED
fn map_declare_error(resource: &str, err: lapin::Error) -> NotifyError {
    if let lapin::Error::ProtocolError(amqp_error) = &err
        && matches!(
            amqp_error.kind(),
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
        )
    {
        return NotifyError::TopologyConflict {
            resource: resource.to_string(),
            reason: err.to_string(),
        };
    }
    NotifyError::Broker(err)
}

#[async_trait]
impl TopologyBackend for AmqpTopology {
    /// 在独立连接上声明一个临时的延迟交换机
    ///
    /// 未知交换机类型会触发连接级错误，因此不能在主连接上探测。
    async fn supports_delayed_exchange(&self) -> Result<bool> {
        let connection = self.manager.open_detached().await?;
        let channel = connection.create_channel().await?;

        let probe = ExchangeDeclaration {
            name: names::PROBE_EXCHANGE.to_string(),
            kind: ExchangeType::Delayed,
            arguments: BTreeMap::from([(names::ARG_DELAYED_TYPE.to_string(), "direct".to_string())]),
        };
        let result = channel
            .exchange_declare(
                &probe.name,
                exchange_kind(probe.kind),
                ExchangeDeclareOptions {
                    auto_delete: true,
                    ..ExchangeDeclareOptions::default()
                },
                field_table(&probe.arguments),
            )
            .await;

        let supported = match result {
            Ok(()) => {
                let _ = channel
                    .exchange_delete(&probe.name, ExchangeDeleteOptions::default())
                    .await;
                true
            }
            Err(lapin::Error::ProtocolError(e)) => {
                warn!(error = %e, "Broker 拒绝声明 x-delayed-message 交换机");
                false
            }
            Err(e) => {
                let _ = connection.close(200, "probe failed").await;
                return Err(e.into());
            }
        };

        let _ = connection.close(200, "probe finished").await;
        Ok(supported)
    }

    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<()> {
        self.channel
            .exchange_declare(
                &exchange.name,
                exchange_kind(exchange.kind),
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                field_table(&exchange.arguments),
            )
            .await
            .map_err(|e| map_declare_error(&exchange.name, e))
    }

    async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<()> {
        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                field_table(&queue.arguments),
            )
            .await
            .map(|_| ())
            .map_err(|e| map_declare_error(&queue.name, e))
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<()> {
        self.channel
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| map_declare_error(&binding.queue, e))
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
