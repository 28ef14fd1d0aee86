//! 统一错误处理模块
//!
//! 定义 Broker 基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 上层按 `category()` 决定处理边界：连接类错误交给重连循环，拓扑类错误中止启动，
//! 其余错误在重试引擎内被归类为处理结果，不会继续向外传播。

use thiserror::Error;

/// 错误分类
///
/// 与消息生命周期中的处理边界一一对应。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Broker 不可达或连接丢失，由重连退避恢复
    Connectivity,
    /// 拓扑冲突或缺少延迟交换机能力，启动即失败
    Topology,
    /// 发布失败，由重试引擎决定后续处理
    Publish,
    /// 配置错误，启动即失败
    Configuration,
    /// 其他内部错误
    Internal,
}

/// 系统错误类型
#[derive(Debug, Error)]
pub enum NotifyError {
    // ==================== 连接错误 ====================
    #[error("未连接到 RabbitMQ")]
    NotConnected,

    #[error("连接已关闭")]
    Closed,

    #[error("连接 RabbitMQ 失败: {0}")]
    Connection(String),

    #[error("AMQP 错误: {0}")]
    Broker(#[from] lapin::Error),

    // ==================== 拓扑错误 ====================
    #[error("Broker 未启用延迟交换机插件 (x-delayed-message)")]
    DelayedExchangeUnavailable,

    #[error("拓扑声明冲突: {resource} - {reason}")]
    TopologyConflict { resource: String, reason: String },

    // ==================== 发布错误 ====================
    #[error("发布消息失败: exchange={exchange}, routing_key={routing_key}, 原因={reason}")]
    Publish {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    #[error("延迟超出 32 位无符号范围: {delay_ms}ms")]
    DelayOutOfRange { delay_ms: u128 },

    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, NotifyError>;

impl NotifyError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::Closed => "CLOSED",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Broker(_) => "BROKER_ERROR",
            Self::DelayedExchangeUnavailable => "DELAYED_EXCHANGE_UNAVAILABLE",
            Self::TopologyConflict { .. } => "TOPOLOGY_CONFLICT",
            Self::Publish { .. } => "PUBLISH_ERROR",
            Self::DelayOutOfRange { .. } => "DELAY_OUT_OF_RANGE",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 错误所属的处理边界
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotConnected | Self::Closed | Self::Connection(_) | Self::Broker(_) => {
                ErrorCategory::Connectivity
            }
            Self::DelayedExchangeUnavailable | Self::TopologyConflict { .. } => {
                ErrorCategory::Topology
            }
            Self::Publish { .. } | Self::DelayOutOfRange { .. } | Self::Serialization(_) => {
                ErrorCategory::Publish
            }
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// 是否为可重试错误
    ///
    /// 连接类错误在重连后可恢复；已关闭的管理器不可恢复。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Connection(_) | Self::Broker(_) | Self::Publish { .. }
        )
    }
}
