//! 统一可观测性模块
//!
//! 提供 logging 与 metrics 的统一初始化。
//! 服务通过单一入口点完成初始化，确保一致的日志格式和指标命名。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;
use tokio::sync::watch;

use crate::amqp::ConnectionState;
use crate::config::AppConfig;

/// 可观测性资源守卫
///
/// 持有指标服务器的生命周期，Drop 时记录关闭日志。
pub struct ObservabilityGuard {
    _metrics_handle: Option<metrics::MetricsHandle>,
}

impl ObservabilityGuard {
    /// 创建一个空的 Guard（用于测试或禁用指标时）
    pub fn empty() -> Self {
        Self {
            _metrics_handle: None,
        }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（结构化日志）
/// 2. Metrics（Prometheus 指标与 `/health`）
///
/// `connection_state` 用于 `/health`：Broker 连接正常时返回 200，否则 503。
pub async fn init(
    config: &AppConfig,
    connection_state: watch::Receiver<ConnectionState>,
) -> Result<ObservabilityGuard> {
    tracing::init(&config.observability)?;

    info!(
        service = %config.service_name,
        environment = %config.environment,
        log_format = %config.observability.log_format,
        "Observability initialized"
    );

    if !config.observability.metrics_enabled {
        info!("指标导出已禁用");
        return Ok(ObservabilityGuard::empty());
    }

    let metrics_handle = metrics::init(config, connection_state).await?;

    Ok(ObservabilityGuard {
        _metrics_handle: Some(metrics_handle),
    })
}
