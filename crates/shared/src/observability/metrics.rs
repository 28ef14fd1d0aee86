//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标与健康检查通过独立的 HTTP 端口暴露。

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, http::StatusCode, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::amqp::ConnectionState;
use crate::config::AppConfig;

/// 指标名称
pub mod names {
    pub const PROCESSED_TOTAL: &str = "notifications_processed_total";
    pub const RETRIED_TOTAL: &str = "notifications_retried_total";
    pub const DEAD_LETTERED_TOTAL: &str = "notifications_dead_lettered_total";
    pub const PROCESSING_DURATION_SECONDS: &str = "notification_processing_duration_seconds";
    pub const IN_FLIGHT: &str = "notifications_in_flight";
    pub const BROKER_RECONNECTS_TOTAL: &str = "broker_reconnects_total";
}

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出，并在 `server` 配置的地址上启动 HTTP 服务器
pub async fn init(
    config: &AppConfig,
    connection_state: watch::Receiver<ConnectionState>,
) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metrics(&config.service_name);

    let addr: SocketAddr = config.server_addr().parse()?;
    let server_handle = start_metrics_server(addr, handle, connection_state).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn register_metrics(service_name: &str) {
    metrics::describe_counter!(
        names::PROCESSED_TOTAL,
        "Total number of processed notifications by outcome"
    );
    metrics::describe_counter!(
        names::RETRIED_TOTAL,
        "Total number of notifications republished for retry"
    );
    metrics::describe_counter!(
        names::DEAD_LETTERED_TOTAL,
        "Total number of notifications routed to a dead-letter queue"
    );
    metrics::describe_histogram!(
        names::PROCESSING_DURATION_SECONDS,
        "Notification processing duration in seconds"
    );
    metrics::describe_gauge!(
        names::IN_FLIGHT,
        "Number of unacknowledged deliveries being processed"
    );
    metrics::describe_counter!(
        names::BROKER_RECONNECTS_TOTAL,
        "Total number of successful broker reconnects"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// Broker 连接正常时健康
pub fn health_status(state: ConnectionState) -> StatusCode {
    match state {
        ConnectionState::Connected => StatusCode::OK,
        ConnectionState::Disconnected | ConnectionState::Closed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn build_router(
    handle: PrometheusHandle,
    connection_state: watch::Receiver<ConnectionState>,
) -> Router {
    Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route(
            "/health",
            get(move || {
                let status = health_status(*connection_state.borrow());
                let body = if status.is_success() { "OK" } else { "UNAVAILABLE" };
                std::future::ready((status, body))
            }),
        )
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
    connection_state: watch::Receiver<ConnectionState>,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = build_router(handle, connection_state);

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一次处理结果
///
/// `outcome` 取值 `success` / `retried` / `dead_lettered`。
#[inline]
pub fn record_processed(notification_type: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        names::PROCESSED_TOTAL,
        "type" => notification_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        names::PROCESSING_DURATION_SECONDS,
        "type" => notification_type.to_string()
    )
    .record(duration_secs);
}

#[inline]
pub fn record_retried(notification_type: &str) {
    metrics::counter!(names::RETRIED_TOTAL, "type" => notification_type.to_string()).increment(1);
}

/// `reason` 取值 `retries_exhausted` / `non_retryable` / `decode_error` / `unknown_type`
#[inline]
pub fn record_dead_lettered(notification_type: &str, reason: &str) {
    metrics::counter!(
        names::DEAD_LETTERED_TOTAL,
        "type" => notification_type.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[inline]
pub fn set_in_flight(count: usize) {
    metrics::gauge!(names::IN_FLIGHT).set(count as f64);
}

#[inline]
pub fn record_reconnect() {
    metrics::counter!(names::BROKER_RECONNECTS_TOTAL).increment(1);
}
