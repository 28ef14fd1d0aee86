//! 通知分发服务
//!
//! 启动顺序：配置 → 可观测性 → 连接 → 拓扑 → 消费；
//! 收到关闭信号后停止接收新消息，等待处理中的消息完成后关闭连接。

use std::sync::Arc;

use notification_worker::app::{SERVICE_NAME, build_router};
use notification_worker::consumer::{Consumer, DeliveryProcessor};
use notification_worker::retry_engine::RetryEngine;
use notify_shared::amqp::{
    AmqpPublisher, AmqpTopology, ConnectionManager, MessagePublisher, TopologyManager,
};
use notify_shared::config::AppConfig;
use notify_shared::observability;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let manager = ConnectionManager::new(
        config.rabbitmq.url.clone(),
        config.rabbitmq.reconnect_backoff(),
    );
    let _guard = observability::init(&config, manager.subscribe()).await?;

    info!(
        environment = %config.environment,
        notification_types = ?config.notification_types,
        prefetch = config.rabbitmq.prefetch,
        "Starting notification-worker..."
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    manager.connect(shutdown_rx.clone()).await?;

    let topology = AmqpTopology::open(&manager).await?;
    TopologyManager::new(topology, config.notification_types.clone())
        .setup_topology()
        .await?;

    let router = Arc::new(build_router(&config)?);
    let publisher: Arc<dyn MessagePublisher> = Arc::new(AmqpPublisher::new(manager.clone()));
    let processor = Arc::new(DeliveryProcessor::new(
        router,
        RetryEngine::new(publisher, config.retry.policy()),
    ));

    let consumer = Consumer::new(
        manager.clone(),
        processor,
        config.notification_types.clone(),
        config.rabbitmq.prefetch,
    );
    let handle = consumer.handle();
    let mut consumer_task = tokio::spawn(consumer.start(shutdown_rx));

    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut consumer_task => {
            error!(?result, "消费者意外退出");
            manager.close().await?;
            anyhow::bail!("消费者意外退出");
        }
    }

    handle.stop();
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(config.shutdown_timeout(), &mut consumer_task).await {
        Ok(Ok(Ok(()))) => info!("处理中的消息已全部完成"),
        Ok(Ok(Err(e))) => warn!(error = %e, "消费者停止时出错"),
        Ok(Err(e)) => warn!(error = %e, "消费者任务异常结束"),
        Err(_) => {
            warn!(
                in_flight = handle.in_flight(),
                timeout_secs = config.shutdown_timeout_secs,
                "等待处理中的消息超时，强制关闭"
            );
            consumer_task.abort();
        }
    }

    manager.close().await?;
    info!("notification-worker stopped");
    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
