//! 通知消费者
//!
//! 在一个 channel 上订阅所有主队列，channel 级 prefetch 限制未确认投递数量，
//! 处理端再以同样的上限并发执行。每条投递无论结果如何都只确认一次：
//! 重试与死信都是新的发布，由重试引擎完成。
//!
//! 连接断开后消费流结束；未停止时等待连接恢复并重新订阅。

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use lapin::Channel;
use lapin::message::Delivery;
use lapin::options::{BasicConsumeOptions, BasicQosOptions};
use lapin::types::FieldTable;
use notify_shared::amqp::{ConnectionManager, ConnectionState, InboundDelivery, names};
use notify_shared::error::{NotifyError, Result};
use notify_shared::message::Message;
use notify_shared::observability::metrics as obs;
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::retry_engine::{Disposition, RetryEngine};
use crate::router::Router;

/// 订阅失败后重新尝试前的等待时间
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
const CONSUMER_TAG_PREFIX: &str = "notification-worker";

type TaggedDelivery = (Arc<str>, lapin::Result<Delivery>);

// ---------------------------------------------------------------------------
// DeliveryProcessor：单条投递的处理
// ---------------------------------------------------------------------------

struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
        obs::set_in_flight(current);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let current = self.0.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        obs::set_in_flight(current);
    }
}

/// 解码 → 分发 → 重试决策 → 确认
pub struct DeliveryProcessor {
    router: Arc<Router>,
    retry: RetryEngine,
    in_flight: AtomicUsize,
}

impl DeliveryProcessor {
    pub fn new(router: Arc<Router>, retry: RetryEngine) -> Self {
        Self {
            router,
            retry,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// 正在处理的投递数量
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 处理一条投递
    ///
    /// `notification_type` 为来源队列对应的类型，重试与死信都按它路由。
    pub async fn process<D>(&self, notification_type: &str, delivery: &D) -> Disposition
    where
        D: InboundDelivery + ?Sized,
    {
        let _guard = InFlightGuard::enter(&self.in_flight);
        let started = Instant::now();

        let disposition = match Message::decode(delivery.body()) {
            Ok(message) => {
                let span = info_span!(
                    "process_notification",
                    message_id = %message.id,
                    message_type = %message.notification_type,
                    correlation_id = message.correlation_id().unwrap_or_default(),
                    retry_count = message.retry_count,
                );
                async {
                    debug!(
                        routing_key = delivery.routing_key(),
                        redelivered = delivery.redelivered(),
                        "收到通知消息"
                    );
                    let result = self.router.dispatch(&message).await;
                    self.retry.apply(notification_type, &message, &result).await
                }
                .instrument(span)
                .await
            }
            Err(e) => {
                warn!(
                    notification_type,
                    routing_key = delivery.routing_key(),
                    error = %e,
                    "消息解码失败"
                );
                self.retry
                    .dead_letter_undecodable(notification_type, delivery.body())
                    .await
            }
        };

        if let Err(e) = delivery.ack().await {
            warn!(notification_type, error = %e, "确认投递失败，Broker 将重新投递");
        }

        obs::record_processed(
            notification_type,
            disposition.outcome(),
            started.elapsed().as_secs_f64(),
        );
        disposition
    }
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// 以不超过 `limit` 的并发处理投递流
///
/// `stop` 变为 `true` 后不再拉取新的投递，已开始处理的投递会完成后才返回。
pub async fn drive<S, D, E>(
    processor: &DeliveryProcessor,
    deliveries: S,
    limit: usize,
    stop: watch::Receiver<bool>,
) where
    S: Stream<Item = (Arc<str>, std::result::Result<D, E>)>,
    D: InboundDelivery,
    E: Display,
{
    deliveries
        .take_until(stopped(stop))
        .for_each_concurrent(Some(limit.max(1)), |(notification_type, delivery)| async move {
            match delivery {
                Ok(delivery) => {
                    processor.process(&notification_type, &delivery).await;
                }
                Err(e) => {
                    warn!(notification_type = %notification_type, error = %e, "消费流错误");
                }
            }
        })
        .await;
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// 停止消费并观察处理中数量
#[derive(Clone)]
pub struct ConsumerHandle {
    stop_tx: Arc<watch::Sender<bool>>,
    processor: Arc<DeliveryProcessor>,
}

impl ConsumerHandle {
    /// 停止接收新的投递，不中断处理中的投递
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub fn in_flight(&self) -> usize {
        self.processor.in_flight()
    }
}

pub struct Consumer {
    manager: ConnectionManager,
    processor: Arc<DeliveryProcessor>,
    notification_types: Vec<String>,
    prefetch: u16,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl Consumer {
    pub fn new(
        manager: ConnectionManager,
        processor: Arc<DeliveryProcessor>,
        notification_types: Vec<String>,
        prefetch: u16,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            manager,
            processor,
            notification_types,
            prefetch,
            stop_tx: Arc::new(stop_tx),
        }
    }

    pub fn handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            stop_tx: self.stop_tx.clone(),
            processor: self.processor.clone(),
        }
    }

    /// 开始消费，直到 `stop()` 被调用、`shutdown` 变为 `true` 或连接管理器关闭
    ///
    /// 返回时所有已开始处理的投递都已完成。
    pub async fn start(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.notification_types.is_empty() {
            return Err(NotifyError::Internal("没有可消费的通知类型".to_string()));
        }

        let stop_tx = self.stop_tx.clone();
        let forward = tokio::spawn(async move {
            if shutdown.wait_for(|stopped| *stopped).await.is_ok() {
                stop_tx.send_replace(true);
            }
        });

        self.run().await;
        forward.abort();

        info!("消费者已停止");
        Ok(())
    }

    async fn run(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut state_rx = self.manager.subscribe();

        loop {
            if *stop_rx.borrow() {
                return;
            }
            if !wait_connected(&mut state_rx, &mut stop_rx).await {
                return;
            }

            match self.subscribe_queues().await {
                Ok((channel, deliveries)) => {
                    info!(
                        queues = ?self.notification_types,
                        prefetch = self.prefetch,
                        "开始消费通知队列"
                    );
                    drive(
                        &self.processor,
                        deliveries,
                        usize::from(self.prefetch),
                        self.stop_tx.subscribe(),
                    )
                    .await;

                    if *stop_rx.borrow() {
                        // 已预取但未处理的投递在 channel 关闭后由 Broker 重新投递
                        let _ = channel.close(200, "consumer stopped").await;
                        return;
                    }
                    warn!("消费流已结束，等待连接恢复后重新订阅");
                }
                Err(NotifyError::Closed) => return,
                Err(e) => {
                    warn!(error = %e, "订阅通知队列失败");
                    tokio::select! {
                        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                        _ = stop_rx.wait_for(|stopped| *stopped) => return,
                    }
                }
            }
        }
    }

    async fn subscribe_queues(&self) -> Result<(Channel, BoxStream<'static, TaggedDelivery>)> {
        let channel = self.manager.channel().await?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions { global: true })
            .await?;

        let mut streams = Vec::with_capacity(self.notification_types.len());
        for notification_type in &self.notification_types {
            let queue = names::primary_queue(notification_type);
            let consumer_tag = format!(
                "{CONSUMER_TAG_PREFIX}.{notification_type}.{}",
                Uuid::now_v7()
            );
            let consumer = channel
                .basic_consume(
                    &queue,
                    &consumer_tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            debug!(queue = %queue, consumer_tag = %consumer_tag, "已订阅队列");
            let tag: Arc<str> = Arc::from(notification_type.as_str());
            streams.push(
                consumer
                    .map(move |delivery| (tag.clone(), delivery))
                    .boxed(),
            );
        }

        Ok((channel, stream::select_all(streams).boxed()))
    }
}

/// 等待连接可用；停止或连接管理器关闭时返回 `false`
async fn wait_connected(
    state_rx: &mut watch::Receiver<ConnectionState>,
    stop_rx: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        let state = *state_rx.borrow_and_update();
        match state {
            ConnectionState::Connected => return true,
            ConnectionState::Closed => return false,
            ConnectionState::Disconnected => {}
        }

        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
            _ = stop_rx.wait_for(|stopped| *stopped) => return false,
        }
    }
}
