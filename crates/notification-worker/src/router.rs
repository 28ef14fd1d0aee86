//! 按类型分发
//!
//! 注册表在启动阶段写入一次，之后只读。查表时只在读锁内克隆 `Arc`，
//! 调用 Handler 之前释放锁。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use notify_shared::message::Message;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::NotificationError;
use crate::handler::{FailureReason, NotificationHandler, ProcessingResult};

pub struct Router {
    handlers: RwLock<HashMap<String, Arc<dyn NotificationHandler>>>,
    processing_timeout: Duration,
}

impl Router {
    pub fn new(processing_timeout: Duration) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            processing_timeout,
        }
    }

    /// 注册类型对应的 Handler，重复注册返回错误
    pub fn register(
        &self,
        notification_type: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<(), NotificationError> {
        let notification_type = notification_type.into();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&notification_type) {
            return Err(NotificationError::DuplicateHandler(notification_type));
        }

        info!(notification_type = %notification_type, "注册通知处理器");
        handlers.insert(notification_type, handler);
        Ok(())
    }

    pub fn is_registered(&self, notification_type: &str) -> bool {
        self.handlers.read().contains_key(notification_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    fn lookup(&self, notification_type: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.handlers.read().get(notification_type).cloned()
    }

    /// 分发消息
    ///
    /// 未注册的类型、校验失败都返回不可重试的失败；处理超时返回可重试的失败。
    pub async fn dispatch(&self, message: &Message) -> ProcessingResult {
        let Some(handler) = self.lookup(&message.notification_type) else {
            warn!(notification_type = %message.notification_type, "未注册的通知类型");
            return ProcessingResult::permanent(
                FailureReason::UnknownType,
                format!("未注册的通知类型: {}", message.notification_type),
            );
        };

        if let Err(e) = handler.validate(message) {
            warn!(error = %e, "通知校验失败");
            return e.into();
        }

        match tokio::time::timeout(self.processing_timeout, handler.handle(message)).await {
            Ok(result) => result,
            Err(_) => ProcessingResult::transient(
                FailureReason::Timeout,
                format!("处理超时: {}ms", self.processing_timeout.as_millis()),
            ),
        }
    }
}
