//! 处理器装配
//!
//! 按配置的通知类型注册内置处理器；没有内置处理器的类型不注册，
//! 这些类型的消息会作为未注册类型进入死信队列。

use std::sync::Arc;

use notify_shared::config::AppConfig;
use notify_shared::message::notification_types;
use tracing::warn;

use crate::error::NotificationError;
use crate::handler::{EmailHandler, SmsHandler};
use crate::provider::{SimulatedEmailProvider, SimulatedSmsProvider};
use crate::router::Router;

pub const SERVICE_NAME: &str = "notification-worker";

pub fn build_router(config: &AppConfig) -> Result<Router, NotificationError> {
    let router = Router::new(config.processing_timeout());

    for notification_type in &config.notification_types {
        match notification_type.as_str() {
            notification_types::SMS => {
                let provider = Arc::new(SimulatedSmsProvider::new(&config.providers.sms));
                router.register(notification_type.clone(), Arc::new(SmsHandler::new(provider)?))?;
            }
            notification_types::EMAIL => {
                let provider = Arc::new(SimulatedEmailProvider::new(&config.providers.email));
                router.register(
                    notification_type.clone(),
                    Arc::new(EmailHandler::new(provider)?),
                )?;
            }
            other => {
                warn!(notification_type = other, "没有内置处理器，该类型的消息将进入死信队列");
            }
        }
    }

    Ok(router)
}
