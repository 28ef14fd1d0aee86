//! 邮件处理器
//!
//! 只校验模板引用与收件人地址，模板渲染由邮件渠道完成。

use std::sync::Arc;

use async_trait::async_trait;
use notify_shared::message::{EmailPayload, Message};
use regex::Regex;
use tracing::debug;

use super::{NotificationHandler, ProcessingResult, fold_send_results};
use crate::error::NotificationError;
use crate::provider::{DeliveryProvider, SendContent, SendRequest};

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$";

pub struct EmailHandler {
    provider: Arc<dyn DeliveryProvider>,
    email_regex: Regex,
}

impl EmailHandler {
    pub fn new(provider: Arc<dyn DeliveryProvider>) -> Result<Self, NotificationError> {
        Ok(Self {
            provider,
            email_regex: Regex::new(EMAIL_PATTERN)?,
        })
    }

    fn payload(&self, message: &Message) -> Result<EmailPayload, NotificationError> {
        message
            .payload_as::<EmailPayload>()
            .map_err(|e| NotificationError::validation("payload", e.to_string()))
    }
}

#[async_trait]
impl NotificationHandler for EmailHandler {
    fn validate(&self, message: &Message) -> Result<(), NotificationError> {
        let payload = self.payload(message)?;

        if payload.recipients.is_empty() {
            return Err(NotificationError::validation("recipients", "收件人列表为空"));
        }
        if let Some(bad) = payload
            .recipients
            .iter()
            .find(|r| !self.email_regex.is_match(r))
        {
            return Err(NotificationError::validation(
                "recipients",
                format!("邮箱地址格式无效: {bad}"),
            ));
        }

        if payload.subject.trim().is_empty() {
            return Err(NotificationError::validation("subject", "邮件主题为空"));
        }
        if payload.template_name.trim().is_empty() {
            return Err(NotificationError::validation("template_name", "模板名称为空"));
        }

        if let Some(from) = &payload.from_address
            && !self.email_regex.is_match(from)
        {
            return Err(NotificationError::validation(
                "from_address",
                format!("发件地址格式无效: {from}"),
            ));
        }

        Ok(())
    }

    async fn handle(&self, message: &Message) -> ProcessingResult {
        let payload = match self.payload(message) {
            Ok(payload) => payload,
            Err(e) => return e.into(),
        };

        let requests: Vec<SendRequest> = payload
            .recipients
            .iter()
            .map(|recipient| SendRequest {
                notification_id: message.id.clone(),
                recipient: recipient.clone(),
                content: SendContent::Template {
                    subject: payload.subject.clone(),
                    template_name: payload.template_name.clone(),
                    variables: payload.template_variables.clone(),
                    from_address: payload.from_address.clone(),
                },
            })
            .collect();

        debug!(
            channel = self.provider.channel(),
            recipients = requests.len(),
            template = %payload.template_name,
            "开始发送邮件"
        );

        let results = self.provider.send_batch(&requests).await;
        fold_send_results(&requests, &results)
    }
}
