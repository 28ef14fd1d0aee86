//! 短信处理器

use std::sync::Arc;

use async_trait::async_trait;
use notify_shared::message::{Message, SmsPayload};
use regex::Regex;
use tracing::debug;

use super::{NotificationHandler, ProcessingResult, fold_send_results};
use crate::error::NotificationError;
use crate::provider::{DeliveryProvider, SendContent, SendRequest};

/// E.164 格式手机号
const PHONE_PATTERN: &str = r"^\+[1-9]\d{6,14}$";
/// 单条短信内容的最大字符数（含长短信拼接）
const MAX_CONTENT_CHARS: usize = 1600;

pub struct SmsHandler {
    provider: Arc<dyn DeliveryProvider>,
    phone_regex: Regex,
}

impl SmsHandler {
    pub fn new(provider: Arc<dyn DeliveryProvider>) -> Result<Self, NotificationError> {
        Ok(Self {
            provider,
            phone_regex: Regex::new(PHONE_PATTERN)?,
        })
    }

    fn payload(&self, message: &Message) -> Result<SmsPayload, NotificationError> {
        message
            .payload_as::<SmsPayload>()
            .map_err(|e| NotificationError::validation("payload", e.to_string()))
    }
}

#[async_trait]
impl NotificationHandler for SmsHandler {
    fn validate(&self, message: &Message) -> Result<(), NotificationError> {
        let payload = self.payload(message)?;

        if payload.recipients.is_empty() {
            return Err(NotificationError::validation("recipients", "收件人列表为空"));
        }
        if let Some(bad) = payload
            .recipients
            .iter()
            .find(|r| !self.phone_regex.is_match(r))
        {
            return Err(NotificationError::validation(
                "recipients",
                format!("手机号格式无效: {bad}"),
            ));
        }

        if payload.content.trim().is_empty() {
            return Err(NotificationError::validation("content", "短信内容为空"));
        }
        if payload.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(NotificationError::validation(
                "content",
                format!("短信内容超过 {MAX_CONTENT_CHARS} 个字符"),
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
                content: SendContent::Text(payload.content.clone()),
            })
            .collect();

        debug!(
            channel = self.provider.channel(),
            recipients = requests.len(),
            "开始发送短信"
        );

        let results = self.provider.send_batch(&requests).await;
        fold_send_results(&requests, &results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockDeliveryProvider, ProviderError, SendResult};
    use notify_shared::message::notification_types;

    fn sms(recipients: &[&str], content: &str) -> Message {
        Message::with_payload(
            notification_types::SMS,
            &SmsPayload {
                recipients: recipients.iter().map(|r| r.to_string()).collect(),
                content: content.to_string(),
            },
        )
        .unwrap()
    }

    fn handler(provider: MockDeliveryProvider) -> SmsHandler {
        SmsHandler::new(Arc::new(provider)).unwrap()
    }

    #[test]
    fn test_validate_accepts_well_formed_message() {
        let handler = handler(MockDeliveryProvider::new());
        assert!(
            handler
                .validate(&sms(&["+14155550100", "+8613800138000"], "验证码 1234"))
                .is_ok()
        );
    }

    #[test]
    fn test_validate_rejects_empty_recipients() {
        let handler = handler(MockDeliveryProvider::new());
        let err = handler.validate(&sms(&[], "hi")).unwrap_err();
        assert!(matches!(err, NotificationError::Validation { ref field, .. } if field == "recipients"));
    }

    #[test]
    fn test_validate_rejects_malformed_phone() {
        let handler = handler(MockDeliveryProvider::new());
        for bad in ["14155550100", "+0123456789", "+1-415-555", "phone"] {
            assert!(handler.validate(&sms(&[bad], "hi")).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_validate_rejects_blank_content() {
        let handler = handler(MockDeliveryProvider::new());
        let err = handler.validate(&sms(&["+14155550100"], "   ")).unwrap_err();
        assert!(matches!(err, NotificationError::Validation { ref field, .. } if field == "content"));

        let long = "字".repeat(MAX_CONTENT_CHARS + 1);
        assert!(handler.validate(&sms(&["+14155550100"], &long)).is_err());
    }

    #[test]
    fn test_validate_rejects_wrong_payload_shape() {
        let handler = handler(MockDeliveryProvider::new());
        let mut msg = sms(&["+14155550100"], "hi");
        msg.payload
            .insert("recipients".to_string(), serde_json::json!("not-a-list"));
        assert!(handler.validate(&msg).is_err());
    }

    #[tokio::test]
    async fn test_handle_fans_out_one_request_per_recipient() {
        let mut provider = MockDeliveryProvider::new();
        provider.expect_channel().return_const("SMS");
        provider
            .expect_send_batch()
            .withf(|requests| {
                requests.len() == 2
                    && requests[0].recipient == "+14155550100"
                    && requests[1].recipient == "+14155550101"
                    && requests
                        .iter()
                        .all(|r| r.content == SendContent::Text("hello".to_string()))
            })
            .times(1)
            .returning(|requests| {
                requests
                    .iter()
                    .map(|r| SendResult::delivered(&r.recipient, "id"))
                    .collect()
            });

        let result = handler(provider)
            .handle(&sms(&["+14155550100", "+14155550101"], "hello"))
            .await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_handle_reports_failed_recipient() {
        let mut provider = MockDeliveryProvider::new();
        provider.expect_channel().return_const("SMS");
        provider.expect_send_batch().returning(|requests| {
            vec![
                SendResult::delivered(&requests[0].recipient, "id"),
                SendResult::failed(
                    &requests[1].recipient,
                    ProviderError::Server {
                        status: 502,
                        message: "bad gateway".to_string(),
                    },
                ),
            ]
        });

        let result = handler(provider)
            .handle(&sms(&["+14155550100", "+14155550101"], "hello"))
            .await;
        assert!(!result.is_success());
        assert!(result.is_retryable());
        assert_eq!(result.failed_items(), ["+14155550101".to_string()]);
    }
}
