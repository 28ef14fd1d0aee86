//! 模拟短信渠道
//!
//! 生产环境中替换为短信服务商的 API 调用

use std::time::Duration;

use async_trait::async_trait;
use notify_shared::config::SmsProviderConfig;
use tracing::info;
use uuid::Uuid;

use super::{DeliveryProvider, ProviderError, SendContent, SendRequest, SendResult};

pub struct SimulatedSmsProvider {
    from_number: String,
    timeout: Duration,
}

impl SimulatedSmsProvider {
    pub fn new(config: &SmsProviderConfig) -> Self {
        Self {
            from_number: config.from_number.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    async fn deliver(&self, request: &SendRequest) -> Result<String, ProviderError> {
        let SendContent::Text(body) = &request.content else {
            return Err(ProviderError::ContentRejected(
                "短信只支持纯文本内容".to_string(),
            ));
        };

        let message_id = Uuid::now_v7().to_string();
        info!(
            channel = "SMS",
            notification_id = %request.notification_id,
            from = %self.from_number,
            to = %request.recipient,
            message_id = %message_id,
            length = body.chars().count(),
            "模拟发送短信通知"
        );
        Ok(message_id)
    }
}

#[async_trait]
impl DeliveryProvider for SimulatedSmsProvider {
    fn channel(&self) -> &'static str {
        "SMS"
    }

    async fn send(&self, request: &SendRequest) -> SendResult {
        match tokio::time::timeout(self.timeout, self.deliver(request)).await {
            Ok(Ok(message_id)) => SendResult::delivered(&request.recipient, message_id),
            Ok(Err(e)) => SendResult::failed(&request.recipient, e),
            Err(_) => SendResult::failed(
                &request.recipient,
                ProviderError::Timeout(format!("{}ms", self.timeout.as_millis())),
            ),
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> SimulatedSmsProvider {
        SimulatedSmsProvider::new(&SmsProviderConfig::default())
    }

    fn request(recipient: &str) -> SendRequest {
        SendRequest {
            notification_id: "n-1".to_string(),
            recipient: recipient.to_string(),
            content: SendContent::Text("您的验证码是 123456".to_string()),
        }
    }

    #[tokio::test]
    async fn test_send_succeeds_with_message_id() {
        let result = provider().send(&request("+14155550100")).await;
        assert!(result.success);
        assert_eq!(result.recipient, "+14155550100");
        assert!(result.message_id.is_some());
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let requests = vec![request("+14155550100"), request("+14155550101")];
        let results = provider().send_batch(&requests).await;

        let recipients: Vec<&str> = results.iter().map(|r| r.recipient.as_str()).collect();
        assert_eq!(recipients, vec!["+14155550100", "+14155550101"]);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_template_content_rejected() {
        let mut req = request("+14155550100");
        req.content = SendContent::Template {
            subject: "s".to_string(),
            template_name: "t".to_string(),
            variables: Default::default(),
            from_address: None,
        };
        let result = provider().send(&req).await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(ProviderError::ContentRejected(_))));
    }

    #[tokio::test]
    async fn test_health_check() {
        assert!(provider().health_check().await.is_ok());
    }
}
