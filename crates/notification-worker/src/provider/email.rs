//! 模拟邮件渠道
//!
//! 生产环境中替换为 SMTP 或邮件服务商的 API 调用，模板渲染也在那一侧完成

use std::time::Duration;

use async_trait::async_trait;
use notify_shared::config::EmailProviderConfig;
use tracing::info;
use uuid::Uuid;

use super::{DeliveryProvider, ProviderError, SendContent, SendRequest, SendResult};

pub struct SimulatedEmailProvider {
    default_from: String,
    timeout: Duration,
}

impl SimulatedEmailProvider {
    pub fn new(config: &EmailProviderConfig) -> Self {
        Self {
            default_from: config.from_address.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    async fn deliver(&self, request: &SendRequest) -> Result<String, ProviderError> {
        let SendContent::Template {
            subject,
            template_name,
            variables,
            from_address,
        } = &request.content
        else {
            return Err(ProviderError::ContentRejected(
                "邮件需要模板内容".to_string(),
            ));
        };

        let from = from_address.as_deref().unwrap_or(&self.default_from);
        let message_id = Uuid::now_v7().to_string();
        info!(
            channel = "EMAIL",
            notification_id = %request.notification_id,
            from = %from,
            to = %request.recipient,
            subject = %subject,
            template = %template_name,
            variables = variables.len(),
            message_id = %message_id,
            "模拟发送邮件通知"
        );
        Ok(message_id)
    }
}

#[async_trait]
impl DeliveryProvider for SimulatedEmailProvider {
    fn channel(&self) -> &'static str {
        "EMAIL"
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
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_send_template_email() {
        let provider = SimulatedEmailProvider::new(&EmailProviderConfig::default());
        let request = SendRequest {
            notification_id: "n-2".to_string(),
            recipient: "user@example.com".to_string(),
            content: SendContent::Template {
                subject: "欢迎".to_string(),
                template_name: "welcome".to_string(),
                variables: HashMap::from([("name".to_string(), "Alice".into())]),
                from_address: None,
            },
        };

        let result = provider.send(&request).await;
        assert!(result.success);
        assert_eq!(result.recipient, "user@example.com");
        assert!(result.message_id.is_some());
    }

    #[tokio::test]
    async fn test_plain_text_rejected() {
        let provider = SimulatedEmailProvider::new(&EmailProviderConfig::default());
        let request = SendRequest {
            notification_id: "n-3".to_string(),
            recipient: "user@example.com".to_string(),
            content: SendContent::Text("hi".to_string()),
        };

        let result = provider.send(&request).await;
        assert!(!result.success);
        assert!(!result.error.as_ref().is_some_and(ProviderError::is_retryable));
    }
}
