//! 通知消息模型
//!
//! 定义在 Broker 上持久化传输的通知消息（JSON 消息体）。
//! 路由层只关心 `id` / `type` / `retry_count` / `metadata` 等信封字段，
//! 类型相关的负载（收件人、内容、模板引用等）原样保留，交给对应的 Handler 校验。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// 元数据中的关联 ID 键
pub const METADATA_CORRELATION_ID: &str = "correlation_id";
/// 元数据中的优先级提示键
pub const METADATA_PRIORITY: &str = "priority";

/// 内置的通知类型标识
pub mod notification_types {
    pub const SMS: &str = "sms";
    pub const EMAIL: &str = "email";
}

/// 通知消息
///
/// `id` 与 `created_at` 在创建时确定，重试时保持不变；
/// `retry_count` 每次重新入队时恰好加一。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    /// 类型相关的负载字段，与信封字段平铺在同一个 JSON 对象中
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Message {
    /// 创建新消息，分配全局唯一 ID（UUID v7，按时间有序）
    pub fn new(notification_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            notification_type: notification_type.into(),
            metadata: HashMap::new(),
            retry_count: 0,
            created_at: Utc::now(),
            payload,
        }
    }

    /// 以强类型负载创建消息
    pub fn with_payload<P: Serialize>(
        notification_type: impl Into<String>,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        let payload = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other);
                map
            }
        };
        Ok(Self::new(notification_type, payload))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        self.with_metadata(METADATA_CORRELATION_ID, correlation_id)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(METADATA_CORRELATION_ID).map(String::as_str)
    }

    pub fn priority(&self) -> Option<&str> {
        self.metadata.get(METADATA_PRIORITY).map(String::as_str)
    }

    /// 构造下一次投递的消息
    ///
    /// 仅 `retry_count` 加一，其余字段（包括 id、created_at、metadata）原样保留。
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// 将负载反序列化为具体类型
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }

    /// 从消息体解码
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// 编码为消息体
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// 短信负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsPayload {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub content: String,
}

/// 邮件负载
///
/// 模板渲染由邮件渠道负责，这里只携带模板名与变量。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailPayload {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub template_name: String,
    #[serde(default)]
    pub template_variables: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sms_message() -> Message {
        Message::with_payload(
            notification_types::SMS,
            &SmsPayload {
                recipients: vec!["+14155550100".to_string(), "+14155550101".to_string()],
                content: "您的验证码是 123456".to_string(),
            },
        )
        .expect("构造短信消息失败")
        .with_correlation_id("corr-001")
    }

    #[test]
    fn test_new_message_defaults() {
        let msg = sms_message();
        assert_eq!(msg.notification_type, "sms");
        assert_eq!(msg.retry_count, 0);
        assert!(Uuid::parse_str(&msg.id).is_ok());
        assert_eq!(msg.correlation_id(), Some("corr-001"));
        assert_eq!(msg.priority(), None);
    }

    #[test]
    fn test_wire_format_is_flat() {
        let msg = sms_message();
        let value: Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "sms");
        assert_eq!(value["retry_count"], 0);
        assert_eq!(value["content"], "您的验证码是 123456");
        assert_eq!(value["recipients"][1], "+14155550101");
        assert_eq!(value["metadata"]["correlation_id"], "corr-001");
        assert!(value.get("payload").is_none());
        assert!(value.get("created_at").is_some());
    }

    #[test]
    fn test_decode_email_wire_format() {
        let body = json!({
            "id": "msg-001",
            "type": "email",
            "recipients": ["user@example.com"],
            "subject": "欢迎",
            "template_name": "welcome",
            "template_variables": {"name": "Alice"},
            "from_address": "noreply@example.com",
            "metadata": {"correlation_id": "corr-9", "priority": "high"},
            "retry_count": 1,
            "created_at": "2024-05-01T10:00:00Z"
        });

        let msg = Message::decode(body.to_string().as_bytes()).unwrap();
        assert_eq!(msg.id, "msg-001");
        assert_eq!(msg.notification_type, "email");
        assert_eq!(msg.retry_count, 1);
        assert_eq!(msg.priority(), Some("high"));

        let payload: EmailPayload = msg.payload_as().unwrap();
        assert_eq!(payload.recipients, vec!["user@example.com"]);
        assert_eq!(payload.template_name, "welcome");
        assert_eq!(payload.template_variables["name"], "Alice");
        assert_eq!(payload.from_address.as_deref(), Some("noreply@example.com"));
    }

    #[test]
    fn test_decode_rejects_malformed_body() {
        assert!(Message::decode(b"{not json").is_err());
        // 缺少 id / created_at
        assert!(Message::decode(br#"{"type":"sms"}"#).is_err());
    }

    #[test]
    fn test_next_attempt_only_increments_retry_count() {
        let msg = sms_message();
        let next = msg.next_attempt();

        assert_eq!(next.retry_count, 1);
        assert_eq!(next.id, msg.id);
        assert_eq!(next.created_at, msg.created_at);
        assert_eq!(next.metadata, msg.metadata);
        assert_eq!(next.payload, msg.payload);
        assert_eq!(next.notification_type, msg.notification_type);
    }

    #[test]
    fn test_encode_decode_preserves_message() {
        let msg = sms_message();
        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }
}
