//! Message envelope and correlation protocol
//!
//! One envelope shape serves both bus transports. Envelopes are immutable
//! once sent; correlation uses `id` on the request and `responseTo` on the
//! reply. Topic publishes and request deadlines ride in `metadata`.

use crate::errors::{SharedError, SharedResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known envelope kinds (the wire `type` field)
pub mod kinds {
    pub const AUTH: &str = "auth";
    pub const AUTH_SUCCESS: &str = "auth_success";
    pub const HELLO: &str = "hello";
    pub const WELCOME: &str = "welcome";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
    pub const ACK: &str = "ack";
    pub const PROCESS_COMMAND: &str = "process_command";
    pub const PROCESS_STATUS: &str = "process_status";
    pub const PROCESS_STATUS_LIST: &str = "process_status_list";
    pub const PROCESS_EVENT: &str = "process_event";
    pub const LOG_ENTRY: &str = "log_entry";
    pub const HEALTH_COMMAND: &str = "health_command";
    pub const HEALTH_EVENT: &str = "health_event";
    pub const ALERT: &str = "alert";
    pub const ALERT_LIST: &str = "alert_list";
    pub const SYSTEM_HEALTH: &str = "system_health";
    pub const SYSTEM_STATUS: &str = "system_status";
}

/// Well-known topics published by the daemon
pub mod topics {
    pub const PROCESS_EVENTS: &str = "process.events";
    pub const PROCESS_LOGS: &str = "process.logs";
    pub const HEALTH_EVENTS: &str = "health.events";
    pub const HEALTH_ALERTS: &str = "health.alerts";
}

/// Delivery target carried in the envelope `target` field
///
/// A single id, a list of ids, or the literal `"all"` for broadcast.
/// An absent target also means broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeliveryTarget {
    One(String),
    Many(Vec<String>),
}

impl DeliveryTarget {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, DeliveryTarget::One(id) if id == "all")
    }

    pub fn contains(&self, id: &str) -> bool {
        match self {
            DeliveryTarget::One(one) => one == id,
            DeliveryTarget::Many(many) => many.iter().any(|m| m == id),
        }
    }
}

impl From<&str> for DeliveryTarget {
    fn from(id: &str) -> Self {
        DeliveryTarget::One(id.to_string())
    }
}

impl From<String> for DeliveryTarget {
    fn from(id: String) -> Self {
        DeliveryTarget::One(id)
    }
}

impl From<Vec<String>> for DeliveryTarget {
    fn from(ids: Vec<String>) -> Self {
        DeliveryTarget::Many(ids)
    }
}

/// The envelope every bus message travels in, on both transports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<DeliveryTarget>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expects_response: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
}

impl MessageEnvelope {
    /// Create a broadcast envelope (no target) with a fresh id and timestamp
    pub fn new(
        kind: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            source: source.into(),
            target: None,
            payload,
            timestamp: Utc::now(),
            expects_response: None,
            response_to: None,
            metadata: None,
        }
    }

    /// Create a reply correlated to `request` and addressed at its sender
    pub fn reply(
        request: &MessageEnvelope,
        kind: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(kind, source, payload)
            .with_target(request.source.as_str())
            .with_response_to(&request.id)
    }

    /// Create an `error` envelope carrying a stable wire code
    pub fn error(source: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        let payload = serde_json::json!({ "code": code, "message": message.into() });
        Self::new(kinds::ERROR, source, payload)
    }

    pub fn with_target(mut self, target: impl Into<DeliveryTarget>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_response_to(mut self, request_id: &str) -> Self {
        self.response_to = Some(request_id.to_string());
        self
    }

    /// Mark the envelope as a request expecting a correlated response
    pub fn expecting_response(mut self) -> Self {
        self.expects_response = Some(true);
        self
    }

    /// Attach a topic so the router fans the envelope out to subscribers
    pub fn with_topic(mut self, topic: &str) -> Self {
        self.insert_metadata("topic", serde_json::Value::String(topic.to_string()));
        self
    }

    /// Attach a request deadline in milliseconds
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.insert_metadata("timeoutMs", serde_json::Value::from(timeout_ms));
        self
    }

    fn insert_metadata(&mut self, key: &str, value: serde_json::Value) {
        let metadata = self
            .metadata
            .get_or_insert_with(|| serde_json::json!({}));
        if let Some(map) = metadata.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    /// Topic carried in metadata, if any
    pub fn topic(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("topic")?.as_str()
    }

    /// Request deadline carried in metadata, if any
    pub fn timeout_ms(&self) -> Option<u64> {
        self.metadata.as_ref()?.get("timeoutMs")?.as_u64()
    }

    pub fn expects_reply(&self) -> bool {
        self.expects_response.unwrap_or(false)
    }

    /// True when the envelope addresses every session (absent target or "all")
    pub fn is_broadcast(&self) -> bool {
        match &self.target {
            None => true,
            Some(target) => target.is_broadcast(),
        }
    }

    /// Parse the payload into a typed struct for the handling site
    pub fn parse_payload<T: serde::de::DeserializeOwned>(&self) -> SharedResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            SharedError::DeserializationError {
                message: e.to_string(),
            }
        })
    }
}
