//! Handshake and session control payloads
//!
//! Payloads for the network `auth` handshake, the local `hello` handshake,
//! topic subscription, and error reporting.

use crate::types::ClientKind;
use serde::{Deserialize, Serialize};

/// `auth` payload - required first frame on the network transport
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AuthPayload {
    pub token: String,
    #[serde(rename = "clientType")]
    pub client_type: ClientKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
}

/// `auth_success` payload returned after a successful handshake
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AuthSuccessPayload {
    #[serde(rename = "clientId")]
    pub client_id: String,
}

/// `hello` payload - required first frame on the local transport
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HelloPayload {
    #[serde(rename = "type")]
    pub kind: ClientKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
}

/// `welcome` payload answering a local `hello`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WelcomePayload {
    #[serde(rename = "clientId")]
    pub client_id: String,
}

/// `subscribe` / `unsubscribe` payload
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TopicPayload {
    pub topic: String,
}

/// `error` payload carrying a stable wire code
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}
