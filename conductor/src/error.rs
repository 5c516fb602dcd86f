//! Conductor-specific error types

use shared::{MessageEnvelope, SharedError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("Process not registered: {id}")]
    NotRegistered { id: String },

    #[error("Failed to spawn process {id}: {message}")]
    SpawnFailure { id: String, message: String },

    #[error("Process {id} exited with code {code}")]
    ProcessExitFailure { id: String, code: i32 },

    #[error("Authentication required before any other message")]
    AuthRequired,

    #[error("Authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("Client not found: {client_id}")]
    ClientNotFound { client_id: String },

    #[error("Client disconnected: {client_id}")]
    ClientDisconnected { client_id: String },

    #[error("Request timed out: {request_id}")]
    RequestTimeout { request_id: String },

    #[error("Malformed envelope: {message}")]
    MalformedEnvelope { message: String },

    #[error("Duplicate registration: {id}")]
    DuplicateRegistration { id: String },

    #[error("Daemon is shutting down")]
    ShuttingDown,

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Shared component error")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ConductorError {
    pub fn not_registered(id: impl Into<String>) -> Self {
        ConductorError::NotRegistered { id: id.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        ConductorError::MalformedEnvelope {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ConductorError::Transport {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ConductorError::Config {
            message: message.into(),
        }
    }

    /// Stable code carried in `error` envelopes
    pub fn wire_code(&self) -> &'static str {
        match self {
            ConductorError::NotRegistered { .. } => "NOT_REGISTERED",
            ConductorError::SpawnFailure { .. } => "SPAWN_FAILURE",
            ConductorError::ProcessExitFailure { .. } => "PROCESS_EXIT_FAILURE",
            ConductorError::AuthRequired => "AUTH_REQUIRED",
            ConductorError::AuthFailed { .. } => "AUTH_FAILED",
            ConductorError::ClientNotFound { .. } => "CLIENT_NOT_FOUND",
            ConductorError::ClientDisconnected { .. } => "CLIENT_DISCONNECTED",
            ConductorError::RequestTimeout { .. } => "REQUEST_TIMEOUT",
            ConductorError::MalformedEnvelope { .. } => "MALFORMED_ENVELOPE",
            ConductorError::DuplicateRegistration { .. } => "DUPLICATE_REGISTRATION",
            ConductorError::ShuttingDown => "SHUTTING_DOWN",
            ConductorError::Transport { .. } => "TRANSPORT_ERROR",
            ConductorError::Config { .. } => "CONFIG_ERROR",
            ConductorError::SharedError(_) => "PROTOCOL_ERROR",
            ConductorError::IoError(_) => "IO_ERROR",
            ConductorError::JsonError(_) => "MALFORMED_ENVELOPE",
        }
    }

    /// Build the `error` envelope reported to the offending or waiting session
    pub fn to_envelope(&self, source: impl Into<String>) -> MessageEnvelope {
        MessageEnvelope::error(source, self.wire_code(), self.to_string())
    }
}

pub type ConductorResult<T> = Result<T, ConductorError>;
