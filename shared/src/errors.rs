//! Shared error types for the conductor system

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Serialization failed: {message}")]
    SerializationError { message: String },

    #[error("Deserialization failed: {message}")]
    DeserializationError { message: String },

    #[error("Invalid UUID: {input}")]
    InvalidUuid { input: String },

    #[error("Message protocol error: {message}")]
    ProtocolError { message: String },
}

impl SharedError {
    pub fn protocol(message: impl Into<String>) -> Self {
        SharedError::ProtocolError {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        SharedError::DeserializationError {
            message: err.to_string(),
        }
    }
}

pub type SharedResult<T> = Result<T, SharedError>;
