//! Shared types for the conductor control plane
//!
//! Contains only truly shared types for daemon ↔ client communication.
//! Component-internal types (like the daemon's process registry records)
//! are kept in their respective components.

pub mod envelope;
pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;

pub use envelope::{DeliveryTarget, MessageEnvelope, kinds, topics};
pub use errors::*;
pub use types::*;

// Re-export only daemon ↔ client communication messages
pub use messages::{
    // Handshake and session control
    AuthPayload, AuthSuccessPayload, ErrorPayload, HelloPayload, TopicPayload, WelcomePayload,

    // Process supervision surface
    LogEntryPayload, LogLine, LogStream, ProcessCommand, ProcessDescriptor, ProcessEvent,
    ProcessEventPayload, ProcessSnapshot, ProcessStatusList,

    // Health aggregation surface
    Alert, AlertListPayload, ComponentStatus, HealthCheckSpec, HealthCommand, HealthEventPayload,
    ProbeSpec, SystemHealthSnapshot, SystemStatusPayload,
};
