//! Message types for the conductor control plane
//!
//! This module organizes all daemon ↔ client payloads by category:
//! - `control`: handshake, subscription, and error payloads
//! - `process`: process supervision commands, events, and snapshots
//! - `health`: health checks, component status, and alerts

pub mod control;
pub mod health;
pub mod process;

// Re-export commonly used types at module level for convenience
pub use control::{
    AuthPayload, AuthSuccessPayload, ErrorPayload, HelloPayload, TopicPayload, WelcomePayload,
};

pub use process::{
    LogEntryPayload, LogLine, LogStream, ProcessCommand, ProcessDescriptor, ProcessEvent,
    ProcessEventPayload, ProcessSnapshot, ProcessStatusList,
};

pub use health::{
    Alert, AlertListPayload, ComponentStatus, HealthCheckSpec, HealthCommand, HealthEventPayload,
    ProbeSpec, SystemHealthSnapshot, SystemStatusPayload,
};
