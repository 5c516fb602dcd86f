//! Conductor library for supervising local processes and routing messages
//!
//! This library provides a clean, testable control-plane daemon that
//! supervises child processes, bridges clients over network and local
//! transports, and aggregates component health into system-wide status.

pub mod core;
pub mod daemon;
pub mod error;
pub mod services;
pub mod traits;
pub mod web;

// Re-export commonly used types
pub use self::core::{AlertLedger, DaemonState, LogRing, MessageRouter};
pub use daemon::Daemon;
pub use error::{ConductorError, ConductorResult};
pub use services::{
    RealAuthenticator, RealConfigSource, RealHealthMonitor, RealMessageBus, RealSupervisor,
};
pub use traits::{Authenticator, ConfigSource, HealthMonitor, MessageBus, Supervisor};
