//! Service implementations
//!
//! This module contains real implementations of all service traits.
//! These are the production implementations that handle actual I/O:
//! child processes, sockets, probes, and the environment.

pub mod authenticator;
pub mod bus;
pub mod config_source;
pub mod health_monitor;
pub mod local_channel;
pub mod supervisor;

// Re-export all service implementations
pub use authenticator::RealAuthenticator;
pub use bus::{BusCore, BusTimings, RealMessageBus};
pub use config_source::RealConfigSource;
pub use health_monitor::{ProbeFn, RealHealthMonitor};
pub use supervisor::{RealSupervisor, SupervisorTimings};

#[cfg(test)]
mod tests;
