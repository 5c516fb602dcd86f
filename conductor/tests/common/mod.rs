//! Common test utilities and infrastructure
//!
//! Shared fixtures and client helpers used across the end-to-end test
//! suites: a full daemon booted on ephemeral transports, plus thin
//! WebSocket and Unix socket clients speaking the envelope protocol.

pub mod fixtures;
pub mod helpers;

pub use fixtures::{crash_once_descriptor, flag_probe, DaemonBuilder, DaemonFixture};
pub use helpers::{LocalClient, WsClient};
