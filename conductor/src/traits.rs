//! Trait definitions with mockall annotations for testing
//!
//! This module contains the service traits the daemon is generic over,
//! with mockall mock generation annotations. These traits are used for
//! dependency injection and enable comprehensive testing.

use crate::error::ConductorResult;
use shared::{
    Alert, ClientKind, ComponentState, HealthCheckSpec, HealthEventPayload, HealthState,
    LogEntryPayload, MessageEnvelope, ProcessDescriptor, ProcessEventPayload, ProcessSnapshot,
    SessionId, SystemHealthSnapshot,
};
use std::net::SocketAddr;
use std::path::Path;
use tokio::sync::mpsc;

/// An envelope received from a connected session, either transport
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub session: SessionId,
    pub envelope: MessageEnvelope,
}

/// Event emitted by the supervisor toward the daemon loop
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A lifecycle transition for a supervised process
    Process(ProcessEventPayload),
    /// One captured line of child output
    Log(LogEntryPayload),
}

/// Event emitted by the health monitor toward the daemon loop
#[derive(Debug, Clone)]
pub enum HealthEvent {
    /// A component health transition (including recoveries)
    Component(HealthEventPayload),
    /// A newly raised alert
    Alert(Alert),
    /// A recomputed system health snapshot
    System(SystemHealthSnapshot),
}

/// Notification that a configuration key changed
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

/// Process supervision abstraction for dependency injection
///
/// Owns child-process lifecycle: registration, spawning, graceful stop with
/// force-kill fallback, restart with backoff, and output capture.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Supervisor: Send + Sync {
    /// Register a process descriptor, initializing its state to `stopped`
    ///
    /// # Parameters
    /// - `descriptor`: Immutable process configuration
    ///
    /// Re-registering an id replaces the descriptor without touching the
    /// live run state.
    async fn register(&self, descriptor: ProcessDescriptor) -> ConductorResult<()>;

    /// Start a registered process
    ///
    /// No-op if the process is already running or starting.
    async fn start(&self, id: &str) -> ConductorResult<()>;

    /// Stop a running process gracefully, force-killing after the stop grace
    ///
    /// No-op (no event, no error) if the process is not running. Stopping a
    /// restarting process cancels the scheduled restart.
    async fn stop(&self, id: &str) -> ConductorResult<()>;

    /// Restart a process: graceful stop, settle delay, then start
    async fn restart(&self, id: &str) -> ConductorResult<()>;

    /// Current run state snapshot for one process
    ///
    /// # Returns
    /// ProcessSnapshot with state, pid, restart count, and recent logs
    async fn status(&self, id: &str) -> ConductorResult<ProcessSnapshot>;

    /// Snapshots for every registered process
    async fn all_statuses(&self) -> Vec<ProcessSnapshot>;

    /// The registered descriptor for one process
    async fn descriptor(&self, id: &str) -> ConductorResult<ProcessDescriptor>;

    /// Hand the daemon the lifecycle/log event receiver
    ///
    /// # Returns
    /// The receiver on first call, None afterwards
    async fn take_event_stream(&self) -> Option<mpsc::Receiver<SupervisorEvent>>;

    /// Force-stop every process and cancel scheduled restarts
    async fn shutdown(&self) -> ConductorResult<()>;
}

/// Message bus abstraction over both transports
///
/// One router backs the network WebSocket endpoint and the local socket;
/// the daemon uses this trait for publishing and session delivery.
#[mockall::automock]
#[async_trait::async_trait]
pub trait MessageBus: Send + Sync {
    /// Start the network WebSocket listener
    ///
    /// # Parameters
    /// - `bind_addr`: Address to bind the HTTP/WebSocket listener
    async fn start_network(&self, bind_addr: SocketAddr) -> ConductorResult<()>;

    /// Start the local socket listener
    ///
    /// # Parameters
    /// - `socket_path`: Filesystem path for the Unix domain socket
    async fn start_local(&self, socket_path: &Path) -> ConductorResult<()>;

    /// Hand the daemon the inbound envelope receiver
    ///
    /// # Returns
    /// The receiver on first call, None afterwards
    async fn take_inbound(&self) -> Option<mpsc::Receiver<InboundEnvelope>>;

    /// Fan an envelope out to every subscriber of a topic
    ///
    /// # Returns
    /// Number of sessions the envelope was delivered to
    async fn publish(&self, topic: &str, envelope: MessageEnvelope) -> usize;

    /// Deliver an envelope to one session
    async fn send_to_session(
        &self,
        session: &SessionId,
        envelope: MessageEnvelope,
    ) -> ConductorResult<()>;

    /// Deliver an envelope to every authenticated session
    ///
    /// # Returns
    /// Number of sessions the envelope was delivered to
    async fn broadcast(&self, envelope: MessageEnvelope) -> usize;

    /// Number of live sessions across both transports
    async fn session_count(&self) -> usize;

    /// Reject outstanding requests, close sessions, stop listeners
    async fn shutdown(&self) -> ConductorResult<()>;
}

/// Health aggregation abstraction for dependency injection
///
/// Schedules probes, tracks consecutive-failure streaks, derives component
/// and system health, and raises deduplicated alerts.
#[mockall::automock]
#[async_trait::async_trait]
pub trait HealthMonitor: Send + Sync {
    /// Register a health check and start probing immediately
    ///
    /// # Parameters
    /// - `check`: Check configuration including probe, interval, and thresholds
    async fn add_check(&self, check: HealthCheckSpec) -> ConductorResult<()>;

    /// Remove a check and stop its scheduler (idempotent)
    async fn remove_check(&self, check_id: &str) -> ConductorResult<()>;

    /// Register a component for status tracking
    ///
    /// # Parameters
    /// - `id`: Component identifier
    /// - `depends_on`: Component ids this one depends on
    async fn register_component(&self, id: &str, depends_on: Vec<String>) -> ConductorResult<()>;

    /// Update a registered component's reported status
    ///
    /// # Parameters
    /// - `status`: New operational status
    /// - `health`: Optional explicit health override
    async fn update_component_status(
        &self,
        id: &str,
        status: ComponentState,
        health: Option<HealthState>,
    ) -> ConductorResult<()>;

    /// Current system-wide health snapshot
    async fn system_health(&self) -> SystemHealthSnapshot;

    /// All unresolved alerts
    async fn active_alerts(&self) -> Vec<Alert>;

    /// Mark an alert acknowledged (idempotent)
    async fn acknowledge_alert(&self, alert_id: &str) -> ConductorResult<()>;

    /// Mark an alert resolved (idempotent)
    async fn resolve_alert(&self, alert_id: &str) -> ConductorResult<()>;

    /// Start the probe schedulers
    async fn start_monitoring(&self) -> ConductorResult<()>;

    /// Stop the probe schedulers
    async fn stop_monitoring(&self) -> ConductorResult<()>;

    /// Restart every probe scheduler (consumed on config changes)
    async fn restart_checks(&self) -> ConductorResult<()>;

    /// Hand the daemon the health event receiver
    ///
    /// # Returns
    /// The receiver on first call, None afterwards
    async fn take_event_stream(&self) -> Option<mpsc::Receiver<HealthEvent>>;
}

/// Configuration source abstraction
///
/// The daemon only needs key lookup and a change-notification stream;
/// file loading and schema defaults live with the external CLI layer.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ConfigSource: Send + Sync {
    /// Look up a configuration value
    async fn get(&self, key: &str) -> Option<String>;

    /// Hand the daemon the change-notification receiver
    ///
    /// # Returns
    /// The receiver on first call, None afterwards
    async fn take_change_stream(&self) -> Option<mpsc::Receiver<ConfigChange>>;
}

/// Credential check for the network transport handshake
#[mockall::automock]
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    /// Check a presented token and declared client type
    async fn authenticate(&self, token: &str, client_type: ClientKind) -> bool;
}
