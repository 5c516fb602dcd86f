//! Core types used throughout the conductor system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Global process ID singleton - set once at startup
static PROCESS_ID: OnceLock<ProcessId> = OnceLock::new();

/// Process identifier for any component in the system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    /// The control plane daemon (singleton)
    Daemon,
    /// A connected client process with user-friendly number
    Client(u32),
}

impl ProcessId {
    /// Initialize the global process ID for the daemon
    pub fn init_daemon() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Daemon)
    }

    /// Initialize the global process ID for a client with explicit ID
    pub fn init_client(id: u32) -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Client(id))
    }

    /// Get the global process ID (must be initialized first)
    pub fn current() -> &'static ProcessId {
        PROCESS_ID
            .get()
            .expect("ProcessId not initialized - call init_* first")
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Daemon => write!(f, "daemon"),
            ProcessId::Client(id) => write!(f, "client_{id}"),
        }
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        ProcessId::Client(1)
    }
}

/// Session identifier for a bus connection on either transport
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of client connecting to the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Cli,
    Gui,
    Agent,
    System,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKind::Cli => write!(f, "cli"),
            ClientKind::Gui => write!(f, "gui"),
            ClientKind::Agent => write!(f, "agent"),
            ClientKind::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for ClientKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cli" => Ok(ClientKind::Cli),
            "gui" | "ui" => Ok(ClientKind::Gui),
            "agent" => Ok(ClientKind::Agent),
            "system" => Ok(ClientKind::System),
            _ => Err(format!("Unknown client kind: {s}")),
        }
    }
}

/// Run state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRunState {
    Stopped,
    Starting,
    Running,
    Restarting,
    Error,
}

impl fmt::Display for ProcessRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRunState::Stopped => write!(f, "stopped"),
            ProcessRunState::Starting => write!(f, "starting"),
            ProcessRunState::Running => write!(f, "running"),
            ProcessRunState::Restarting => write!(f, "restarting"),
            ProcessRunState::Error => write!(f, "error"),
        }
    }
}

/// Health tier for a component or the whole system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
            HealthState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Reported operational status of a registered component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Starting,
    Running,
    Stopped,
    Error,
    Degraded,
}

/// Severity attached to raised alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "low"),
            AlertSeverity::Medium => write!(f, "medium"),
            AlertSeverity::High => write!(f, "high"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_session_id_generation() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2, "Session IDs should be unique");
    }

    #[test]
    fn test_client_kind_round_trip() {
        for kind in [
            ClientKind::Cli,
            ClientKind::Gui,
            ClientKind::Agent,
            ClientKind::System,
        ] {
            let parsed = ClientKind::from_str(&kind.to_string()).unwrap();
            assert_eq!(parsed, kind);
        }
        assert!(ClientKind::from_str("browser").is_err());
    }

    #[test]
    fn test_run_state_wire_names() {
        let json = serde_json::to_string(&ProcessRunState::Restarting).unwrap();
        assert_eq!(json, "\"restarting\"");
        let back: ProcessRunState = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(back, ProcessRunState::Error);
    }
}
