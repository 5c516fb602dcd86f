//! Process supervision surface types
//!
//! Commands, lifecycle events, and status snapshots for supervised child
//! processes.

use crate::messages::health::HealthCheckSpec;
use crate::types::ProcessRunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Immutable configuration for a supervised process
///
/// Created at registration; re-registering an id replaces the descriptor
/// without touching the live run state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDescriptor {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub health_check: Option<HealthCheckSpec>,
}

/// Which output stream a captured log line came from
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One captured line of child output
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
    pub timestamp: DateTime<Utc>,
}

/// Mutable run state reported for a registered process
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    pub id: String,
    pub name: String,
    pub state: ProcessRunState,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub recent_logs: Vec<LogLine>,
}

/// Lifecycle transition carried in `process_event` envelopes
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProcessEvent {
    Starting,
    Started {
        pid: u32,
    },
    Stopped {
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
    },
    Failed {
        error: String,
    },
    Restarting {
        #[serde(rename = "restartCount")]
        restart_count: u32,
    },
}

/// `process_event` payload: which process, what happened
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProcessEventPayload {
    pub id: String,
    #[serde(flatten)]
    pub event: ProcessEvent,
}

/// `log_entry` payload re-emitting one captured output line
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LogEntryPayload {
    pub process: String,
    pub stream: LogStream,
    pub line: String,
    pub timestamp: DateTime<Utc>,
}

/// `process_command` payload from the CLI surface
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProcessCommand {
    Register { descriptor: ProcessDescriptor },
    Start { id: String },
    Stop { id: String },
    Restart { id: String },
    Status { id: String },
    StatusAll,
}

/// `process_status_list` reply payload
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProcessStatusList {
    pub processes: Vec<ProcessSnapshot>,
}
