//! Health aggregation surface types
//!
//! Health check configuration, component status, alerts, and the system
//! health snapshot published on `health.events`.

use crate::types::{AlertSeverity, ComponentState, HealthState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// How a health check probes its component
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "probe", rename_all = "snake_case")]
pub enum ProbeSpec {
    /// Success iff an HTTP request to `url` succeeds within the timeout
    Http { url: String },
    /// Success iff the named in-process predicate returns true
    Custom { name: String },
}

/// Configuration for one scheduled health check
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    pub id: String,
    pub component: String,
    #[serde(flatten)]
    pub probe: ProbeSpec,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub max_failures: u32,
}

impl HealthCheckSpec {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Registered component with its reported status and derived health
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub id: String,
    pub status: ComponentState,
    pub health: HealthState,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub dependents: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub last_check: DateTime<Utc>,
}

/// Alert raised on a health threshold breach
///
/// Deduplicated by (component, condition) while an unresolved alert exists.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub severity: AlertSeverity,
    pub component: String,
    pub condition: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub resolved: bool,
}

/// System-wide health published on every component health change
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealthSnapshot {
    pub status: HealthState,
    pub components: HashMap<String, HealthState>,
    pub active_alerts: usize,
    pub generated_at: DateTime<Utc>,
}

/// `health_event` payload: a component health transition
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthEventPayload {
    pub component: String,
    /// Check id when the transition was probe-driven
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub check: Option<String>,
    pub previous: HealthState,
    pub current: HealthState,
    #[serde(default)]
    pub recovered: bool,
}

/// `health_command` payload from the CLI surface
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HealthCommand {
    AddCheck {
        check: HealthCheckSpec,
    },
    RegisterComponent {
        id: String,
        #[serde(rename = "dependsOn", default)]
        depends_on: Vec<String>,
    },
    UpdateComponent {
        id: String,
        status: ComponentState,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        health: Option<HealthState>,
    },
    SystemHealth,
    ActiveAlerts,
    Acknowledge {
        #[serde(rename = "alertId")]
        alert_id: String,
    },
    Resolve {
        #[serde(rename = "alertId")]
        alert_id: String,
    },
}

/// `alert_list` reply payload
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AlertListPayload {
    pub alerts: Vec<Alert>,
}

/// `system_status` reply payload: the daemon's one-shot overview
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatusPayload {
    pub uptime_seconds: u64,
    pub process_count: usize,
    pub session_count: usize,
    pub system_health: HealthState,
    pub envelopes_routed: u64,
    pub commands_handled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_spec_wire_shape() {
        let raw = r#"{
            "id": "backend-http",
            "component": "backend",
            "probe": "http",
            "url": "http://127.0.0.1:8080/health",
            "intervalMs": 5000,
            "timeoutMs": 1000,
            "maxFailures": 3
        }"#;
        let spec: HealthCheckSpec = serde_json::from_str(raw).unwrap();
        assert_eq!(
            spec.probe,
            ProbeSpec::Http {
                url: "http://127.0.0.1:8080/health".to_string()
            }
        );
        assert_eq!(spec.interval(), Duration::from_millis(5000));
        assert_eq!(spec.max_failures, 3);
    }

    #[test]
    fn test_health_command_wire_shape() {
        let raw = r#"{"action":"acknowledge","alertId":"a-1"}"#;
        let command: HealthCommand = serde_json::from_str(raw).unwrap();
        assert_eq!(
            command,
            HealthCommand::Acknowledge {
                alert_id: "a-1".to_string()
            }
        );

        let raw = r#"{"action":"register_component","id":"backend","dependsOn":["db"]}"#;
        let command: HealthCommand = serde_json::from_str(raw).unwrap();
        match command {
            HealthCommand::RegisterComponent { id, depends_on } => {
                assert_eq!(id, "backend");
                assert_eq!(depends_on, vec!["db".to_string()]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_update_component_health_optional() {
        let raw = r#"{"action":"update_component","id":"backend","status":"running"}"#;
        let command: HealthCommand = serde_json::from_str(raw).unwrap();
        match command {
            HealthCommand::UpdateComponent { health, .. } => assert!(health.is_none()),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
