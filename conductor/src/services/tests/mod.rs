//! Service-specific tests
//!
//! This module contains comprehensive tests for the conductor services.
//! Each service has its own test file with dedicated fixtures and helpers.

#[cfg(test)]
mod bus;

// Common test utilities for services
#[cfg(test)]
pub mod common {
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::timeout;

    use crate::services::{BusTimings, SupervisorTimings};
    use crate::traits::Supervisor;
    use shared::{HealthCheckSpec, ProbeSpec, ProcessDescriptor, ProcessRunState, ProcessSnapshot};

    /// Standard timeout for async operations in tests
    pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Helper to run async operations with timeout
    pub async fn with_timeout<T, F>(future: F) -> Result<T, tokio::time::error::Elapsed>
    where
        F: std::future::Future<Output = T>,
    {
        timeout(TEST_TIMEOUT, future).await
    }

    /// Supervisor timings shrunk so lifecycle tests finish quickly
    pub fn fast_supervisor_timings() -> SupervisorTimings {
        SupervisorTimings {
            stop_grace: Duration::from_millis(800),
            restart_backoff: Duration::from_millis(100),
            restart_settle: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Bus timings shrunk so handshake and liveness tests finish quickly
    pub fn fast_bus_timings() -> BusTimings {
        BusTimings {
            heartbeat_interval: Duration::from_millis(100),
            liveness_window: Duration::from_millis(400),
            auth_window: Duration::from_millis(300),
            default_request_timeout: Duration::from_millis(500),
        }
    }

    /// Descriptor running a short shell script
    pub fn shell_descriptor(id: &str, script: &str, auto_restart: bool) -> ProcessDescriptor {
        ProcessDescriptor {
            id: id.to_string(),
            name: format!("{id} worker"),
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: None,
            env: HashMap::new(),
            auto_restart,
            health_check: None,
        }
    }

    /// Check spec using a named in-process probe with a short interval
    pub fn custom_check(id: &str, component: &str, probe: &str, max_failures: u32) -> HealthCheckSpec {
        HealthCheckSpec {
            id: id.to_string(),
            component: component.to_string(),
            probe: ProbeSpec::Custom {
                name: probe.to_string(),
            },
            interval_ms: 25,
            timeout_ms: 200,
            max_failures,
        }
    }

    /// Poll a process until it reaches the wanted state or the timeout hits
    pub async fn wait_for_state(
        supervisor: &dyn Supervisor,
        id: &str,
        state: ProcessRunState,
    ) -> ProcessSnapshot {
        let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
        loop {
            let snap = supervisor.status(id).await.expect("process registered");
            if snap.state == state {
                return snap;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "process {} stuck in {:?} while waiting for {:?}",
                id,
                snap.state,
                state
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
