//! Daemon runtime counters and status reporting

use shared::{HealthState, SystemStatusPayload};
use std::time::Instant;

/// Mutable state owned by the daemon loop
pub struct DaemonState {
    started_at: Instant,
    /// Last system health published by the monitor
    pub system_health: HealthState,
    envelopes_routed: u64,
    commands_handled: u64,
}

impl DaemonState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            system_health: HealthState::Unknown,
            envelopes_routed: 0,
            commands_handled: 0,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn record_envelope(&mut self) {
        self.envelopes_routed += 1;
    }

    pub fn record_command(&mut self) {
        self.commands_handled += 1;
    }

    /// Assemble the `system_status` reply payload
    pub fn system_status(&self, process_count: usize, session_count: usize) -> SystemStatusPayload {
        SystemStatusPayload {
            uptime_seconds: self.uptime_seconds(),
            process_count,
            session_count,
            system_health: self.system_health,
            envelopes_routed: self.envelopes_routed,
            commands_handled: self.commands_handled,
        }
    }
}

impl Default for DaemonState {
    fn default() -> Self {
        Self::new()
    }
}
