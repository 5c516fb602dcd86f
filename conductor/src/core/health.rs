//! Health derivation rules and the alert ledger
//!
//! Pure logic consumed by the health monitor service: failure-streak
//! thresholds, system-health rollup, and alert deduplication.

use chrono::Utc;
use shared::{Alert, AlertSeverity, HealthState};
use std::collections::HashMap;

/// Condition tag for a check crossing its degraded threshold
pub fn degraded_condition(check_id: &str) -> String {
    format!("check:{check_id}:degraded")
}

/// Condition tag for a check crossing its unhealthy threshold
pub fn unhealthy_condition(check_id: &str) -> String {
    format!("check:{check_id}:unhealthy")
}

/// Health transition triggered by a consecutive-failure streak, if any.
///
/// A streak of exactly `max_failures` marks the component degraded; twice
/// that marks it unhealthy. Intermediate counts change nothing, which keeps
/// repeated failures from re-raising the same alert.
pub fn health_for_streak(streak: u32, max_failures: u32) -> Option<HealthState> {
    if max_failures == 0 {
        return None;
    }
    if streak == max_failures {
        Some(HealthState::Degraded)
    } else if streak == max_failures * 2 {
        Some(HealthState::Unhealthy)
    } else {
        None
    }
}

/// Roll component healths up into one system health.
///
/// Any unhealthy component makes the system unhealthy; otherwise any
/// degraded one makes it degraded. Unknown components count as neither.
pub fn derive_system(states: impl IntoIterator<Item = HealthState>) -> HealthState {
    let mut degraded = false;
    for state in states {
        match state {
            HealthState::Unhealthy => return HealthState::Unhealthy,
            HealthState::Degraded => degraded = true,
            HealthState::Healthy | HealthState::Unknown => {}
        }
    }
    if degraded {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    }
}

/// Alert store with (component, condition) deduplication.
///
/// Resolved alerts stay in the ledger for acknowledgement history; only
/// unresolved ones block a re-raise or count as active.
#[derive(Default)]
pub struct AlertLedger {
    alerts: HashMap<String, Alert>,
}

impl AlertLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise an alert unless the same condition is already active.
    ///
    /// # Returns
    /// The new alert, or None when an unresolved alert for this
    /// (component, condition) pair already exists.
    pub fn raise(
        &mut self,
        component: &str,
        condition: &str,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Option<Alert> {
        let duplicate = self
            .alerts
            .values()
            .any(|a| !a.resolved && a.component == component && a.condition == condition);
        if duplicate {
            return None;
        }

        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            severity,
            component: component.to_string(),
            condition: condition.to_string(),
            message: message.into(),
            created_at: Utc::now(),
            acknowledged: false,
            resolved: false,
        };
        self.alerts.insert(alert.id.clone(), alert.clone());
        Some(alert)
    }

    /// # Returns
    /// None for an unknown id, otherwise whether the flag changed
    pub fn acknowledge(&mut self, alert_id: &str) -> Option<bool> {
        let alert = self.alerts.get_mut(alert_id)?;
        let changed = !alert.acknowledged;
        alert.acknowledged = true;
        Some(changed)
    }

    /// # Returns
    /// None for an unknown id, otherwise whether the flag changed
    pub fn resolve(&mut self, alert_id: &str) -> Option<bool> {
        let alert = self.alerts.get_mut(alert_id)?;
        let changed = !alert.resolved;
        alert.resolved = true;
        Some(changed)
    }

    /// Resolve every active alert for a component; used on recovery.
    ///
    /// # Returns
    /// The alerts that were newly resolved.
    pub fn resolve_for_component(&mut self, component: &str) -> Vec<Alert> {
        let mut resolved = Vec::new();
        for alert in self.alerts.values_mut() {
            if !alert.resolved && alert.component == component {
                alert.resolved = true;
                resolved.push(alert.clone());
            }
        }
        resolved
    }

    /// Unresolved alerts, oldest first
    pub fn active(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .alerts
            .values()
            .filter(|a| !a.resolved)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        active
    }

    pub fn active_count(&self) -> usize {
        self.alerts.values().filter(|a| !a.resolved).count()
    }

    pub fn get(&self, alert_id: &str) -> Option<&Alert> {
        self.alerts.get(alert_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streak_thresholds() {
        assert_eq!(health_for_streak(1, 3), None);
        assert_eq!(health_for_streak(2, 3), None);
        assert_eq!(health_for_streak(3, 3), Some(HealthState::Degraded));
        assert_eq!(health_for_streak(4, 3), None);
        assert_eq!(health_for_streak(6, 3), Some(HealthState::Unhealthy));
        assert_eq!(health_for_streak(7, 3), None);
        assert_eq!(health_for_streak(0, 0), None);
    }

    #[test]
    fn test_system_rollup_precedence() {
        use HealthState::*;
        assert_eq!(derive_system([Healthy, Healthy]), Healthy);
        assert_eq!(derive_system([Healthy, Degraded]), Degraded);
        assert_eq!(derive_system([Degraded, Unhealthy, Healthy]), Unhealthy);
        assert_eq!(derive_system([Unknown, Healthy]), Healthy);
        assert_eq!(derive_system([]), Healthy);
    }

    #[test]
    fn test_duplicate_condition_not_re_raised() {
        let mut ledger = AlertLedger::new();
        let first = ledger.raise("api", "check:api-ping:degraded", AlertSeverity::Medium, "3 failures");
        assert!(first.is_some());
        let second = ledger.raise("api", "check:api-ping:degraded", AlertSeverity::Medium, "still failing");
        assert!(second.is_none());
        assert_eq!(ledger.active_count(), 1);
    }

    #[test]
    fn test_distinct_conditions_coexist() {
        let mut ledger = AlertLedger::new();
        assert!(ledger
            .raise("api", "check:api-ping:degraded", AlertSeverity::Medium, "m")
            .is_some());
        assert!(ledger
            .raise("api", "check:api-ping:unhealthy", AlertSeverity::High, "m")
            .is_some());
        assert_eq!(ledger.active_count(), 2);
    }

    #[test]
    fn test_acknowledge_and_resolve_idempotent() {
        let mut ledger = AlertLedger::new();
        let alert = ledger
            .raise("db", "check:db-ping:degraded", AlertSeverity::Medium, "m")
            .unwrap();

        assert_eq!(ledger.acknowledge(&alert.id), Some(true));
        assert_eq!(ledger.acknowledge(&alert.id), Some(false));
        assert_eq!(ledger.resolve(&alert.id), Some(true));
        assert_eq!(ledger.resolve(&alert.id), Some(false));
        assert_eq!(ledger.acknowledge("no-such-alert"), None);
        assert_eq!(ledger.active_count(), 0);
    }

    #[test]
    fn test_re_raise_after_resolution() {
        let mut ledger = AlertLedger::new();
        let alert = ledger
            .raise("api", "check:api-ping:degraded", AlertSeverity::Medium, "m")
            .unwrap();
        ledger.resolve(&alert.id);
        assert!(ledger
            .raise("api", "check:api-ping:degraded", AlertSeverity::Medium, "again")
            .is_some());
    }

    #[test]
    fn test_recovery_resolves_component_alerts() {
        let mut ledger = AlertLedger::new();
        ledger
            .raise("api", "check:api-ping:degraded", AlertSeverity::Medium, "m")
            .unwrap();
        ledger
            .raise("api", "check:api-ping:unhealthy", AlertSeverity::High, "m")
            .unwrap();
        ledger
            .raise("db", "check:db-ping:degraded", AlertSeverity::Medium, "m")
            .unwrap();

        let resolved = ledger.resolve_for_component("api");
        assert_eq!(resolved.len(), 2);
        assert_eq!(ledger.active_count(), 1);
        // second recovery pass has nothing left to resolve
        assert!(ledger.resolve_for_component("api").is_empty());
    }
}
