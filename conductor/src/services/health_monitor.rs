//! Real health aggregation service implementation
//!
//! Schedules per-check probe tasks, tracks consecutive-failure streaks,
//! derives component and system health, and raises deduplicated alerts
//! through the shared ledger.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::core::health::{
    degraded_condition, derive_system, health_for_streak, unhealthy_condition, AlertLedger,
};
use crate::error::{ConductorError, ConductorResult};
use crate::traits::{HealthEvent, HealthMonitor};
use shared::{
    process_debug, process_info, process_warn, Alert, AlertSeverity, ComponentState,
    ComponentStatus, HealthCheckSpec, HealthEventPayload, HealthState, ProbeSpec,
    SystemHealthSnapshot,
};

/// In-process predicate invoked by `custom` probes
pub type ProbeFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// One scheduled check with its failure streak and scheduler task
struct CheckEntry {
    spec: HealthCheckSpec,
    streak: u32,
    task: Option<JoinHandle<()>>,
}

/// Real health monitor implementation
pub struct RealHealthMonitor {
    inner: Arc<MonitorInner>,
    /// Event receiver handed to the daemon on first take
    event_rx: Mutex<Option<mpsc::Receiver<HealthEvent>>>,
}

/// State shared with the per-check scheduler tasks
struct MonitorInner {
    checks: Mutex<HashMap<String, CheckEntry>>,
    components: Mutex<HashMap<String, ComponentStatus>>,
    alerts: Mutex<AlertLedger>,
    /// Named predicates for `custom` probes
    probes: Mutex<HashMap<String, ProbeFn>>,
    /// Last system health pushed to the event stream
    last_system: Mutex<HealthState>,
    event_tx: mpsc::Sender<HealthEvent>,
    monitoring: AtomicBool,
    http: reqwest::Client,
}

impl MonitorInner {
    fn emit(&self, event: HealthEvent) {
        // the daemon loop drains this continuously; drop on overflow
        let _ = self.event_tx.try_send(event);
    }
}

impl RealHealthMonitor {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            inner: Arc::new(MonitorInner {
                checks: Mutex::new(HashMap::new()),
                components: Mutex::new(HashMap::new()),
                alerts: Mutex::new(AlertLedger::new()),
                probes: Mutex::new(HashMap::new()),
                last_system: Mutex::new(HealthState::Unknown),
                event_tx,
                monitoring: AtomicBool::new(false),
                http: reqwest::Client::new(),
            }),
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Register a predicate for `custom` probes under a name
    pub async fn register_probe(&self, name: &str, probe: ProbeFn) {
        self.inner.probes.lock().await.insert(name.to_string(), probe);
    }
}

impl Default for RealHealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthMonitor for RealHealthMonitor {
    async fn add_check(&self, check: HealthCheckSpec) -> ConductorResult<()> {
        let mut checks = self.inner.checks.lock().await;
        if checks.contains_key(&check.id) {
            return Err(ConductorError::DuplicateRegistration {
                id: check.id.clone(),
            });
        }
        let id = check.id.clone();
        let task = if self.inner.monitoring.load(Ordering::SeqCst) {
            Some(tokio::spawn(run_check_loop(
                Arc::clone(&self.inner),
                id.clone(),
            )))
        } else {
            None
        };
        checks.insert(
            id.clone(),
            CheckEntry {
                spec: check,
                streak: 0,
                task,
            },
        );
        process_debug!(shared::ProcessId::current(), "🩺 Added health check {}", id);
        Ok(())
    }

    async fn remove_check(&self, check_id: &str) -> ConductorResult<()> {
        let mut checks = self.inner.checks.lock().await;
        if let Some(entry) = checks.remove(check_id) {
            if let Some(task) = entry.task {
                task.abort();
            }
            process_debug!(
                shared::ProcessId::current(),
                "🩺 Removed health check {}",
                check_id
            );
        }
        Ok(())
    }

    async fn register_component(&self, id: &str, depends_on: Vec<String>) -> ConductorResult<()> {
        let mut components = self.inner.components.lock().await;
        if components.contains_key(id) {
            return Err(ConductorError::DuplicateRegistration { id: id.to_string() });
        }
        for dep in &depends_on {
            let record = components
                .entry(dep.clone())
                .or_insert_with(|| blank_component(dep));
            if !record.dependents.contains(&id.to_string()) {
                record.dependents.push(id.to_string());
            }
        }
        let mut record = blank_component(id);
        record.depends_on = depends_on;
        components.insert(id.to_string(), record);
        Ok(())
    }

    async fn update_component_status(
        &self,
        id: &str,
        status: ComponentState,
        health: Option<HealthState>,
    ) -> ConductorResult<()> {
        let transition = {
            let mut components = self.inner.components.lock().await;
            let record = components
                .get_mut(id)
                .ok_or_else(|| ConductorError::not_registered(id))?;
            record.status = status;
            record.last_check = Utc::now();
            match health {
                Some(new_health) if new_health != record.health => {
                    let previous = record.health;
                    record.health = new_health;
                    Some((previous, new_health))
                }
                _ => None,
            }
        };

        if let Some((previous, current)) = transition {
            self.inner.emit(HealthEvent::Component(HealthEventPayload {
                component: id.to_string(),
                check: None,
                previous,
                current,
                recovered: false,
            }));
            republish_system(&self.inner).await;
        }
        Ok(())
    }

    async fn system_health(&self) -> SystemHealthSnapshot {
        build_system_snapshot(&self.inner).await
    }

    async fn active_alerts(&self) -> Vec<Alert> {
        self.inner.alerts.lock().await.active()
    }

    async fn acknowledge_alert(&self, alert_id: &str) -> ConductorResult<()> {
        self.inner
            .alerts
            .lock()
            .await
            .acknowledge(alert_id)
            .map(|_| ())
            .ok_or_else(|| ConductorError::not_registered(alert_id))
    }

    async fn resolve_alert(&self, alert_id: &str) -> ConductorResult<()> {
        self.inner
            .alerts
            .lock()
            .await
            .resolve(alert_id)
            .map(|_| ())
            .ok_or_else(|| ConductorError::not_registered(alert_id))
    }

    async fn start_monitoring(&self) -> ConductorResult<()> {
        self.inner.monitoring.store(true, Ordering::SeqCst);
        let mut checks = self.inner.checks.lock().await;
        for (id, entry) in checks.iter_mut() {
            if entry.task.is_none() {
                entry.task = Some(tokio::spawn(run_check_loop(
                    Arc::clone(&self.inner),
                    id.clone(),
                )));
            }
        }
        process_info!(
            shared::ProcessId::current(),
            "🩺 Health monitoring started ({} checks)",
            checks.len()
        );
        Ok(())
    }

    async fn stop_monitoring(&self) -> ConductorResult<()> {
        self.inner.monitoring.store(false, Ordering::SeqCst);
        let mut checks = self.inner.checks.lock().await;
        for entry in checks.values_mut() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
        }
        process_info!(shared::ProcessId::current(), "🩺 Health monitoring stopped");
        Ok(())
    }

    async fn restart_checks(&self) -> ConductorResult<()> {
        let monitoring = self.inner.monitoring.load(Ordering::SeqCst);
        let mut checks = self.inner.checks.lock().await;
        for (id, entry) in checks.iter_mut() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
            entry.streak = 0;
            if monitoring {
                entry.task = Some(tokio::spawn(run_check_loop(
                    Arc::clone(&self.inner),
                    id.clone(),
                )));
            }
        }
        process_info!(
            shared::ProcessId::current(),
            "🩺 Restarted {} health checks",
            checks.len()
        );
        Ok(())
    }

    async fn take_event_stream(&self) -> Option<mpsc::Receiver<HealthEvent>> {
        self.event_rx.lock().await.take()
    }
}

fn blank_component(id: &str) -> ComponentStatus {
    ComponentStatus {
        id: id.to_string(),
        status: ComponentState::Starting,
        health: HealthState::Unknown,
        metrics: HashMap::new(),
        depends_on: Vec::new(),
        dependents: Vec::new(),
        warnings: Vec::new(),
        last_check: Utc::now(),
    }
}

/// Scheduler loop for one check; first probe fires immediately
async fn run_check_loop(inner: Arc<MonitorInner>, check_id: String) {
    let interval = {
        let checks = inner.checks.lock().await;
        let Some(entry) = checks.get(&check_id) else {
            return;
        };
        entry.spec.interval()
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let spec = {
            let checks = inner.checks.lock().await;
            match checks.get(&check_id) {
                Some(entry) => entry.spec.clone(),
                None => return,
            }
        };
        let passed = execute_probe(&inner, &spec).await;
        record_result(&inner, &check_id, passed).await;
    }
}

/// Run one probe bounded by the check's timeout
async fn execute_probe(inner: &Arc<MonitorInner>, spec: &HealthCheckSpec) -> bool {
    match &spec.probe {
        ProbeSpec::Http { url } => {
            let request = inner.http.get(url).send();
            match tokio::time::timeout(spec.timeout(), request).await {
                Ok(Ok(response)) => response.status().is_success(),
                Ok(Err(_)) | Err(_) => false,
            }
        }
        ProbeSpec::Custom { name } => {
            let probe = inner.probes.lock().await.get(name).cloned();
            match probe {
                Some(probe) => match tokio::time::timeout(spec.timeout(), probe()).await {
                    Ok(passed) => passed,
                    Err(_) => false,
                },
                None => {
                    process_warn!(
                        shared::ProcessId::current(),
                        "⚠️ Check {} references unknown probe '{}'",
                        spec.id,
                        name
                    );
                    false
                }
            }
        }
    }
}

/// Fold a probe result into the streak and drive the health transitions
async fn record_result(inner: &Arc<MonitorInner>, check_id: &str, passed: bool) {
    // the check may have been removed while the probe was in flight
    let (spec, streak, had_failures) = {
        let mut checks = inner.checks.lock().await;
        let Some(entry) = checks.get_mut(check_id) else {
            return;
        };
        let had_failures = entry.streak > 0;
        if passed {
            entry.streak = 0;
        } else {
            entry.streak += 1;
        }
        (entry.spec.clone(), entry.streak, had_failures)
    };
    let component = spec.component.clone();

    if passed {
        let previous = set_component_health(inner, &component, HealthState::Healthy).await;
        if previous != HealthState::Healthy {
            let resolved = inner.alerts.lock().await.resolve_for_component(&component);
            if had_failures {
                process_info!(
                    shared::ProcessId::current(),
                    "✅ {} recovered, auto-resolved {} alert(s)",
                    component,
                    resolved.len()
                );
            }
            inner.emit(HealthEvent::Component(HealthEventPayload {
                component: component.clone(),
                check: Some(spec.id.clone()),
                previous,
                current: HealthState::Healthy,
                recovered: had_failures,
            }));
            republish_system(inner).await;
        }
        return;
    }

    let Some(new_health) = health_for_streak(streak, spec.max_failures) else {
        return;
    };
    let previous = set_component_health(inner, &component, new_health).await;
    let (condition, severity) = match new_health {
        HealthState::Unhealthy => (unhealthy_condition(&spec.id), AlertSeverity::High),
        _ => (degraded_condition(&spec.id), AlertSeverity::Medium),
    };
    let alert = inner.alerts.lock().await.raise(
        &component,
        &condition,
        severity,
        format!("check {} failed {} consecutive time(s)", spec.id, streak),
    );

    process_warn!(
        shared::ProcessId::current(),
        "⚠️ {} is {} after {} consecutive failures of {}",
        component,
        new_health,
        streak,
        spec.id
    );
    inner.emit(HealthEvent::Component(HealthEventPayload {
        component: component.clone(),
        check: Some(spec.id.clone()),
        previous,
        current: new_health,
        recovered: false,
    }));
    if let Some(alert) = alert {
        inner.emit(HealthEvent::Alert(alert));
    }
    republish_system(inner).await;
}

/// Set a component's derived health, creating the record on first contact.
///
/// # Returns
/// The previous health state.
async fn set_component_health(
    inner: &Arc<MonitorInner>,
    id: &str,
    health: HealthState,
) -> HealthState {
    let mut components = inner.components.lock().await;
    let record = components
        .entry(id.to_string())
        .or_insert_with(|| ComponentStatus {
            status: ComponentState::Running,
            ..blank_component(id)
        });
    let previous = record.health;
    record.health = health;
    record.last_check = Utc::now();
    previous
}

async fn build_system_snapshot(inner: &Arc<MonitorInner>) -> SystemHealthSnapshot {
    let components: HashMap<String, HealthState> = {
        let records = inner.components.lock().await;
        records
            .iter()
            .map(|(id, record)| (id.clone(), record.health))
            .collect()
    };
    let status = derive_system(components.values().copied());
    let active_alerts = inner.alerts.lock().await.active_count();
    SystemHealthSnapshot {
        status,
        components,
        active_alerts,
        generated_at: Utc::now(),
    }
}

/// Push a fresh system snapshot when the rolled-up status changed
async fn republish_system(inner: &Arc<MonitorInner>) {
    let snapshot = build_system_snapshot(inner).await;
    let mut last = inner.last_system.lock().await;
    if *last != snapshot.status {
        *last = snapshot.status;
        drop(last);
        inner.emit(HealthEvent::System(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(id: &str, component: &str) -> HealthCheckSpec {
        HealthCheckSpec {
            id: id.to_string(),
            component: component.to_string(),
            probe: ProbeSpec::Custom {
                name: "always-up".to_string(),
            },
            interval_ms: 50,
            timeout_ms: 25,
            max_failures: 3,
        }
    }

    #[tokio::test]
    async fn test_duplicate_check_rejected() {
        shared::ProcessId::init_daemon();
        let monitor = RealHealthMonitor::new();
        monitor.add_check(check("ping", "api")).await.unwrap();
        let err = monitor.add_check(check("ping", "api")).await.unwrap_err();
        assert!(matches!(err, ConductorError::DuplicateRegistration { .. }));
    }

    #[tokio::test]
    async fn test_remove_check_idempotent() {
        shared::ProcessId::init_daemon();
        let monitor = RealHealthMonitor::new();
        monitor.add_check(check("ping", "api")).await.unwrap();
        monitor.remove_check("ping").await.unwrap();
        monitor.remove_check("ping").await.unwrap();
        monitor.remove_check("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_register_component_wires_dependents() {
        let monitor = RealHealthMonitor::new();
        monitor
            .register_component("api", vec!["db".to_string()])
            .await
            .unwrap();

        let snapshot = monitor.system_health().await;
        assert!(snapshot.components.contains_key("api"));
        assert!(snapshot.components.contains_key("db"));

        let err = monitor
            .register_component("api", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::DuplicateRegistration { .. }));
    }

    #[tokio::test]
    async fn test_update_unknown_component() {
        let monitor = RealHealthMonitor::new();
        let err = monitor
            .update_component_status("ghost", ComponentState::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::NotRegistered { .. }));
    }

    #[tokio::test]
    async fn test_unknown_alert_ids() {
        let monitor = RealHealthMonitor::new();
        assert!(monitor.acknowledge_alert("nope").await.is_err());
        assert!(monitor.resolve_alert("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_system_is_healthy() {
        let monitor = RealHealthMonitor::new();
        let snapshot = monitor.system_health().await;
        assert_eq!(snapshot.status, HealthState::Healthy);
        assert_eq!(snapshot.active_alerts, 0);
        assert!(snapshot.components.is_empty());
    }

    #[tokio::test]
    async fn test_event_stream_taken_once() {
        let monitor = RealHealthMonitor::new();
        assert!(monitor.take_event_stream().await.is_some());
        assert!(monitor.take_event_stream().await.is_none());
    }
}
