//! Real process supervision service implementation
//!
//! Spawns and monitors registered child processes with output capture,
//! graceful stop with force-kill escalation, and automatic restart of
//! processes that exit unexpectedly.

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};

use crate::core::lifecycle::{can_transition, decide_exit, ExitDecision, StopIntent};
use crate::core::registry::{LogRing, ProcessRecord};
use crate::error::{ConductorError, ConductorResult};
use crate::traits::{Supervisor, SupervisorEvent};
use shared::{
    process_debug, process_error, process_info, process_warn, LogEntryPayload, LogStream,
    ProcessDescriptor, ProcessEvent, ProcessEventPayload, ProcessRunState, ProcessSnapshot,
};

/// Timing knobs for the supervisor; defaults match production behavior
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    /// Window a child gets between SIGTERM and SIGKILL
    pub stop_grace: Duration,
    /// Delay before an automatic respawn after an unexpected exit
    pub restart_backoff: Duration,
    /// Pause between the old child leaving and a manual restart spawning
    pub restart_settle: Duration,
    /// Poll cadence while waiting for a child to settle
    pub poll_interval: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(10),
            restart_backoff: Duration::from_secs(5),
            restart_settle: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Real process supervisor implementation
pub struct RealSupervisor {
    inner: Arc<SupervisorInner>,
    /// Event receiver handed to the daemon on first take
    event_rx: Mutex<Option<mpsc::Receiver<SupervisorEvent>>>,
}

/// State shared with the pump, waiter, and restart tasks
struct SupervisorInner {
    /// Registered processes keyed by id
    registry: Mutex<HashMap<String, ProcessRecord>>,
    /// Lifecycle and log events toward the daemon loop
    event_tx: mpsc::Sender<SupervisorEvent>,
    timings: SupervisorTimings,
    shutting_down: AtomicBool,
}

impl SupervisorInner {
    fn emit(&self, event: SupervisorEvent) {
        // the daemon loop drains this continuously; drop on overflow
        let _ = self.event_tx.try_send(event);
    }

    fn emit_process(&self, id: &str, event: ProcessEvent) {
        self.emit(SupervisorEvent::Process(ProcessEventPayload {
            id: id.to_string(),
            event,
        }));
    }
}

impl RealSupervisor {
    /// Create a supervisor with production timings
    pub fn new() -> Self {
        Self::with_timings(SupervisorTimings::default())
    }

    /// Create a supervisor with explicit timings
    pub fn with_timings(timings: SupervisorTimings) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            inner: Arc::new(SupervisorInner {
                registry: Mutex::new(HashMap::new()),
                event_tx,
                timings,
                shutting_down: AtomicBool::new(false),
            }),
            event_rx: Mutex::new(Some(event_rx)),
        }
    }
}

impl Default for RealSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Supervisor for RealSupervisor {
    async fn register(&self, descriptor: ProcessDescriptor) -> ConductorResult<()> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(ConductorError::ShuttingDown);
        }
        let id = descriptor.id.clone();
        let mut registry = self.inner.registry.lock().await;
        match registry.entry(id.clone()) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().descriptor = descriptor;
                process_debug!(
                    shared::ProcessId::current(),
                    "📋 Updated descriptor for {}",
                    id
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(ProcessRecord::new(descriptor));
                process_debug!(shared::ProcessId::current(), "📋 Registered process {}", id);
            }
        }
        Ok(())
    }

    async fn start(&self, id: &str) -> ConductorResult<()> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(ConductorError::ShuttingDown);
        }
        spawn_process(&self.inner, id, false).await
    }

    async fn stop(&self, id: &str) -> ConductorResult<()> {
        enum StopPlan {
            AlreadyDown,
            CancelledRestart,
            Signal(Option<u32>),
        }

        let plan = {
            let mut registry = self.inner.registry.lock().await;
            let record = registry
                .get_mut(id)
                .ok_or_else(|| ConductorError::not_registered(id))?;
            match record.state {
                ProcessRunState::Stopped | ProcessRunState::Error => StopPlan::AlreadyDown,
                ProcessRunState::Restarting => {
                    if let Some(task) = record.restart_task.take() {
                        task.abort();
                    }
                    if record.pid.is_none()
                        && can_transition(record.state, ProcessRunState::Stopped)
                    {
                        // no child alive; cancelling the pending start is the stop
                        record.state = ProcessRunState::Stopped;
                        record.intent = StopIntent::None;
                        StopPlan::CancelledRestart
                    } else {
                        record.intent = StopIntent::Stop;
                        StopPlan::Signal(record.pid)
                    }
                }
                ProcessRunState::Running | ProcessRunState::Starting => {
                    record.intent = StopIntent::Stop;
                    StopPlan::Signal(record.pid)
                }
            }
        };

        match plan {
            StopPlan::AlreadyDown => Ok(()),
            StopPlan::CancelledRestart => {
                self.inner
                    .emit_process(id, ProcessEvent::Stopped { exit_code: None });
                process_info!(
                    shared::ProcessId::current(),
                    "🛑 Cancelled pending restart of {}",
                    id
                );
                Ok(())
            }
            StopPlan::Signal(pid) => {
                if let Some(pid) = pid {
                    send_signal(pid, Signal::SIGTERM);
                }
                if !await_settled(&self.inner, id, self.inner.timings.stop_grace).await {
                    let live = self.inner.registry.lock().await.get(id).and_then(|r| r.pid);
                    if let Some(pid) = live {
                        process_warn!(
                            shared::ProcessId::current(),
                            "⚠️ Process {} ignored SIGTERM, sending SIGKILL",
                            id
                        );
                        send_signal(pid, Signal::SIGKILL);
                    }
                    await_settled(&self.inner, id, self.inner.timings.stop_grace).await;
                }
                process_info!(shared::ProcessId::current(), "🛑 Stopped {}", id);
                Ok(())
            }
        }
    }

    async fn restart(&self, id: &str) -> ConductorResult<()> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(ConductorError::ShuttingDown);
        }

        enum RestartPlan {
            Noop,
            /// No child alive; announce and spawn directly
            Immediate(u32),
            /// Stop the child first; the spawned task finishes the job
            StopFirst(u32),
        }

        let plan = {
            let mut registry = self.inner.registry.lock().await;
            let record = registry
                .get_mut(id)
                .ok_or_else(|| ConductorError::not_registered(id))?;
            match record.state {
                ProcessRunState::Restarting | ProcessRunState::Starting => RestartPlan::Noop,
                ProcessRunState::Stopped | ProcessRunState::Error => {
                    record.restart_count += 1;
                    RestartPlan::Immediate(record.restart_count)
                }
                ProcessRunState::Running => {
                    record.state = ProcessRunState::Restarting;
                    record.restart_count += 1;
                    record.intent = StopIntent::Restart;
                    if let Some(task) = record.restart_task.take() {
                        task.abort();
                    }
                    let task = tokio::spawn(restart_after_stop(
                        Arc::clone(&self.inner),
                        id.to_string(),
                        record.pid,
                    ));
                    record.restart_task = Some(task);
                    RestartPlan::StopFirst(record.restart_count)
                }
            }
        };

        match plan {
            RestartPlan::Noop => Ok(()),
            RestartPlan::Immediate(count) => {
                process_info!(shared::ProcessId::current(), "🔄 Restarting {}", id);
                self.inner
                    .emit_process(id, ProcessEvent::Restarting { restart_count: count });
                spawn_process(&self.inner, id, false).await
            }
            RestartPlan::StopFirst(count) => {
                process_info!(shared::ProcessId::current(), "🔄 Restarting {}", id);
                self.inner
                    .emit_process(id, ProcessEvent::Restarting { restart_count: count });
                Ok(())
            }
        }
    }

    async fn status(&self, id: &str) -> ConductorResult<ProcessSnapshot> {
        let registry = self.inner.registry.lock().await;
        registry
            .get(id)
            .map(|record| record.snapshot())
            .ok_or_else(|| ConductorError::not_registered(id))
    }

    async fn all_statuses(&self) -> Vec<ProcessSnapshot> {
        let registry = self.inner.registry.lock().await;
        let mut snapshots: Vec<ProcessSnapshot> =
            registry.values().map(|record| record.snapshot()).collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    async fn descriptor(&self, id: &str) -> ConductorResult<ProcessDescriptor> {
        let registry = self.inner.registry.lock().await;
        registry
            .get(id)
            .map(|record| record.descriptor.clone())
            .ok_or_else(|| ConductorError::not_registered(id))
    }

    async fn take_event_stream(&self) -> Option<mpsc::Receiver<SupervisorEvent>> {
        self.event_rx.lock().await.take()
    }

    async fn shutdown(&self) -> ConductorResult<()> {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        process_info!(shared::ProcessId::current(), "🛑 Stopping all processes");

        let ids: Vec<String> = self.inner.registry.lock().await.keys().cloned().collect();
        for id in &ids {
            let pid = {
                let mut registry = self.inner.registry.lock().await;
                let Some(record) = registry.get_mut(id) else {
                    continue;
                };
                if let Some(task) = record.restart_task.take() {
                    task.abort();
                }
                if matches!(
                    record.state,
                    ProcessRunState::Stopped | ProcessRunState::Error
                ) {
                    continue;
                }
                record.intent = StopIntent::Stop;
                record.pid
            };
            if let Some(pid) = pid {
                send_signal(pid, Signal::SIGTERM);
            }
        }

        if !await_all_settled(&self.inner, &ids, self.inner.timings.stop_grace).await {
            for id in &ids {
                let live = self.inner.registry.lock().await.get(id).and_then(|r| r.pid);
                if let Some(pid) = live {
                    process_warn!(
                        shared::ProcessId::current(),
                        "⚠️ Force-killing {} during shutdown",
                        id
                    );
                    send_signal(pid, Signal::SIGKILL);
                }
            }
            await_all_settled(&self.inner, &ids, self.inner.timings.stop_grace).await;
        }

        let mut registry = self.inner.registry.lock().await;
        for record in registry.values_mut() {
            record.abort_tasks();
        }
        process_info!(shared::ProcessId::current(), "🛑 All processes stopped");
        Ok(())
    }
}

/// Spawn the child for a registered process and wire up its tasks.
///
/// `from_restart` marks calls from restart tasks: they only proceed if the
/// record is still `restarting`, so a stop issued during the backoff wins.
async fn spawn_process(
    inner: &Arc<SupervisorInner>,
    id: &str,
    from_restart: bool,
) -> ConductorResult<()> {
    let descriptor = {
        let mut registry = inner.registry.lock().await;
        let record = registry
            .get_mut(id)
            .ok_or_else(|| ConductorError::not_registered(id))?;
        if from_restart {
            if record.state != ProcessRunState::Restarting {
                return Ok(());
            }
        } else if record.state == ProcessRunState::Restarting
            || !can_transition(record.state, ProcessRunState::Starting)
        {
            return Ok(());
        }
        record.intent = StopIntent::None;
        record.state = ProcessRunState::Starting;
        record.last_error = None;
        record.descriptor.clone()
    };
    inner.emit_process(id, ProcessEvent::Starting);

    let mut command = Command::new(&descriptor.command);
    command
        .args(&descriptor.args)
        .envs(&descriptor.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &descriptor.working_dir {
        command.current_dir(dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            let message = e.to_string();
            {
                let mut registry = inner.registry.lock().await;
                if let Some(record) = registry.get_mut(id) {
                    record.state = ProcessRunState::Error;
                    record.last_error = Some(message.clone());
                }
            }
            process_error!(
                shared::ProcessId::current(),
                "❌ Failed to spawn {}: {}",
                id,
                message
            );
            inner.emit_process(
                id,
                ProcessEvent::Failed {
                    error: message.clone(),
                },
            );
            return Err(ConductorError::SpawnFailure {
                id: id.to_string(),
                message,
            });
        }
    };

    let pid = child.id().unwrap_or(0);
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stop_requested = {
        let mut registry = inner.registry.lock().await;
        let Some(record) = registry.get_mut(id) else {
            let _ = child.kill().await;
            return Err(ConductorError::not_registered(id));
        };
        record.pid = Some(pid);
        record.started_at = Some(chrono::Utc::now());
        record.state = ProcessRunState::Running;

        if let Some(stdout) = stdout {
            record.pump_tasks.push(tokio::spawn(pump_output(
                Arc::clone(inner),
                id.to_string(),
                LogStream::Stdout,
                stdout,
                Arc::clone(&record.logs),
            )));
        }
        if let Some(stderr) = stderr {
            record.pump_tasks.push(tokio::spawn(pump_output(
                Arc::clone(inner),
                id.to_string(),
                LogStream::Stderr,
                stderr,
                Arc::clone(&record.logs),
            )));
        }

        let waiter_inner = Arc::clone(inner);
        let waiter_id = id.to_string();
        record.waiter_task = Some(tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(_) => None,
            };
            handle_exit(&waiter_inner, &waiter_id, exit_code).await;
        }));

        record.intent == StopIntent::Stop
    };

    process_info!(
        shared::ProcessId::current(),
        "🚀 Started {} (PID {})",
        id,
        pid
    );
    inner.emit_process(id, ProcessEvent::Started { pid });

    // a stop raced the spawn; honor it now that the child exists
    if stop_requested {
        send_signal(pid, Signal::SIGTERM);
    }
    Ok(())
}

/// Classify a child exit and drive the follow-up transition
async fn handle_exit(inner: &Arc<SupervisorInner>, id: &str, exit_code: Option<i32>) {
    enum Outcome {
        Stopped,
        Failed(String),
        AutoRestart(u32),
        ManualRestart,
    }

    let outcome = {
        let mut registry = inner.registry.lock().await;
        let Some(record) = registry.get_mut(id) else {
            return;
        };
        record.pid = None;
        // pumps finish on their own at EOF; detach the handles
        record.pump_tasks.clear();
        record.waiter_task = None;

        let was_manual_restart = record.intent == StopIntent::Restart;
        let decision = decide_exit(record.intent, record.descriptor.auto_restart, exit_code);
        record.intent = StopIntent::None;

        match decision {
            ExitDecision::Stopped => {
                record.state = ProcessRunState::Stopped;
                Outcome::Stopped
            }
            ExitDecision::Failed => {
                let message = match exit_code {
                    Some(code) => format!("exited with code {code}"),
                    None => "terminated by signal".to_string(),
                };
                record.state = ProcessRunState::Error;
                record.last_error = Some(message.clone());
                Outcome::Failed(message)
            }
            ExitDecision::Restart if was_manual_restart => {
                // the manual restart task owns the respawn
                Outcome::ManualRestart
            }
            ExitDecision::Restart => {
                record.state = ProcessRunState::Restarting;
                record.restart_count += 1;
                let count = record.restart_count;
                let backoff = inner.timings.restart_backoff;
                let backoff_inner = Arc::clone(inner);
                let backoff_id = id.to_string();
                record.restart_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(backoff).await;
                    if let Err(e) = spawn_process(&backoff_inner, &backoff_id, true).await {
                        process_warn!(
                            shared::ProcessId::current(),
                            "⚠️ Automatic restart of {} failed: {}",
                            backoff_id,
                            e
                        );
                    }
                }));
                Outcome::AutoRestart(count)
            }
        }
    };

    match outcome {
        Outcome::Stopped => inner.emit_process(id, ProcessEvent::Stopped { exit_code }),
        Outcome::Failed(error) => {
            process_error!(
                shared::ProcessId::current(),
                "❌ Process {} failed: {}",
                id,
                error
            );
            inner.emit_process(id, ProcessEvent::Failed { error });
        }
        Outcome::AutoRestart(count) => {
            process_warn!(
                shared::ProcessId::current(),
                "🔄 Process {} exited unexpectedly, restart #{} after backoff",
                id,
                count
            );
            inner.emit_process(id, ProcessEvent::Restarting { restart_count: count });
        }
        Outcome::ManualRestart => {}
    }
}

/// Drive a manual restart: wait out the old child, settle, respawn
async fn restart_after_stop(inner: Arc<SupervisorInner>, id: String, pid: Option<u32>) {
    if let Some(pid) = pid {
        send_signal(pid, Signal::SIGTERM);
    }

    let deadline = tokio::time::Instant::now() + inner.timings.stop_grace;
    let mut force_killed = false;
    loop {
        {
            let registry = inner.registry.lock().await;
            match registry.get(&id) {
                None => return,
                Some(record) => {
                    // a stop during the window moved the record on; stand down
                    if record.state != ProcessRunState::Restarting {
                        return;
                    }
                    if record.pid.is_none() {
                        break;
                    }
                }
            }
        }
        if !force_killed && tokio::time::Instant::now() >= deadline {
            let live = inner.registry.lock().await.get(&id).and_then(|r| r.pid);
            if let Some(pid) = live {
                send_signal(pid, Signal::SIGKILL);
            }
            force_killed = true;
        }
        tokio::time::sleep(inner.timings.poll_interval).await;
    }

    tokio::time::sleep(inner.timings.restart_settle).await;
    if let Err(e) = spawn_process(&inner, &id, true).await {
        process_warn!(
            shared::ProcessId::current(),
            "⚠️ Restart of {} failed to spawn: {}",
            id,
            e
        );
    }
}

/// Forward captured output lines into the ring and onto the event stream
async fn pump_output<R>(
    inner: Arc<SupervisorInner>,
    id: String,
    stream: LogStream,
    reader: R,
    logs: Arc<std::sync::Mutex<LogRing>>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let entry = match logs.lock() {
            Ok(mut ring) => ring.push(stream, line),
            Err(_) => continue,
        };
        inner.emit(SupervisorEvent::Log(LogEntryPayload {
            process: id.clone(),
            stream: entry.stream,
            line: entry.line,
            timestamp: entry.timestamp,
        }));
    }
}

/// Poll until the process reaches a resting state or the window closes
async fn await_settled(inner: &Arc<SupervisorInner>, id: &str, window: Duration) -> bool {
    let ids = [id.to_string()];
    await_all_settled(inner, &ids, window).await
}

async fn await_all_settled(
    inner: &Arc<SupervisorInner>,
    ids: &[String],
    window: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let all_settled = {
            let registry = inner.registry.lock().await;
            ids.iter().all(|id| match registry.get(id) {
                None => true,
                Some(record) => matches!(
                    record.state,
                    ProcessRunState::Stopped | ProcessRunState::Error
                ),
            })
        };
        if all_settled {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(inner.timings.poll_interval).await;
    }
}

fn send_signal(pid: u32, sig: Signal) {
    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), sig) {
        tracing::debug!("Signal {sig} to pid {pid} failed: {e}");
    }
}
