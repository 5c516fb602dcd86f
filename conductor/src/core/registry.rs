//! Process registry records and the bounded log ring
//!
//! Bookkeeping shared between the supervisor's command path and its
//! background tasks (output pumps, exit waiters, restart timers).

use crate::core::lifecycle::StopIntent;
use chrono::{DateTime, Utc};
use shared::{LogLine, LogStream, ProcessDescriptor, ProcessRunState, ProcessSnapshot};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Default number of captured output lines retained per process
pub const LOG_RING_CAPACITY: usize = 1000;

/// Bounded ring of captured child output lines.
///
/// Oldest lines are evicted once the ring is full. Pushes return the
/// stamped line so the caller can re-emit it on the bus.
#[derive(Debug)]
pub struct LogRing {
    lines: VecDeque<LogLine>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Stamp and retain one output line, evicting the oldest if full
    pub fn push(&mut self, stream: LogStream, line: String) -> LogLine {
        let entry = LogLine {
            stream,
            line,
            timestamp: Utc::now(),
        };
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(entry.clone());
        entry
    }

    /// All retained lines, oldest first
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(LOG_RING_CAPACITY)
    }
}

/// Everything the supervisor tracks for one registered process
#[derive(Debug)]
pub struct ProcessRecord {
    /// Immutable configuration supplied at registration
    pub descriptor: ProcessDescriptor,
    /// Current lifecycle state
    pub state: ProcessRunState,
    /// OS pid while a child is alive
    pub pid: Option<u32>,
    /// When the current child was spawned
    pub started_at: Option<DateTime<Utc>>,
    /// Cumulative restarts, manual and automatic
    pub restart_count: u32,
    /// Message from the most recent failure
    pub last_error: Option<String>,
    /// Captured output, shared with the pump tasks
    pub logs: Arc<Mutex<LogRing>>,
    /// Why a stop is in flight, if one is
    pub intent: StopIntent,
    /// stdout/stderr pump tasks for the current child
    pub pump_tasks: Vec<JoinHandle<()>>,
    /// Task awaiting the current child's exit
    pub waiter_task: Option<JoinHandle<()>>,
    /// Pending backoff or manual-restart task
    pub restart_task: Option<JoinHandle<()>>,
}

impl ProcessRecord {
    pub fn new(descriptor: ProcessDescriptor) -> Self {
        Self {
            descriptor,
            state: ProcessRunState::Stopped,
            pid: None,
            started_at: None,
            restart_count: 0,
            last_error: None,
            logs: Arc::new(Mutex::new(LogRing::default())),
            intent: StopIntent::None,
            pump_tasks: Vec::new(),
            waiter_task: None,
            restart_task: None,
        }
    }

    /// Point-in-time status view, including retained logs
    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            id: self.descriptor.id.clone(),
            name: self.descriptor.name.clone(),
            state: self.state,
            pid: self.pid,
            started_at: self.started_at,
            restart_count: self.restart_count,
            last_error: self.last_error.clone(),
            recent_logs: self
                .logs
                .lock()
                .map(|ring| ring.snapshot())
                .unwrap_or_default(),
        }
    }

    /// Abort every background task tied to the current child
    pub fn abort_tasks(&mut self) {
        for task in self.pump_tasks.drain(..) {
            task.abort();
        }
        if let Some(task) = self.waiter_task.take() {
            task.abort();
        }
        if let Some(task) = self.restart_task.take() {
            task.abort();
        }
    }
}
