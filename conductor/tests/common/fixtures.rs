//! Daemon fixture for end-to-end tests
//!
//! Boots the real daemon with all production services on an ephemeral
//! TCP port and a scratch Unix socket, with timings shrunk far enough
//! that lifecycle and liveness behavior is observable within a test.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use conductor::services::{BusTimings, ProbeFn, SupervisorTimings};
use conductor::{
    ConductorResult, Daemon, RealAuthenticator, RealConfigSource, RealHealthMonitor,
    RealMessageBus, RealSupervisor,
};
use shared::ProcessDescriptor;

fn test_supervisor_timings() -> SupervisorTimings {
    SupervisorTimings {
        stop_grace: Duration::from_millis(800),
        restart_backoff: Duration::from_millis(100),
        restart_settle: Duration::from_millis(20),
        poll_interval: Duration::from_millis(10),
    }
}

fn test_bus_timings() -> BusTimings {
    BusTimings {
        heartbeat_interval: Duration::from_millis(100),
        liveness_window: Duration::from_millis(400),
        auth_window: Duration::from_millis(300),
        default_request_timeout: Duration::from_millis(500),
    }
}

async fn free_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Builder for a running daemon with optional auth and custom probes
pub struct DaemonBuilder {
    token: Option<String>,
    probes: Vec<(String, ProbeFn)>,
}

impl DaemonBuilder {
    pub fn new() -> Self {
        Self {
            token: None,
            probes: Vec::new(),
        }
    }

    /// Require this token on the network transport
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Register an in-process predicate for custom health checks
    pub fn with_probe(mut self, name: &str, probe: ProbeFn) -> Self {
        self.probes.push((name.to_string(), probe));
        self
    }

    /// Boot the daemon and hand back its connection points
    pub async fn start(self) -> DaemonFixture {
        shared::ProcessId::init_daemon();

        let supervisor = RealSupervisor::with_timings(test_supervisor_timings());
        let health = RealHealthMonitor::new();
        for (name, probe) in self.probes {
            health.register_probe(&name, probe).await;
        }
        let bus = RealMessageBus::with_timings(
            Arc::new(RealAuthenticator::new(self.token)),
            test_bus_timings(),
        );
        let config = RealConfigSource::new();

        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("conductor.sock");
        let bind_addr = free_port().await;

        let mut daemon = Daemon::new(bus, config, health, supervisor);
        daemon.initialize(bind_addr, &socket_path).await.unwrap();
        let shutdown = daemon.get_shutdown_sender();
        let run_handle = tokio::spawn(async move { daemon.run().await });

        DaemonFixture {
            ws_url: format!("ws://{bind_addr}/ws"),
            socket_path,
            shutdown,
            run_handle,
            dir,
        }
    }
}

impl Default for DaemonBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A daemon running in the background of the test process
pub struct DaemonFixture {
    pub ws_url: String,
    pub socket_path: PathBuf,
    shutdown: mpsc::Sender<()>,
    run_handle: tokio::task::JoinHandle<ConductorResult<()>>,
    dir: tempfile::TempDir,
}

impl DaemonFixture {
    /// Scratch directory that outlives the test body
    pub fn scratch_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Signal shutdown and wait for the daemon loop to drain
    pub async fn stop(self) {
        let _ = self.shutdown.send(()).await;
        self.run_handle.await.unwrap().unwrap();
    }
}

/// Probe that reports whatever the flag currently holds
pub fn flag_probe(flag: Arc<AtomicBool>) -> ProbeFn {
    Arc::new(move || {
        let flag = Arc::clone(&flag);
        Box::pin(async move { flag.load(Ordering::SeqCst) })
    })
}

/// Descriptor for a child that exits nonzero once, then stays up
pub fn crash_once_descriptor(id: &str, scratch: &Path) -> ProcessDescriptor {
    let marker = scratch.join(format!("{id}.ran"));
    let script = format!(
        "if [ -f {marker} ]; then sleep 30; else touch {marker}; exit 1; fi",
        marker = marker.display()
    );
    ProcessDescriptor {
        id: id.to_string(),
        name: format!("{id} worker"),
        command: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script],
        working_dir: None,
        env: Default::default(),
        auto_restart: true,
        health_check: None,
    }
}
