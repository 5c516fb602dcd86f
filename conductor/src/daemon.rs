//! Main daemon implementation
//!
//! This is the primary daemon that coordinates the supervisor, message bus,
//! and health monitor, and manages the overall system state using dependency
//! injection.

use std::net::SocketAddr;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use serde_json::json;
use shared::{
    kinds, logging, process_debug, process_error, process_info, process_warn, topics,
    AlertListPayload, ComponentState, HealthCommand, HealthState, MessageEnvelope, ProcessCommand,
    ProcessEvent, ProcessId, ProcessStatusList, SessionId,
};

use crate::{
    core::{router::DAEMON_SOURCE, DaemonState},
    error::{ConductorError, ConductorResult},
    traits::{
        ConfigChange, ConfigSource, HealthEvent, HealthMonitor, InboundEnvelope, MessageBus,
        Supervisor, SupervisorEvent,
    },
};

/// Main daemon that coordinates the entire control plane
pub struct Daemon<B, C, H, S>
where
    B: MessageBus + Send + Sync + 'static,
    C: ConfigSource + Send + Sync + 'static,
    H: HealthMonitor + Send + Sync + 'static,
    S: Supervisor + Send + Sync + 'static,
{
    /// Core state bookkeeping
    state: DaemonState,

    /// Injected services
    bus: B,
    config: C,
    health: H,
    supervisor: S,

    /// Active event receivers
    bus_rx: Option<mpsc::Receiver<InboundEnvelope>>,
    supervisor_rx: Option<mpsc::Receiver<SupervisorEvent>>,
    health_rx: Option<mpsc::Receiver<HealthEvent>>,
    config_rx: Option<mpsc::Receiver<ConfigChange>>,

    /// Shutdown signal
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<B, C, H, S> Daemon<B, C, H, S>
where
    B: MessageBus + Send + Sync + 'static,
    C: ConfigSource + Send + Sync + 'static,
    H: HealthMonitor + Send + Sync + 'static,
    S: Supervisor + Send + Sync + 'static,
{
    /// Create new daemon with injected dependencies
    pub fn new(bus: B, config: C, health: H, supervisor: S) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            state: DaemonState::new(),
            bus,
            config,
            health,
            supervisor,
            bus_rx: None,
            supervisor_rx: None,
            health_rx: None,
            config_rx: None,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Initialize the daemon: start both transports and take event streams
    pub async fn initialize(
        &mut self,
        bind_addr: SocketAddr,
        socket_path: &Path,
    ) -> ConductorResult<()> {
        logging::log_startup(ProcessId::current(), "conductor daemon");

        self.bus.start_network(bind_addr).await?;
        self.bus.start_local(socket_path).await?;
        process_debug!(ProcessId::current(), "🌐 Network transport: {}", bind_addr);
        process_debug!(
            ProcessId::current(),
            "🔌 Local transport: {}",
            socket_path.display()
        );

        self.bus_rx = self.bus.take_inbound().await;
        self.supervisor_rx = self.supervisor.take_event_stream().await;
        self.health_rx = self.health.take_event_stream().await;
        self.config_rx = self.config.take_change_stream().await;

        self.health.start_monitoring().await?;

        logging::log_success(ProcessId::current(), "Daemon initialized successfully");
        Ok(())
    }

    /// Main event loop: drains inbound envelopes and service events
    pub async fn run(&mut self) -> ConductorResult<()> {
        process_info!(ProcessId::current(), "🚀 Daemon event loop started");
        let mut status_interval = interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                // Envelopes addressed at the daemon from either transport
                Some(inbound) = async {
                    if let Some(rx) = &mut self.bus_rx {
                        rx.recv().await
                    } else {
                        None
                    }
                } => {
                    if let Err(e) = self.handle_inbound(inbound).await {
                        process_error!(ProcessId::current(), "❌ Error handling inbound envelope: {}", e);
                    }
                },

                // Lifecycle and log events from the supervisor
                Some(event) = async {
                    if let Some(rx) = &mut self.supervisor_rx {
                        rx.recv().await
                    } else {
                        None
                    }
                } => {
                    if let Err(e) = self.handle_supervisor_event(event).await {
                        process_error!(ProcessId::current(), "❌ Error handling process event: {}", e);
                    }
                },

                // Component, alert, and system events from the health monitor
                Some(event) = async {
                    if let Some(rx) = &mut self.health_rx {
                        rx.recv().await
                    } else {
                        None
                    }
                } => {
                    if let Err(e) = self.handle_health_event(event).await {
                        process_error!(ProcessId::current(), "❌ Error handling health event: {}", e);
                    }
                },

                // Configuration changes
                Some(change) = async {
                    if let Some(rx) = &mut self.config_rx {
                        rx.recv().await
                    } else {
                        None
                    }
                } => {
                    if let Err(e) = self.handle_config_change(change).await {
                        process_error!(ProcessId::current(), "❌ Error applying config change: {}", e);
                    }
                },

                // Periodic system health publication
                _ = status_interval.tick() => {
                    if let Err(e) = self.publish_system_health().await {
                        process_error!(ProcessId::current(), "⚠️ Error publishing system health: {}", e);
                    }
                },

                // Shutdown signal
                Some(_) = self.shutdown_rx.recv() => {
                    process_debug!(ProcessId::current(), "🛑 Shutting down daemon...");
                    self.shutdown().await?;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Route one daemon-addressed envelope to its command handler
    async fn handle_inbound(&mut self, inbound: InboundEnvelope) -> ConductorResult<()> {
        let InboundEnvelope { session, envelope } = inbound;
        self.state.record_envelope();

        match envelope.kind.as_str() {
            kinds::PROCESS_COMMAND => {
                self.state.record_command();
                self.handle_process_command(&session, &envelope).await
            }
            kinds::HEALTH_COMMAND => {
                self.state.record_command();
                self.handle_health_command(&session, &envelope).await
            }
            kinds::SYSTEM_STATUS => {
                self.state.record_command();
                self.handle_system_status(&session, &envelope).await
            }
            other => {
                let err = ConductorError::malformed(format!("unsupported message type '{other}'"));
                self.send_reply(&session, err_reply(&envelope, &err)).await;
                Ok(())
            }
        }
    }

    /// Handle a `process_command` envelope
    async fn handle_process_command(
        &mut self,
        session: &SessionId,
        request: &MessageEnvelope,
    ) -> ConductorResult<()> {
        let command: ProcessCommand = match request.parse_payload() {
            Ok(command) => command,
            Err(e) => {
                let err = ConductorError::malformed(e.to_string());
                self.send_reply(session, err_reply(request, &err)).await;
                return Ok(());
            }
        };

        let reply = match command {
            ProcessCommand::Register { descriptor } => {
                let id = descriptor.id.clone();
                match self.supervisor.register(descriptor).await {
                    Ok(()) => {
                        // A process is also a trackable component; re-registration
                        // keeps the existing component entry
                        match self.health.register_component(&id, vec![]).await {
                            Ok(()) | Err(ConductorError::DuplicateRegistration { .. }) => {}
                            Err(e) => process_warn!(
                                ProcessId::current(),
                                "⚠️ Component registration for {} failed: {}",
                                id,
                                e
                            ),
                        }
                        ack_reply(request, json!({ "registered": id }))
                    }
                    Err(e) => err_reply(request, &e),
                }
            }

            ProcessCommand::Start { id } => match self.supervisor.start(&id).await {
                Ok(()) => ack_reply(request, json!({ "id": id })),
                Err(e) => err_reply(request, &e),
            },

            ProcessCommand::Stop { id } => match self.supervisor.stop(&id).await {
                Ok(()) => ack_reply(request, json!({ "id": id })),
                Err(e) => err_reply(request, &e),
            },

            ProcessCommand::Restart { id } => match self.supervisor.restart(&id).await {
                Ok(()) => ack_reply(request, json!({ "id": id })),
                Err(e) => err_reply(request, &e),
            },

            ProcessCommand::Status { id } => match self.supervisor.status(&id).await {
                Ok(snapshot) => {
                    MessageEnvelope::reply(request, kinds::PROCESS_STATUS, DAEMON_SOURCE, json!(snapshot))
                }
                Err(e) => err_reply(request, &e),
            },

            ProcessCommand::StatusAll => {
                let processes = self.supervisor.all_statuses().await;
                MessageEnvelope::reply(
                    request,
                    kinds::PROCESS_STATUS_LIST,
                    DAEMON_SOURCE,
                    json!(ProcessStatusList { processes }),
                )
            }
        };

        self.send_reply(session, reply).await;
        Ok(())
    }

    /// Handle a `health_command` envelope
    async fn handle_health_command(
        &mut self,
        session: &SessionId,
        request: &MessageEnvelope,
    ) -> ConductorResult<()> {
        let command: HealthCommand = match request.parse_payload() {
            Ok(command) => command,
            Err(e) => {
                let err = ConductorError::malformed(e.to_string());
                self.send_reply(session, err_reply(request, &err)).await;
                return Ok(());
            }
        };

        let reply = match command {
            HealthCommand::AddCheck { check } => {
                let id = check.id.clone();
                match self.health.add_check(check).await {
                    Ok(()) => ack_reply(request, json!({ "check": id })),
                    Err(e) => err_reply(request, &e),
                }
            }

            HealthCommand::RegisterComponent { id, depends_on } => {
                match self.health.register_component(&id, depends_on).await {
                    Ok(()) => ack_reply(request, json!({ "component": id })),
                    Err(e) => err_reply(request, &e),
                }
            }

            HealthCommand::UpdateComponent { id, status, health } => {
                match self.health.update_component_status(&id, status, health).await {
                    Ok(()) => ack_reply(request, json!({ "component": id })),
                    Err(e) => err_reply(request, &e),
                }
            }

            HealthCommand::SystemHealth => MessageEnvelope::reply(
                request,
                kinds::SYSTEM_HEALTH,
                DAEMON_SOURCE,
                json!(self.health.system_health().await),
            ),

            HealthCommand::ActiveAlerts => {
                let alerts = self.health.active_alerts().await;
                MessageEnvelope::reply(
                    request,
                    kinds::ALERT_LIST,
                    DAEMON_SOURCE,
                    json!(AlertListPayload { alerts }),
                )
            }

            HealthCommand::Acknowledge { alert_id } => {
                match self.health.acknowledge_alert(&alert_id).await {
                    Ok(()) => ack_reply(request, json!({ "alert": alert_id })),
                    Err(e) => err_reply(request, &e),
                }
            }

            HealthCommand::Resolve { alert_id } => {
                match self.health.resolve_alert(&alert_id).await {
                    Ok(()) => ack_reply(request, json!({ "alert": alert_id })),
                    Err(e) => err_reply(request, &e),
                }
            }
        };

        self.send_reply(session, reply).await;
        Ok(())
    }

    /// Handle a `system_status` request envelope
    async fn handle_system_status(
        &mut self,
        session: &SessionId,
        request: &MessageEnvelope,
    ) -> ConductorResult<()> {
        let process_count = self.supervisor.all_statuses().await.len();
        let session_count = self.bus.session_count().await;
        let status = self.state.system_status(process_count, session_count);

        let reply = MessageEnvelope::reply(request, kinds::SYSTEM_STATUS, DAEMON_SOURCE, json!(status));
        self.send_reply(session, reply).await;
        Ok(())
    }

    /// React to a supervisor event and re-emit it on the bus
    async fn handle_supervisor_event(&mut self, event: SupervisorEvent) -> ConductorResult<()> {
        match event {
            SupervisorEvent::Process(payload) => {
                match &payload.event {
                    ProcessEvent::Starting => {
                        let _ = self
                            .health
                            .update_component_status(&payload.id, ComponentState::Starting, None)
                            .await;
                    }
                    ProcessEvent::Started { .. } => {
                        self.attach_process_check(&payload.id).await;
                        let _ = self
                            .health
                            .update_component_status(&payload.id, ComponentState::Running, None)
                            .await;
                    }
                    ProcessEvent::Stopped { .. } => {
                        self.remove_process_check(&payload.id).await;
                        let _ = self
                            .health
                            .update_component_status(
                                &payload.id,
                                ComponentState::Stopped,
                                Some(HealthState::Unknown),
                            )
                            .await;
                    }
                    ProcessEvent::Failed { .. } => {
                        self.remove_process_check(&payload.id).await;
                        let _ = self
                            .health
                            .update_component_status(
                                &payload.id,
                                ComponentState::Error,
                                Some(HealthState::Unhealthy),
                            )
                            .await;
                    }
                    ProcessEvent::Restarting { .. } => {}
                }

                let envelope = MessageEnvelope::new(kinds::PROCESS_EVENT, DAEMON_SOURCE, json!(payload))
                    .with_topic(topics::PROCESS_EVENTS);
                self.bus.publish(topics::PROCESS_EVENTS, envelope).await;
            }

            SupervisorEvent::Log(entry) => {
                let envelope = MessageEnvelope::new(kinds::LOG_ENTRY, DAEMON_SOURCE, json!(entry))
                    .with_topic(topics::PROCESS_LOGS);
                self.bus.publish(topics::PROCESS_LOGS, envelope).await;
            }
        }

        Ok(())
    }

    /// Attach the descriptor's health check once the process is running
    ///
    /// Re-attach after a quick restart hits the already-registered check;
    /// that duplicate is expected and ignored.
    async fn attach_process_check(&mut self, process_id: &str) {
        let Ok(descriptor) = self.supervisor.descriptor(process_id).await else {
            return;
        };
        let Some(check) = descriptor.health_check else {
            return;
        };

        match self.health.add_check(check).await {
            Ok(()) | Err(ConductorError::DuplicateRegistration { .. }) => {}
            Err(e) => process_warn!(
                ProcessId::current(),
                "⚠️ Health check for {} not attached: {}",
                process_id,
                e
            ),
        }
    }

    /// Detach the descriptor's health check when the process goes down
    async fn remove_process_check(&mut self, process_id: &str) {
        let Ok(descriptor) = self.supervisor.descriptor(process_id).await else {
            return;
        };
        if let Some(check) = descriptor.health_check {
            let _ = self.health.remove_check(&check.id).await;
        }
    }

    /// React to a health monitor event and re-emit it on the bus
    async fn handle_health_event(&mut self, event: HealthEvent) -> ConductorResult<()> {
        match event {
            HealthEvent::Component(payload) => {
                let envelope = MessageEnvelope::new(kinds::HEALTH_EVENT, DAEMON_SOURCE, json!(payload))
                    .with_topic(topics::HEALTH_EVENTS);
                self.bus.publish(topics::HEALTH_EVENTS, envelope).await;
            }

            HealthEvent::Alert(alert) => {
                process_warn!(
                    ProcessId::current(),
                    "🚨 Alert [{}] {}: {}",
                    alert.severity,
                    alert.component,
                    alert.message
                );
                let envelope = MessageEnvelope::new(kinds::ALERT, DAEMON_SOURCE, json!(alert))
                    .with_topic(topics::HEALTH_ALERTS);
                self.bus.publish(topics::HEALTH_ALERTS, envelope).await;
            }

            HealthEvent::System(snapshot) => {
                self.state.system_health = snapshot.status;
                let envelope = MessageEnvelope::new(kinds::SYSTEM_HEALTH, DAEMON_SOURCE, json!(snapshot))
                    .with_topic(topics::HEALTH_EVENTS);
                self.bus.publish(topics::HEALTH_EVENTS, envelope).await;
            }
        }

        Ok(())
    }

    /// Publish the current system health snapshot on the events topic
    async fn publish_system_health(&mut self) -> ConductorResult<()> {
        let snapshot = self.health.system_health().await;
        self.state.system_health = snapshot.status;

        let envelope = MessageEnvelope::new(kinds::SYSTEM_HEALTH, DAEMON_SOURCE, json!(snapshot))
            .with_topic(topics::HEALTH_EVENTS);
        self.bus.publish(topics::HEALTH_EVENTS, envelope).await;
        Ok(())
    }

    /// Apply one configuration change notification
    async fn handle_config_change(&mut self, change: ConfigChange) -> ConductorResult<()> {
        process_info!(ProcessId::current(), "⚙️ Configuration changed: {}", change.key);

        // Health scheduling keys are consumed when probes restart
        if change.key.starts_with("health.") {
            self.health.restart_checks().await?;
        }

        Ok(())
    }

    /// Graceful shutdown: supervisor first so exits stop feeding the bus
    async fn shutdown(&mut self) -> ConductorResult<()> {
        logging::log_shutdown(ProcessId::current(), "conductor daemon");

        if let Err(e) = self.supervisor.shutdown().await {
            process_error!(ProcessId::current(), "❌ Supervisor shutdown error: {}", e);
        }
        if let Err(e) = self.health.stop_monitoring().await {
            process_error!(ProcessId::current(), "❌ Health monitor shutdown error: {}", e);
        }
        if let Err(e) = self.bus.shutdown().await {
            process_error!(ProcessId::current(), "❌ Message bus shutdown error: {}", e);
        }

        process_debug!(ProcessId::current(), "✅ Daemon shutdown complete");
        Ok(())
    }

    /// Get shutdown sender for external shutdown requests
    pub fn get_shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Deliver a command reply to the session it came from
    async fn send_reply(&self, session: &SessionId, reply: MessageEnvelope) {
        if let Err(e) = self.bus.send_to_session(session, reply).await {
            process_debug!(
                ProcessId::current(),
                "📭 Reply to {} not delivered: {}",
                session,
                e
            );
        }
    }
}

fn ack_reply(request: &MessageEnvelope, payload: serde_json::Value) -> MessageEnvelope {
    MessageEnvelope::reply(request, kinds::ACK, DAEMON_SOURCE, payload)
}

fn err_reply(request: &MessageEnvelope, err: &ConductorError) -> MessageEnvelope {
    err.to_envelope(DAEMON_SOURCE)
        .with_response_to(&request.id)
        .with_target(request.source.as_str())
}
