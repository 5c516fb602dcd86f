//! Real message bus service implementation
//!
//! One router serves both transports: the axum WebSocket endpoint and the
//! Unix socket listener register their sessions here and feed every frame
//! through `BusCore::handle_incoming`. Envelope routing, the auth gate,
//! request correlation, and the heartbeat all live on this side of the
//! transport boundary.

use async_trait::async_trait;
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::core::router::{ClientSession, MessageRouter, TransportKind, DAEMON_SOURCE};
use crate::error::{ConductorError, ConductorResult};
use crate::traits::{Authenticator, InboundEnvelope, MessageBus};
use shared::envelope::kinds;
use shared::{
    process_debug, process_error, process_info, process_warn, AuthPayload, AuthSuccessPayload,
    DeliveryTarget, MessageEnvelope, SessionId, TopicPayload,
};

/// Timing knobs for the bus; defaults match production behavior
#[derive(Debug, Clone, Copy)]
pub struct BusTimings {
    /// Cadence of daemon-to-client pings on the network transport
    pub heartbeat_interval: Duration,
    /// Silence after which a network session is presumed dead
    pub liveness_window: Duration,
    /// Window a new connection gets to complete its handshake
    pub auth_window: Duration,
    /// Request timeout when the envelope carries no `timeoutMs`
    pub default_request_timeout: Duration,
}

impl Default for BusTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            liveness_window: Duration::from_secs(30),
            auth_window: Duration::from_secs(10),
            default_request_timeout: Duration::from_secs(30),
        }
    }
}

/// Real message bus implementation
pub struct RealMessageBus {
    core: Arc<BusCore>,
    /// Inbound receiver handed to the daemon on first take
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundEnvelope>>>,
    /// Listener and heartbeat tasks
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Transport-facing half of the bus, shared with the listener tasks
pub struct BusCore {
    pub router: Arc<MessageRouter>,
    authenticator: Arc<dyn Authenticator>,
    pub timings: BusTimings,
    inbound_tx: mpsc::Sender<InboundEnvelope>,
    next_client: AtomicU32,
    shutdown_tx: watch::Sender<bool>,
}

impl RealMessageBus {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self::with_timings(authenticator, BusTimings::default())
    }

    pub fn with_timings(authenticator: Arc<dyn Authenticator>, timings: BusTimings) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            core: Arc::new(BusCore {
                router: Arc::new(MessageRouter::new()),
                authenticator,
                timings,
                inbound_tx,
                next_client: AtomicU32::new(1),
                shutdown_tx,
            }),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Shared core for wiring listener tasks
    pub fn core(&self) -> Arc<BusCore> {
        Arc::clone(&self.core)
    }
}

impl BusCore {
    /// Fresh receiver on the bus shutdown signal
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Register a fresh network session and arm its handshake window.
    ///
    /// # Returns
    /// The assigned session id and the envelope stream for the writer task.
    pub async fn register_network_session(&self) -> (SessionId, mpsc::Receiver<MessageEnvelope>) {
        self.register_session(TransportKind::Network).await
    }

    /// Register a fresh local session and arm its handshake window
    pub async fn register_local_session(&self) -> (SessionId, mpsc::Receiver<MessageEnvelope>) {
        self.register_session(TransportKind::Local).await
    }

    async fn register_session(
        &self,
        transport: TransportKind,
    ) -> (SessionId, mpsc::Receiver<MessageEnvelope>) {
        let n = self.next_client.fetch_add(1, Ordering::SeqCst);
        let session_id = SessionId(format!("client_{n}"));
        let (tx, rx) = mpsc::channel(256);
        self.router
            .register_session(ClientSession::new(session_id.clone(), transport, tx))
            .await;

        // unauthenticated connections get one bounded window to hand over
        // credentials, then the slot is reclaimed
        let router = Arc::clone(&self.router);
        let window = self.timings.auth_window;
        let armed_id = session_id.clone();
        let mut shutdown = self.shutdown_signal();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(window) => {
                    if !router.is_authenticated(&armed_id).await
                        && router.remove_session(&armed_id).await
                    {
                        process_warn!(
                            shared::ProcessId::current(),
                            "🔒 Disconnecting {} (no handshake within {:?})",
                            armed_id,
                            window
                        );
                    }
                }
                _ = shutdown.changed() => {}
            }
        });

        process_debug!(
            shared::ProcessId::current(),
            "🔌 Session {} connected ({:?})",
            session_id,
            transport
        );
        (session_id, rx)
    }

    /// Drop a session and everything the router tracks for it
    pub async fn disconnect(&self, session_id: &SessionId) {
        if self.router.remove_session(session_id).await {
            process_debug!(
                shared::ProcessId::current(),
                "🔌 Session {} disconnected",
                session_id
            );
        }
    }

    /// Parse and route one raw frame from a connected session
    pub async fn handle_incoming(&self, session_id: &SessionId, text: &str) {
        self.router.touch(session_id).await;
        let envelope: MessageEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let reply = ConductorError::malformed(e.to_string()).to_envelope(DAEMON_SOURCE);
                let _ = self.router.deliver_to(session_id, reply).await;
                return;
            }
        };
        self.dispatch(session_id, envelope).await;
    }

    /// Route an already-parsed envelope; the local transport feeds frames
    /// here after its `hello` handshake
    pub async fn dispatch(&self, session_id: &SessionId, envelope: MessageEnvelope) {
        if !self.router.is_authenticated(session_id).await {
            if envelope.kind == kinds::AUTH {
                self.handle_auth(session_id, &envelope).await;
            } else {
                // the session stays open until its handshake window closes
                let reply = ConductorError::AuthRequired
                    .to_envelope(DAEMON_SOURCE)
                    .with_response_to(&envelope.id);
                let _ = self.router.deliver_to(session_id, reply).await;
            }
            return;
        }

        match envelope.kind.as_str() {
            kinds::AUTH => {
                // repeated auth on a live session is acknowledged, not re-checked
                let reply = MessageEnvelope::reply(
                    &envelope,
                    kinds::AUTH_SUCCESS,
                    DAEMON_SOURCE,
                    json!(AuthSuccessPayload {
                        client_id: session_id.to_string(),
                    }),
                );
                let _ = self.router.deliver_to(session_id, reply).await;
                return;
            }
            kinds::SUBSCRIBE | kinds::UNSUBSCRIBE => {
                self.handle_subscription(session_id, &envelope).await;
                return;
            }
            kinds::PING => {
                let reply =
                    MessageEnvelope::reply(&envelope, kinds::PONG, DAEMON_SOURCE, json!({}));
                let _ = self.router.deliver_to(session_id, reply).await;
                return;
            }
            kinds::PONG => return,
            _ => {}
        }

        // replies settle their pending request and go no further
        if let Some(response_to) = envelope.response_to.clone() {
            self.router.resolve_pending(&response_to, envelope).await;
            return;
        }

        let daemon_addressed = matches!(
            envelope.kind.as_str(),
            kinds::PROCESS_COMMAND | kinds::HEALTH_COMMAND | kinds::SYSTEM_STATUS
        ) || envelope
            .target
            .as_ref()
            .is_some_and(|target| target.contains(DAEMON_SOURCE));
        if daemon_addressed {
            let inbound = InboundEnvelope {
                session: session_id.clone(),
                envelope,
            };
            if self.inbound_tx.send(inbound).await.is_err() {
                process_error!(
                    shared::ProcessId::current(),
                    "❌ Daemon loop gone, dropping inbound envelope"
                );
            }
            return;
        }

        if let Some(topic) = envelope.topic().map(str::to_string) {
            let delivered = self.router.publish(&topic, envelope).await;
            process_debug!(
                shared::ProcessId::current(),
                "📡 {} published to {} subscriber(s) of {}",
                session_id,
                delivered,
                topic
            );
            return;
        }

        self.route_addressed(session_id, envelope).await;
    }

    /// Unicast, multicast, and broadcast delivery between clients
    async fn route_addressed(&self, session_id: &SessionId, envelope: MessageEnvelope) {
        let request_id = envelope.id.clone();
        let expects = envelope.expects_reply();
        let timeout = envelope
            .timeout_ms()
            .map(Duration::from_millis)
            .unwrap_or(self.timings.default_request_timeout);

        match envelope.target.clone() {
            Some(DeliveryTarget::One(target)) if !envelope.is_broadcast() => {
                let target_id = SessionId::from(target.as_str());
                if expects {
                    if let Err(err) = self
                        .router
                        .register_pending(
                            &request_id,
                            session_id.clone(),
                            Some(target_id.clone()),
                            timeout,
                        )
                        .await
                    {
                        let reply = err
                            .to_envelope(DAEMON_SOURCE)
                            .with_response_to(&request_id);
                        let _ = self.router.deliver_to(session_id, reply).await;
                        return;
                    }
                }
                if let Err(err) = self.router.deliver_to(&target_id, envelope).await {
                    let reply = err
                        .to_envelope(DAEMON_SOURCE)
                        .with_response_to(&request_id)
                        .with_target(session_id.as_str());
                    if expects {
                        // settles the pending and cancels its timer
                        self.router.resolve_pending(&request_id, reply).await;
                    } else {
                        let _ = self.router.deliver_to(session_id, reply).await;
                    }
                }
            }
            Some(DeliveryTarget::Many(targets)) => {
                if expects {
                    // first reply wins; the rest are dropped as settled
                    let _ = self
                        .router
                        .register_pending(&request_id, session_id.clone(), None, timeout)
                        .await;
                }
                for target in targets {
                    let target_id = SessionId::from(target.as_str());
                    if let Err(err) = self.router.deliver_to(&target_id, envelope.clone()).await {
                        process_debug!(
                            shared::ProcessId::current(),
                            "📭 Skipping {} in multicast: {}",
                            target_id,
                            err
                        );
                    }
                }
            }
            _ => {
                // explicit "all" or no target at all
                if expects {
                    let _ = self
                        .router
                        .register_pending(&request_id, session_id.clone(), None, timeout)
                        .await;
                }
                let delivered = self.router.broadcast(envelope, Some(session_id)).await;
                process_debug!(
                    shared::ProcessId::current(),
                    "📡 {} broadcast from {} reached {} session(s)",
                    request_id,
                    session_id,
                    delivered
                );
            }
        }
    }

    async fn handle_auth(&self, session_id: &SessionId, envelope: &MessageEnvelope) {
        let payload: AuthPayload = match envelope.parse_payload() {
            Ok(payload) => payload,
            Err(_) => {
                let reply = ConductorError::AuthFailed {
                    reason: "malformed auth payload".to_string(),
                }
                .to_envelope(DAEMON_SOURCE)
                .with_response_to(&envelope.id);
                let _ = self.router.deliver_to(session_id, reply).await;
                self.disconnect(session_id).await;
                return;
            }
        };

        if self
            .authenticator
            .authenticate(&payload.token, payload.client_type)
            .await
        {
            if self
                .router
                .mark_authenticated(session_id, payload.client_type)
                .await
                .is_err()
            {
                return;
            }
            let reply = MessageEnvelope::reply(
                envelope,
                kinds::AUTH_SUCCESS,
                DAEMON_SOURCE,
                json!(AuthSuccessPayload {
                    client_id: session_id.to_string(),
                }),
            );
            let _ = self.router.deliver_to(session_id, reply).await;
            process_info!(
                shared::ProcessId::current(),
                "🔑 Session {} authenticated as {}",
                session_id,
                payload.client_type
            );
        } else {
            process_warn!(
                shared::ProcessId::current(),
                "🔒 Rejected credentials from {}",
                session_id
            );
            let reply = ConductorError::AuthFailed {
                reason: "invalid token".to_string(),
            }
            .to_envelope(DAEMON_SOURCE)
            .with_response_to(&envelope.id);
            let _ = self.router.deliver_to(session_id, reply).await;
            self.disconnect(session_id).await;
        }
    }

    async fn handle_subscription(&self, session_id: &SessionId, envelope: &MessageEnvelope) {
        let payload: TopicPayload = match envelope.parse_payload() {
            Ok(payload) => payload,
            Err(e) => {
                let reply = ConductorError::malformed(e.to_string())
                    .to_envelope(DAEMON_SOURCE)
                    .with_response_to(&envelope.id);
                let _ = self.router.deliver_to(session_id, reply).await;
                return;
            }
        };
        let result = if envelope.kind == kinds::SUBSCRIBE {
            self.router.subscribe(session_id, &payload.topic).await
        } else {
            self.router.unsubscribe(session_id, &payload.topic).await
        };
        match result {
            Ok(()) => {
                process_debug!(
                    shared::ProcessId::current(),
                    "📋 {} {}d topic {}",
                    session_id,
                    envelope.kind,
                    payload.topic
                );
                let reply = MessageEnvelope::reply(
                    envelope,
                    kinds::ACK,
                    DAEMON_SOURCE,
                    json!({ "topic": payload.topic }),
                );
                let _ = self.router.deliver_to(session_id, reply).await;
            }
            Err(err) => {
                let reply = err
                    .to_envelope(DAEMON_SOURCE)
                    .with_response_to(&envelope.id);
                let _ = self.router.deliver_to(session_id, reply).await;
            }
        }
    }
}

#[async_trait]
impl MessageBus for RealMessageBus {
    async fn start_network(&self, bind_addr: SocketAddr) -> ConductorResult<()> {
        let app = crate::web::build_router(self.core());
        let listener = tokio::net::TcpListener::bind(bind_addr).await.map_err(|e| {
            ConductorError::transport(format!("failed to bind {bind_addr}: {e}"))
        })?;
        process_info!(
            shared::ProcessId::current(),
            "🌐 Network transport listening on ws://{}/ws",
            bind_addr
        );

        let mut shutdown = self.core.shutdown_signal();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await;
            if let Err(e) = result {
                process_error!(
                    shared::ProcessId::current(),
                    "❌ Network transport failed: {}",
                    e
                );
            }
        });

        let heartbeat = tokio::spawn(heartbeat_loop(self.core()));
        let mut tasks = self.tasks.lock().await;
        tasks.push(server);
        tasks.push(heartbeat);
        Ok(())
    }

    async fn start_local(&self, socket_path: &Path) -> ConductorResult<()> {
        let listener = crate::services::local_channel::bind_socket(socket_path)?;
        process_info!(
            shared::ProcessId::current(),
            "🔌 Local transport listening on {}",
            socket_path.display()
        );
        let task = tokio::spawn(crate::services::local_channel::serve_local(
            self.core(),
            listener,
        ));
        self.tasks.lock().await.push(task);
        Ok(())
    }

    async fn take_inbound(&self) -> Option<mpsc::Receiver<InboundEnvelope>> {
        self.inbound_rx.lock().await.take()
    }

    async fn publish(&self, topic: &str, envelope: MessageEnvelope) -> usize {
        self.core.router.publish(topic, envelope).await
    }

    async fn send_to_session(
        &self,
        session: &SessionId,
        envelope: MessageEnvelope,
    ) -> ConductorResult<()> {
        self.core.router.deliver_to(session, envelope).await
    }

    async fn broadcast(&self, envelope: MessageEnvelope) -> usize {
        self.core.router.broadcast(envelope, None).await
    }

    async fn session_count(&self) -> usize {
        self.core.router.session_count().await
    }

    async fn shutdown(&self) -> ConductorResult<()> {
        let _ = self.core.shutdown_tx.send(true);
        self.core.router.reject_all_pending().await;
        for id in self.core.router.session_ids().await {
            self.core.router.remove_session(&id).await;
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        process_info!(shared::ProcessId::current(), "🛑 Message bus stopped");
        Ok(())
    }
}

/// Ping network sessions and reap the ones that went silent
pub(crate) async fn heartbeat_loop(core: Arc<BusCore>) {
    let mut shutdown = core.shutdown_signal();
    let mut ticker = tokio::time::interval(core.timings.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (id, sender, last_seen) in core.router.network_peers().await {
                    if last_seen.elapsed() > core.timings.liveness_window {
                        process_warn!(
                            shared::ProcessId::current(),
                            "💤 Session {} unresponsive, disconnecting",
                            id
                        );
                        core.router.remove_session(&id).await;
                        continue;
                    }
                    let ping = MessageEnvelope::new(kinds::PING, DAEMON_SOURCE, json!({}))
                        .with_target(id.as_str());
                    let _ = sender.try_send(ping);
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}
