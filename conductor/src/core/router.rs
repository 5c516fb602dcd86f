//! Session registry, topic index, and request correlation
//!
//! The router is the transport-neutral core of the message bus. Both the
//! WebSocket endpoint and the local socket register sessions here, so
//! delivery, topic fan-out, and request/response bookkeeping behave the
//! same regardless of how a client connected.

use crate::error::{ConductorError, ConductorResult};
use shared::{ClientKind, MessageEnvelope, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Envelope source used for daemon-originated traffic
pub const DAEMON_SOURCE: &str = "daemon";

/// Which listener a session arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// WebSocket over TCP, authenticated and heartbeated
    Network,
    /// Unix domain socket, trusted and heartbeat-free
    Local,
}

/// Connection state for one client session
#[derive(Debug)]
pub struct ClientSession {
    pub id: SessionId,
    pub kind: Option<ClientKind>,
    pub authenticated: bool,
    pub connected_at: Instant,
    pub last_seen: Instant,
    pub topics: HashSet<String>,
    /// Handle to the per-session writer task
    pub sender: mpsc::Sender<MessageEnvelope>,
    pub transport: TransportKind,
}

impl ClientSession {
    pub fn new(id: SessionId, transport: TransportKind, sender: mpsc::Sender<MessageEnvelope>) -> Self {
        let now = Instant::now();
        Self {
            id,
            kind: None,
            authenticated: false,
            connected_at: now,
            last_seen: now,
            topics: HashSet::new(),
            sender,
            transport,
        }
    }
}

/// One outstanding request awaiting its reply
struct PendingEntry {
    requester: SessionId,
    target: Option<SessionId>,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct RouterState {
    sessions: HashMap<SessionId, ClientSession>,
    topics: HashMap<String, HashSet<SessionId>>,
}

/// Shared routing state behind async locks.
///
/// Cheap to clone via its inner Arcs; the timeout timers hold clones so
/// they survive independent of any one transport task.
pub struct MessageRouter {
    state: Arc<RwLock<RouterState>>,
    pending: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(RouterState::default())),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn register_session(&self, session: ClientSession) {
        let mut state = self.state.write().await;
        state.sessions.insert(session.id.clone(), session);
    }

    /// Flip a session to authenticated and record its declared kind
    pub async fn mark_authenticated(
        &self,
        id: &SessionId,
        kind: ClientKind,
    ) -> ConductorResult<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| ConductorError::ClientNotFound {
                client_id: id.to_string(),
            })?;
        session.authenticated = true;
        session.kind = Some(kind);
        Ok(())
    }

    pub async fn is_authenticated(&self, id: &SessionId) -> bool {
        let state = self.state.read().await;
        state
            .sessions
            .get(id)
            .map(|s| s.authenticated)
            .unwrap_or(false)
    }

    /// Record inbound traffic for liveness tracking
    pub async fn touch(&self, id: &SessionId) {
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.get_mut(id) {
            session.last_seen = Instant::now();
        }
    }

    pub async fn subscribe(&self, id: &SessionId, topic: &str) -> ConductorResult<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| ConductorError::ClientNotFound {
                client_id: id.to_string(),
            })?;
        session.topics.insert(topic.to_string());
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(id.clone());
        Ok(())
    }

    pub async fn unsubscribe(&self, id: &SessionId, topic: &str) -> ConductorResult<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| ConductorError::ClientNotFound {
                client_id: id.to_string(),
            })?;
        session.topics.remove(topic);
        if let Some(members) = state.topics.get_mut(topic) {
            members.remove(id);
            if members.is_empty() {
                state.topics.remove(topic);
            }
        }
        Ok(())
    }

    /// Deliver one envelope to one session.
    ///
    /// A full writer queue drops the envelope rather than blocking the
    /// router; a closed writer surfaces as `ClientDisconnected` and the
    /// transport's own cleanup path reaps the session.
    pub async fn deliver_to(
        &self,
        id: &SessionId,
        envelope: MessageEnvelope,
    ) -> ConductorResult<()> {
        let sender = {
            let state = self.state.read().await;
            state
                .sessions
                .get(id)
                .map(|s| s.sender.clone())
                .ok_or_else(|| ConductorError::ClientNotFound {
                    client_id: id.to_string(),
                })?
        };
        match sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(envelope)) => {
                warn!(
                    "⚠️ Dropping {} message for slow session {}",
                    envelope.kind, id
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(ConductorError::ClientDisconnected {
                client_id: id.to_string(),
            }),
        }
    }

    /// Fan an envelope out to every authenticated session.
    ///
    /// # Returns
    /// Number of sessions the envelope reached.
    pub async fn broadcast(
        &self,
        envelope: MessageEnvelope,
        exclude: Option<&SessionId>,
    ) -> usize {
        let recipients: Vec<(SessionId, mpsc::Sender<MessageEnvelope>)> = {
            let state = self.state.read().await;
            state
                .sessions
                .values()
                .filter(|s| s.authenticated && Some(&s.id) != exclude)
                .map(|s| (s.id.clone(), s.sender.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, sender) in recipients {
            match sender.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("⚠️ Dropping broadcast for slow session {id}");
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }
        for id in closed {
            self.remove_session(&id).await;
        }
        delivered
    }

    /// Fan an envelope out to every subscriber of a topic.
    ///
    /// # Returns
    /// Number of subscribers the envelope reached.
    pub async fn publish(&self, topic: &str, envelope: MessageEnvelope) -> usize {
        let recipients: Vec<(SessionId, mpsc::Sender<MessageEnvelope>)> = {
            let state = self.state.read().await;
            let Some(members) = state.topics.get(topic) else {
                return 0;
            };
            members
                .iter()
                .filter_map(|id| {
                    state
                        .sessions
                        .get(id)
                        .map(|s| (id.clone(), s.sender.clone()))
                })
                .collect()
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, sender) in recipients {
            match sender.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("⚠️ Dropping {topic} publish for slow session {id}");
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }
        for id in closed {
            self.remove_session(&id).await;
        }
        delivered
    }

    /// Track an outstanding request and arm its timeout timer.
    ///
    /// The timer resolves the request with `REQUEST_TIMEOUT` unless a reply
    /// or a disconnect settles it first. Each request settles exactly once.
    pub async fn register_pending(
        &self,
        request_id: &str,
        requester: SessionId,
        target: Option<SessionId>,
        timeout: Duration,
    ) -> ConductorResult<()> {
        let mut pending = self.pending.lock().await;
        if pending.contains_key(request_id) {
            return Err(ConductorError::malformed(format!(
                "duplicate request id {request_id}"
            )));
        }

        let state = Arc::clone(&self.state);
        let pending_map = Arc::clone(&self.pending);
        let id = request_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let entry = pending_map.lock().await.remove(&id);
            let Some(entry) = entry else {
                return;
            };
            debug!("⏱️ Request {id} timed out");
            let err = ConductorError::RequestTimeout {
                request_id: id.clone(),
            };
            let reply = err
                .to_envelope(DAEMON_SOURCE)
                .with_response_to(&id)
                .with_target(entry.requester.as_str());
            push_to(&state, &entry.requester, reply).await;
        });

        pending.insert(
            request_id.to_string(),
            PendingEntry {
                requester,
                target,
                timer,
            },
        );
        Ok(())
    }

    /// Settle an outstanding request with its reply.
    ///
    /// # Returns
    /// false when the request already settled (timed out, disconnected, or
    /// a duplicate reply); the reply is dropped in that case.
    pub async fn resolve_pending(&self, response_to: &str, reply: MessageEnvelope) -> bool {
        let entry = self.pending.lock().await.remove(response_to);
        let Some(entry) = entry else {
            debug!("Dropping reply to settled request {response_to}");
            return false;
        };
        entry.timer.abort();
        push_to(&self.state, &entry.requester, reply).await;
        true
    }

    /// Drop a session and everything tied to it in one pass.
    ///
    /// Removes topic subscriptions, fails requests waiting on the session
    /// with `CLIENT_DISCONNECTED`, and discards requests it had issued.
    pub async fn remove_session(&self, id: &SessionId) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state.sessions.remove(id).is_some();
            if removed {
                state.topics.retain(|_, members| {
                    members.remove(id);
                    !members.is_empty()
                });
            }
            removed
        };
        if !removed {
            return false;
        }

        let mut orphaned = Vec::new();
        {
            let mut pending = self.pending.lock().await;
            pending.retain(|request_id, entry| {
                if entry.requester == *id {
                    entry.timer.abort();
                    return false;
                }
                if entry.target.as_ref() == Some(id) {
                    entry.timer.abort();
                    orphaned.push((request_id.clone(), entry.requester.clone()));
                    return false;
                }
                true
            });
        }
        for (request_id, requester) in orphaned {
            let err = ConductorError::ClientDisconnected {
                client_id: id.to_string(),
            };
            let reply = err
                .to_envelope(DAEMON_SOURCE)
                .with_response_to(&request_id)
                .with_target(requester.as_str());
            push_to(&self.state, &requester, reply).await;
        }
        true
    }

    /// Fail every outstanding request; used during shutdown
    pub async fn reject_all_pending(&self) {
        let drained: Vec<(String, PendingEntry)> =
            self.pending.lock().await.drain().collect();
        for (request_id, entry) in drained {
            entry.timer.abort();
            let reply = ConductorError::ShuttingDown
                .to_envelope(DAEMON_SOURCE)
                .with_response_to(&request_id)
                .with_target(entry.requester.as_str());
            push_to(&self.state, &entry.requester, reply).await;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Network sessions with their writers and last-seen stamps, for the
    /// heartbeat task
    pub async fn network_peers(
        &self,
    ) -> Vec<(SessionId, mpsc::Sender<MessageEnvelope>, Instant)> {
        let state = self.state.read().await;
        state
            .sessions
            .values()
            .filter(|s| s.transport == TransportKind::Network)
            .map(|s| (s.id.clone(), s.sender.clone(), s.last_seen))
            .collect()
    }

    /// Every live session id, for shutdown sweeps
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.state.read().await.sessions.keys().cloned().collect()
    }
}

/// Best-effort delivery without session cleanup; keeps the settlement
/// paths free of recursion back into `remove_session`.
async fn push_to(
    state: &Arc<RwLock<RouterState>>,
    id: &SessionId,
    envelope: MessageEnvelope,
) {
    let sender = state
        .read()
        .await
        .sessions
        .get(id)
        .map(|s| s.sender.clone());
    if let Some(sender) = sender {
        if sender.try_send(envelope).is_err() {
            debug!("Session {id} unreachable while settling a request");
        }
    }
}
