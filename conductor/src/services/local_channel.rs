//! Local transport: newline-delimited JSON over a Unix domain socket
//!
//! Trusted same-host clients skip token auth; their first frame is a
//! `hello` answered with `welcome` and the assigned client id. One JSON
//! envelope per line in both directions, no heartbeat.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::core::router::DAEMON_SOURCE;
use crate::error::{ConductorError, ConductorResult};
use crate::services::bus::BusCore;
use shared::envelope::kinds;
use shared::{
    process_debug, process_info, process_warn, HelloPayload, MessageEnvelope, SessionId,
    WelcomePayload,
};

/// Bind the listener socket, replacing any stale file from a prior run.
///
/// The socket is owner-only; local trust extends exactly as far as the
/// filesystem permissions do.
pub fn bind_socket(path: &Path) -> ConductorResult<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path).map_err(|e| {
        ConductorError::transport(format!("failed to bind {}: {e}", path.display()))
    })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

/// Accept loop for the local transport; exits on the bus shutdown signal
pub async fn serve_local(core: Arc<BusCore>, listener: UnixListener) {
    let mut shutdown = core.shutdown_signal();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handle_connection(Arc::clone(&core), stream));
                    }
                    Err(e) => {
                        process_warn!(
                            shared::ProcessId::current(),
                            "⚠️ Local accept failed: {}",
                            e
                        );
                    }
                }
            }
            _ = shutdown.changed() => {
                process_debug!(shared::ProcessId::current(), "🔌 Local listener stopped");
                return;
            }
        }
    }
}

async fn handle_connection(core: Arc<BusCore>, stream: UnixStream) {
    let (session_id, mut outbound_rx) = core.register_local_session().await;
    let (read_half, write_half) = stream.into_split();

    // writer drains the session queue as NDJSON; it finishes on its own
    // once the router drops the session's sender
    tokio::spawn(async move {
        let mut write_half = write_half;
        while let Some(envelope) = outbound_rx.recv().await {
            let Ok(mut line) = serde_json::to_vec(&envelope) else {
                continue;
            };
            line.push(b'\n');
            if write_half.write_all(&line).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut lines = BufReader::new(read_half).lines();
    let mut greeted = false;
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if greeted {
            core.handle_incoming(&session_id, &line).await;
        } else if accept_hello(&core, &session_id, &line).await {
            greeted = true;
        }
    }

    core.disconnect(&session_id).await;
}

/// Process the first frame of a local connection.
///
/// # Returns
/// true once a valid `hello` completed the handshake; anything else is
/// answered with an error while the handshake window keeps running.
async fn accept_hello(core: &Arc<BusCore>, session_id: &SessionId, line: &str) -> bool {
    let envelope: MessageEnvelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            let reply = ConductorError::malformed(e.to_string()).to_envelope(DAEMON_SOURCE);
            let _ = core.router.deliver_to(session_id, reply).await;
            return false;
        }
    };
    if envelope.kind != kinds::HELLO {
        let reply = ConductorError::AuthRequired
            .to_envelope(DAEMON_SOURCE)
            .with_response_to(&envelope.id);
        let _ = core.router.deliver_to(session_id, reply).await;
        return false;
    }
    let payload: HelloPayload = match envelope.parse_payload() {
        Ok(payload) => payload,
        Err(e) => {
            let reply = ConductorError::malformed(e.to_string())
                .to_envelope(DAEMON_SOURCE)
                .with_response_to(&envelope.id);
            let _ = core.router.deliver_to(session_id, reply).await;
            return false;
        }
    };

    if core
        .router
        .mark_authenticated(session_id, payload.kind)
        .await
        .is_err()
    {
        return false;
    }
    let reply = MessageEnvelope::reply(
        &envelope,
        kinds::WELCOME,
        DAEMON_SOURCE,
        serde_json::json!(WelcomePayload {
            client_id: session_id.to_string(),
        }),
    );
    let _ = core.router.deliver_to(session_id, reply).await;
    process_info!(
        shared::ProcessId::current(),
        "👋 Local session {} joined as {}",
        session_id,
        payload.kind
    );
    true
}
