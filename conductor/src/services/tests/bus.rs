//! Comprehensive tests for the RealMessageBus service
//!
//! These drive BusCore directly through registered in-memory sessions,
//! covering the auth handshake, topic fan-out, request/reply settlement,
//! and the liveness reapers. Transport framing is exercised separately
//! by the local channel tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;

use super::common::{fast_bus_timings, with_timeout};
use crate::core::router::DAEMON_SOURCE;
use crate::services::bus::{heartbeat_loop, BusCore, RealMessageBus};
use crate::services::RealAuthenticator;
use crate::traits::MessageBus;
use shared::envelope::kinds;
use shared::{AuthSuccessPayload, ErrorPayload, MessageEnvelope, SessionId};

fn test_bus(token: Option<&str>) -> RealMessageBus {
    shared::ProcessId::init_daemon();
    RealMessageBus::with_timings(
        Arc::new(RealAuthenticator::new(token.map(str::to_string))),
        fast_bus_timings(),
    )
}

async fn recv_reply(rx: &mut mpsc::Receiver<MessageEnvelope>) -> MessageEnvelope {
    with_timeout(rx.recv())
        .await
        .expect("no reply within the test timeout")
        .expect("session channel closed")
}

/// Register a network session and complete the token handshake
async fn authed_session(
    core: &Arc<BusCore>,
    token: &str,
) -> (SessionId, mpsc::Receiver<MessageEnvelope>) {
    let (id, mut rx) = core.register_network_session().await;
    let auth = MessageEnvelope::new(
        kinds::AUTH,
        "test",
        json!({ "token": token, "clientType": "cli" }),
    );
    core.dispatch(&id, auth).await;
    let reply = recv_reply(&mut rx).await;
    assert_eq!(reply.kind, kinds::AUTH_SUCCESS, "handshake failed: {reply:?}");
    (id, rx)
}

#[tokio::test]
async fn test_valid_token_authenticates() {
    let bus = test_bus(Some("secret"));
    let core = bus.core();

    let (id, mut rx) = core.register_network_session().await;
    let auth = MessageEnvelope::new(
        kinds::AUTH,
        "test",
        json!({ "token": "secret", "clientType": "cli" }),
    );
    let request_id = auth.id.clone();
    core.dispatch(&id, auth).await;

    let reply = recv_reply(&mut rx).await;
    assert_eq!(reply.kind, kinds::AUTH_SUCCESS);
    assert_eq!(reply.source, DAEMON_SOURCE);
    assert_eq!(reply.response_to.as_deref(), Some(request_id.as_str()));
    let payload: AuthSuccessPayload = reply.parse_payload().unwrap();
    assert_eq!(payload.client_id, id.to_string());
    assert_eq!(bus.session_count().await, 1);
}

#[tokio::test]
async fn test_invalid_token_is_rejected_and_disconnected() {
    let bus = test_bus(Some("secret"));
    let core = bus.core();

    let (id, mut rx) = core.register_network_session().await;
    let auth = MessageEnvelope::new(
        kinds::AUTH,
        "test",
        json!({ "token": "wrong", "clientType": "cli" }),
    );
    core.dispatch(&id, auth).await;

    let reply = recv_reply(&mut rx).await;
    assert_eq!(reply.kind, kinds::ERROR);
    let payload: ErrorPayload = reply.parse_payload().unwrap();
    assert_eq!(payload.code, "AUTH_FAILED");
    assert_eq!(bus.session_count().await, 0);
    assert!(rx.recv().await.is_none(), "rejected session left open");
}

#[tokio::test]
async fn test_commands_before_auth_are_refused() {
    let bus = test_bus(Some("secret"));
    let core = bus.core();

    let (id, mut rx) = core.register_network_session().await;
    let command = MessageEnvelope::new(kinds::PROCESS_COMMAND, "test", json!({ "action": "status_all" }));
    let request_id = command.id.clone();
    core.dispatch(&id, command).await;

    let reply = recv_reply(&mut rx).await;
    assert_eq!(reply.kind, kinds::ERROR);
    assert_eq!(reply.response_to.as_deref(), Some(request_id.as_str()));
    let payload: ErrorPayload = reply.parse_payload().unwrap();
    assert_eq!(payload.code, "AUTH_REQUIRED");

    // refusal is not a disconnect; the handshake window decides that
    assert_eq!(bus.session_count().await, 1);
}

#[tokio::test]
async fn test_topic_publish_reaches_only_subscribers() {
    let bus = test_bus(Some("secret"));
    let core = bus.core();
    let (a_id, mut a_rx) = authed_session(&core, "secret").await;
    let (b_id, mut b_rx) = authed_session(&core, "secret").await;

    let subscribe = MessageEnvelope::new(kinds::SUBSCRIBE, "a", json!({ "topic": "metrics" }));
    core.dispatch(&a_id, subscribe).await;
    let ack = recv_reply(&mut a_rx).await;
    assert_eq!(ack.kind, kinds::ACK);
    assert_eq!(ack.payload["topic"], "metrics");

    let report = MessageEnvelope::new("metric_report", "b", json!({ "cpu": 0.3 }))
        .with_topic("metrics");
    core.dispatch(&b_id, report).await;

    let delivered = recv_reply(&mut a_rx).await;
    assert_eq!(delivered.kind, "metric_report");
    assert_eq!(delivered.topic(), Some("metrics"));
    assert_eq!(delivered.payload["cpu"], 0.3);
    assert!(
        b_rx.try_recv().is_err(),
        "publisher is not subscribed and must not hear its own report"
    );
}

/// Test that an unanswered request times out with a routed error
#[tokio::test]
async fn test_request_without_reply_times_out() {
    let bus = test_bus(Some("secret"));
    let core = bus.core();
    let (a_id, mut a_rx) = authed_session(&core, "secret").await;
    let (b_id, mut b_rx) = authed_session(&core, "secret").await;

    let request = MessageEnvelope::new("tool_call", "a", json!({ "op": "sum" }))
        .with_target(b_id.as_str())
        .expecting_response()
        .with_timeout_ms(100);
    let request_id = request.id.clone();
    let started = Instant::now();
    core.dispatch(&a_id, request).await;

    // the request itself still reaches the silent target
    let received = recv_reply(&mut b_rx).await;
    assert_eq!(received.kind, "tool_call");

    let reply = recv_reply(&mut a_rx).await;
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert_eq!(reply.kind, kinds::ERROR);
    assert_eq!(reply.response_to.as_deref(), Some(request_id.as_str()));
    let payload: ErrorPayload = reply.parse_payload().unwrap();
    assert_eq!(payload.code, "REQUEST_TIMEOUT");
}

/// Test that a request settles on the first reply and drops the rest
#[tokio::test]
async fn test_request_settles_exactly_once() {
    let bus = test_bus(Some("secret"));
    let core = bus.core();
    let (a_id, mut a_rx) = authed_session(&core, "secret").await;
    let (b_id, mut b_rx) = authed_session(&core, "secret").await;

    let request = MessageEnvelope::new("tool_call", "a", json!({ "op": "sum" }))
        .with_target(b_id.as_str())
        .expecting_response()
        .with_timeout_ms(200);
    core.dispatch(&a_id, request).await;
    let received = recv_reply(&mut b_rx).await;

    let first = MessageEnvelope::reply(&received, "tool_result", "b", json!({ "answer": 4 }));
    core.dispatch(&b_id, first).await;
    let second = MessageEnvelope::reply(&received, "tool_result", "b", json!({ "answer": 5 }));
    core.dispatch(&b_id, second).await;

    let reply = recv_reply(&mut a_rx).await;
    assert_eq!(reply.kind, "tool_result");
    assert_eq!(reply.payload["answer"], 4);

    // the late duplicate is dropped, and the settled timer never fires
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(a_rx.try_recv().is_err(), "settled request produced extra traffic");
}

#[tokio::test]
async fn test_handshake_window_reaps_silent_sessions() {
    let bus = test_bus(Some("secret"));
    let core = bus.core();

    let (_id, mut rx) = core.register_network_session().await;
    assert_eq!(bus.session_count().await, 1);

    tokio::time::sleep(fast_bus_timings().auth_window + Duration::from_millis(200)).await;
    assert_eq!(bus.session_count().await, 0);
    assert!(rx.recv().await.is_none(), "reaped session left open");
}

#[tokio::test]
async fn test_heartbeat_reaps_unresponsive_sessions() {
    let bus = test_bus(None);
    let core = bus.core();
    let (a_id, mut a_rx) = authed_session(&core, "any").await;
    let (b_id, _b_rx) = authed_session(&core, "any").await;
    tokio::spawn(heartbeat_loop(Arc::clone(&core)));

    // keep one session talking while the other goes silent
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        assert!(Instant::now() < deadline, "silent session was never reaped");
        if bus.session_count().await == 1 {
            break;
        }
        let pong =
            serde_json::to_string(&MessageEnvelope::new(kinds::PONG, "b", json!({}))).unwrap();
        core.handle_incoming(&b_id, &pong).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    let survivors = core.router.session_ids().await;
    assert!(survivors.contains(&b_id));
    assert!(!survivors.contains(&a_id));

    // the reaped session was pinged before removal closed its channel
    let mut saw_ping = false;
    with_timeout(async {
        while let Some(envelope) = a_rx.recv().await {
            if envelope.kind == kinds::PING {
                saw_ping = true;
            }
        }
    })
    .await
    .expect("reaped session channel stayed open");
    assert!(saw_ping, "no ping reached the silent session");
}

#[tokio::test]
async fn test_malformed_frame_gets_error_without_disconnect() {
    let bus = test_bus(Some("secret"));
    let core = bus.core();
    let (id, mut rx) = authed_session(&core, "secret").await;

    core.handle_incoming(&id, "this is not json").await;

    let reply = recv_reply(&mut rx).await;
    assert_eq!(reply.kind, kinds::ERROR);
    let payload: ErrorPayload = reply.parse_payload().unwrap();
    assert_eq!(payload.code, "MALFORMED_ENVELOPE");
    assert!(reply.response_to.is_none(), "unparseable frames have no request id");
    assert_eq!(bus.session_count().await, 1);
}

#[tokio::test]
async fn test_daemon_addressed_envelopes_reach_inbound_stream() {
    let bus = test_bus(Some("secret"));
    let core = bus.core();
    let mut inbound = bus.take_inbound().await.unwrap();
    let (id, _rx) = authed_session(&core, "secret").await;

    let command =
        MessageEnvelope::new(kinds::PROCESS_COMMAND, "cli", json!({ "action": "status_all" }));
    core.dispatch(&id, command).await;
    let received = with_timeout(inbound.recv()).await.unwrap().unwrap();
    assert_eq!(received.session, id);
    assert_eq!(received.envelope.kind, kinds::PROCESS_COMMAND);

    // arbitrary kinds reach the daemon when addressed to it by name
    let probe = MessageEnvelope::new("debug_dump", "cli", json!({})).with_target(DAEMON_SOURCE);
    core.dispatch(&id, probe).await;
    let received = with_timeout(inbound.recv()).await.unwrap().unwrap();
    assert_eq!(received.envelope.kind, "debug_dump");
}
