//! WebSocket adapter.
//!
//! One connection becomes one session:
//!
//! 1. The role is validated before the upgrade; a missing or unknown role
//!    gets `400 Invalid role` and no session is created.
//! 2. After the upgrade the session registers with the hub and keeps the
//!    consumer side of its outbound queue.
//! 3. A reader task decodes text frames, validates them against the session
//!    and dispatches them. A bad frame is logged and dropped; the connection
//!    stays open. A frame that decodes but fails validation still counts as
//!    activity for the session. Messages over the size limit are refused by
//!    the WebSocket layer and end the session.
//! 4. A writer task drains the outbound queue onto the socket.
//! 5. Whichever task ends first aborts the other, then the session
//!    unregisters exactly once.

use super::AppState;
use crate::actors::{outbound_queue, HubActorHandle, OutboundReceiver, Role, SessionIdentity};
use crate::errors::{ProtocolError, RelayError};
use crate::observability::metrics as prom;
use crate::protocol::{decode_inbound, Envelope};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Connection parameters accepted on `/ws`.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub role: Option<String>,
}

/// `GET /ws?role=master|client`
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    accept(state, params.role.as_deref(), ws)
}

/// `GET /ws/:role`
pub async fn ws_role_handler(
    State(state): State<AppState>,
    Path(role): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    accept(state, Some(role.as_str()), ws)
}

fn accept(
    state: AppState,
    role: Option<&str>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let role = match Role::from_query(role) {
        Ok(role) => role,
        Err(e) => {
            debug!(target: "relay.transport.ws", error = %e, "Connection rejected");
            return e.into_response();
        }
    };

    match ws {
        Ok(ws) => ws
            .max_message_size(state.max_frame_bytes)
            .on_upgrade(move |socket| run_session(socket, role, state)),
        Err(rejection) => rejection.into_response(),
    }
}

/// Drive one upgraded connection until either side ends it.
#[instrument(skip_all, name = "relay.transport.session", fields(role = %role))]
pub async fn run_session(socket: WebSocket, role: Role, state: AppState) {
    let (outbound_tx, outbound_rx) = outbound_queue(state.outbound_capacity);

    let identity = match state.hub.register(role, outbound_tx).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(target: "relay.transport.ws", error = %e, "Session registration failed");
            let mut socket = socket;
            let _ = socket.close().await;
            return;
        }
    };

    info!(
        target: "relay.transport.ws",
        session_id = %identity.id,
        role = %identity.role,
        "Session connected"
    );

    let (sink, stream) = socket.split();
    let cancel_token = state.hub.child_token();

    let mut writer = tokio::spawn(write_loop(sink, outbound_rx, identity.id.clone()));
    let mut reader = tokio::spawn(read_loop(
        stream,
        identity.clone(),
        state.hub.clone(),
        state.max_frame_bytes,
        cancel_token,
    ));

    // If either task exits, abort the other.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if let Err(e) = state.hub.unregister(identity.id.clone()).await {
        debug!(
            target: "relay.transport.ws",
            session_id = %identity.id,
            error = %e,
            "Unregister skipped, hub already stopped"
        );
    }

    info!(
        target: "relay.transport.ws",
        session_id = %identity.id,
        role = %identity.role,
        "Session disconnected"
    );
}

/// Drain the outbound queue onto the socket.
///
/// Ends on a write error or once the hub has dropped the session (queue
/// closed and drained).
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: OutboundReceiver,
    session_id: String,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(Message::Text(frame)).await {
            debug!(
                target: "relay.transport.ws",
                session_id = %session_id,
                error = %e,
                "Write failed, closing session"
            );
            return;
        }
    }

    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    identity: SessionIdentity,
    hub: HubActorHandle,
    max_frame_bytes: usize,
    cancel_token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = cancel_token.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = handle_frame(&text, &identity, &hub, max_frame_bytes).await {
                    debug!(
                        target: "relay.transport.ws",
                        session_id = %identity.id,
                        error = %e,
                        "Hub unavailable, closing session"
                    );
                    break;
                }
            }
            Some(Ok(Message::Binary(_))) => {
                debug!(
                    target: "relay.transport.ws",
                    session_id = %identity.id,
                    "Binary frame ignored"
                );
                prom::record_frame_rejected("binary");
            }
            Some(Ok(Message::Close(_))) | None => break,
            // Ping/pong are answered by axum
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(
                    target: "relay.transport.ws",
                    session_id = %identity.id,
                    error = %e,
                    "Read failed, closing session"
                );
                break;
            }
        }
    }
}

/// Decode, validate and dispatch one text frame.
///
/// Protocol errors are logged and swallowed; only a stopped hub is returned.
/// The size check repeats the limit set on the upgrade.
pub(crate) async fn handle_frame(
    text: &str,
    identity: &SessionIdentity,
    hub: &HubActorHandle,
    max_frame_bytes: usize,
) -> Result<(), RelayError> {
    let received_at = Utc::now();
    let event = match decode_inbound(text, max_frame_bytes) {
        Ok(event) => event,
        Err(e) => {
            reject_frame(identity, &e);
            return Ok(());
        }
    };

    match Envelope::from_inbound(event, identity, received_at) {
        Ok(envelope) => hub.dispatch(envelope).await,
        Err(e) => {
            reject_frame(identity, &e);
            // The peer is alive even though the event is not routed
            hub.touch(identity.id.clone(), received_at).await
        }
    }
}

fn reject_frame(identity: &SessionIdentity, e: &ProtocolError) {
    warn!(
        target: "relay.transport.ws",
        session_id = %identity.id,
        role = %identity.role,
        reason = e.reason(),
        error = %e,
        "Inbound frame rejected"
    );
    prom::record_frame_rejected(e.reason());
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::actors::{HubMetrics, HubSettings};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn hub_with_master() -> (HubActorHandle, SessionIdentity, OutboundReceiver) {
        let (hub, _task) = HubActorHandle::spawn(HubSettings::default(), HubMetrics::new());
        let (tx, mut rx) = outbound_queue(16);
        let master = hub.register(Role::Master, tx).await.unwrap();
        // welcome + empty roster
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        (hub, master, rx)
    }

    async fn client(hub: &HubActorHandle) -> (SessionIdentity, OutboundReceiver) {
        let (tx, rx) = outbound_queue(16);
        (hub.register(Role::Client, tx).await.unwrap(), rx)
    }

    #[tokio::test]
    async fn test_handle_frame_dispatches_valid_frame() {
        let (hub, _master, mut master_rx) = hub_with_master().await;
        let (c1, _c1_rx) = client(&hub).await;
        master_rx.recv().await.unwrap(); // roster

        handle_frame(
            r#"{"type":"message","content":"hi","role":"client","clientId":"spoofed"}"#,
            &c1,
            &hub,
            1024,
        )
        .await
        .unwrap();

        let frame = timeout(Duration::from_secs(1), master_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["content"], "hi");
        assert_eq!(value["clientId"], c1.id.as_str());
    }

    #[tokio::test]
    async fn test_handle_frame_swallows_protocol_errors() {
        let (hub, _master, _master_rx) = hub_with_master().await;
        let (c1, _c1_rx) = client(&hub).await;

        for frame in [
            "not json",
            r#"{"type":"shout","content":"hi","role":"client"}"#,
            r#"{"type":"message","content":"hi","role":"master","clientId":"x"}"#,
        ] {
            handle_frame(frame, &c1, &hub, 1024).await.unwrap();
        }
        let oversized = format!(
            r#"{{"type":"message","content":"{}","role":"client"}}"#,
            "a".repeat(2048)
        );
        handle_frame(&oversized, &c1, &hub, 1024).await.unwrap();

        let status = hub.status().await.unwrap();
        assert_eq!(status.client_count, 1);
        assert_eq!(hub.roster().await.unwrap()[0].unread_count, 0);
    }

    #[tokio::test]
    async fn test_handle_frame_relays_empty_content() {
        let (hub, _master, mut master_rx) = hub_with_master().await;
        let (c1, _c1_rx) = client(&hub).await;
        master_rx.recv().await.unwrap(); // roster

        handle_frame(r#"{"type":"message","content":"","role":"client"}"#, &c1, &hub, 1024)
            .await
            .unwrap();

        let frame = timeout(Duration::from_secs(1), master_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["content"], "");
        assert_eq!(hub.roster().await.unwrap()[0].unread_count, 1);
    }

    #[tokio::test]
    async fn test_rejected_frame_still_counts_as_activity() {
        let (hub, _master, mut master_rx) = hub_with_master().await;
        let (c1, _c1_rx) = client(&hub).await;
        master_rx.recv().await.unwrap(); // roster
        let joined_at = hub.roster().await.unwrap()[0].last_seen;

        // Wrong declared role: decoded, then refused
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle_frame(
            r#"{"type":"typing","role":"master","clientId":"x","isTyping":true}"#,
            &c1,
            &hub,
            1024,
        )
        .await
        .unwrap();

        let entry = hub.roster().await.unwrap().remove(0);
        assert!(entry.last_seen > joined_at);
        assert_eq!(entry.unread_count, 0);

        // Undecodable frames are not activity
        handle_frame("not json", &c1, &hub, 1024).await.unwrap();
        assert_eq!(hub.roster().await.unwrap()[0].last_seen, entry.last_seen);

        if let Ok(Some(frame)) = timeout(Duration::from_millis(50), master_rx.recv()).await {
            panic!("unexpected event: {frame}");
        }
    }

    #[tokio::test]
    async fn test_handle_frame_reports_stopped_hub() {
        let metrics = HubMetrics::new();
        let (hub, task) = HubActorHandle::spawn(HubSettings::default(), Arc::clone(&metrics));
        let identity = SessionIdentity {
            id: "c-1".to_string(),
            role: Role::Client,
            display_name: Some("Client 1".to_string()),
        };
        hub.cancel();
        task.await.unwrap();

        let result = handle_frame(
            r#"{"type":"typing","role":"client","isTyping":true}"#,
            &identity,
            &hub,
            1024,
        )
        .await;
        assert!(matches!(result, Err(RelayError::HubUnavailable(_))));
    }
}
