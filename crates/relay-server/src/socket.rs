//! WebSocket peer connections.
//!
//! Each peer gets a [`PeerSession`] and an outbox. The connection loop
//! forwards outbox entries to the socket and feeds incoming text frames
//! to the session.

use crate::handlers::AppState;
use crate::metrics::{self, PeerMetricsGuard};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use relay_protocol::JoinRequest;
use std::sync::Arc;
use tenvis_relay_core::{FrameOutcome, PeerSession};
use tracing::{debug, trace, warn};

/// Upgrade an HTTP request to a peer connection.
///
/// The peer is joined immediately when `join` is given.
pub fn upgrade_peer(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    join: Option<JoinRequest>,
) -> Response {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_peer(socket, state, join))
}

/// Handle a peer connection until it closes.
async fn handle_peer(socket: WebSocket, state: Arc<AppState>, join: Option<JoinRequest>) {
    let _metrics_guard = PeerMetricsGuard::new();

    let (mut session, mut outbox) = state.bridge.connect_peer(join);
    let peer = session.id();

    debug!(peer = %peer, room = ?session.room(), "Peer connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            Some(text) = outbox.recv() => {
                if sender.send(Message::Text(text.to_string())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&mut session, &text);
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => handle_frame(&mut session, &text),
                        Err(_) => {
                            trace!(peer = %peer, "Discarding non-UTF-8 frame");
                            metrics::record_frame("discarded");
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(peer = %peer, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(peer = %peer, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(peer = %peer, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    debug!(peer = %peer, room = ?session.room(), "Peer disconnected");
}

fn handle_frame(session: &mut PeerSession, text: &str) {
    let outcome = session.handle_text(text);
    metrics::record_frame(outcome.kind());

    match &outcome {
        FrameOutcome::Joined { room } => debug!(peer = %session.id(), room = %room, "Peer joined"),
        FrameOutcome::Resolved { matched: false } => {
            debug!(peer = %session.id(), "Callback for unknown or settled request");
        }
        _ => trace!(peer = %session.id(), outcome = ?outcome, "Frame handled"),
    }
}
