//! Server-sent event streams for passive listeners.

use crate::handlers::AppState;
use crate::metrics::ListenerMetricsGuard;
use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
};
use futures_util::stream::{self, Stream};
use std::borrow::Cow;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tenvis_relay_core::{ListenerEvent, Registry};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Comment sent as a keep-alive.
pub const PING_COMMENT: &str = "ping";

/// Stream a room's peer traffic to a listener.
pub async fn sse_handler(
    Path(room): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.bridge.registry().subscribe(&room);
    debug!(listener = %subscription.id(), room = %room, "Listener connected");

    let guard = ListenerMetricsGuard::new();
    let events = stream::unfold((subscription, guard), |(mut subscription, guard)| async move {
        let event = subscription.recv().await?;
        Some((Ok(to_event(event)), (subscription, guard)))
    });

    Sse::new(events)
}

/// Encode a listener event.
///
/// Payload text may contain any line break; each line becomes its own
/// `data:` field.
#[must_use]
pub fn to_event(event: ListenerEvent) -> Event {
    match event {
        ListenerEvent::KeepAlive => Event::default().comment(PING_COMMENT),
        ListenerEvent::Data(text) => Event::default().data(normalize_line_breaks(&text)),
    }
}

/// Rewrite `\r\n` and lone `\r` as `\n`.
fn normalize_line_breaks(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Spawn the task that pings every listener each `period`.
pub fn spawn_keepalive(registry: Arc<Registry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let reached = registry.ping_listeners();
            trace!(listeners = reached, "Keep-alive sent");
        }
    })
}
