//! Per-connection protocol state for a peer.
//!
//! A session starts in the handshake phase unless its connect path already
//! named a room. Once joined it routes every frame: callbacks resolve
//! pending requests, everything else is mirrored to listeners and relayed
//! to matching siblings. The registry entry is removed when the session is
//! dropped.

use crate::correlation::PendingTable;
use crate::registry::{ConnectionId, Registry};
use relay_protocol::{PeerFrame, Phase, Tag};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What handling a frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The peer joined a room.
    Joined {
        /// The room.
        room: String,
    },
    /// A callback was processed.
    Resolved {
        /// Whether a pending request matched.
        matched: bool,
    },
    /// A payload was fanned out.
    Relayed {
        /// Listeners reached.
        listeners: usize,
        /// Sibling peers reached.
        peers: usize,
    },
    /// The frame was dropped.
    Discarded,
}

impl FrameOutcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            FrameOutcome::Joined { .. } => "join",
            FrameOutcome::Resolved { .. } => "callback",
            FrameOutcome::Relayed { .. } => "payload",
            FrameOutcome::Discarded => "discarded",
        }
    }
}

/// Joined state kept locally so relaying does not need a registry lookup.
struct Joined {
    room: String,
    outbound: Option<Tag>,
}

/// A peer connection's protocol session.
pub struct PeerSession {
    id: ConnectionId,
    registry: Arc<Registry>,
    pending: PendingTable,
    joined: Option<Joined>,
}

impl PeerSession {
    pub(crate) fn new(id: ConnectionId, registry: Arc<Registry>, pending: PendingTable) -> Self {
        let joined = registry.membership(id).map(|m| Joined {
            room: m.room,
            outbound: m.outbound,
        });
        Self {
            id,
            registry,
            pending,
            joined,
        }
    }

    /// The connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        if self.joined.is_some() {
            Phase::Joined
        } else {
            Phase::Handshake
        }
    }

    /// The room, once joined.
    #[must_use]
    pub fn room(&self) -> Option<&str> {
        self.joined.as_ref().map(|j| j.room.as_str())
    }

    /// Handle one text frame from the peer.
    pub fn handle_text(&mut self, text: &str) -> FrameOutcome {
        match PeerFrame::decode(text, self.phase()) {
            PeerFrame::Join(request) => match self.registry.join(self.id, request) {
                Ok(membership) => {
                    self.joined = Some(Joined {
                        room: membership.room.clone(),
                        outbound: membership.outbound,
                    });
                    FrameOutcome::Joined {
                        room: membership.room,
                    }
                }
                Err(e) => {
                    debug!(peer = %self.id, error = %e, "Join ignored");
                    FrameOutcome::Discarded
                }
            },

            PeerFrame::Callback(reply) => {
                let matched = self.pending.resolve(&reply.request, reply.result);
                trace!(peer = %self.id, request = %reply.request, matched, "Callback");
                FrameOutcome::Resolved { matched }
            }

            PeerFrame::Payload { out } => {
                let Some(joined) = &self.joined else {
                    warn!(peer = %self.id, "Payload decoded before join");
                    return FrameOutcome::Discarded;
                };
                let tag = out.as_ref().or(joined.outbound.as_ref());
                let listeners = self.registry.mirror(&joined.room, text);
                let peers = self.registry.relay(self.id, &joined.room, tag, text);
                FrameOutcome::Relayed { listeners, peers }
            }

            PeerFrame::Ignore => {
                trace!(peer = %self.id, phase = ?self.phase(), "Frame discarded");
                FrameOutcome::Discarded
            }
        }
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.registry.remove_peer(self.id);
    }
}
