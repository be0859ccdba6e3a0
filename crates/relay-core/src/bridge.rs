//! The bridge between HTTP callers and room peers.
//!
//! [`Bridge::submit`] turns a fire-and-forget fan-out into a synchronous
//! call: the command goes to every matching peer of the room and the
//! caller waits for the first callback, or for the timeout.

use crate::correlation::{PendingTable, DEFAULT_CALLBACK_TIMEOUT};
use crate::registry::{PeerOutbox, Registry};
use crate::room::clamp_room_name;
use crate::session::PeerSession;
use relay_protocol::{Channel, Command, JoinRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result strings returned by [`Bridge::submit`] other than peer answers.
pub mod outcome {
    /// No peer in the room on the default channel.
    pub const FAILED: &str = "failed";
    /// No peer in the room accepts the requested non-default channel.
    pub const SPECIAL: &str = "special";
    /// No peer answered in time.
    pub const TIMEOUT: &str = crate::correlation::TIMEOUT_RESULT;
}

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long a command waits for a callback.
    pub callback_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }
}

/// The bridge façade.
///
/// Owns the registry and the pending table; cloning shares both.
#[derive(Clone)]
pub struct Bridge {
    registry: Arc<Registry>,
    pending: PendingTable,
}

impl Bridge {
    /// Create a bridge with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    /// Create a bridge with custom configuration.
    #[must_use]
    pub fn with_config(config: BridgeConfig) -> Self {
        info!("Creating bridge with config: {:?}", config);
        Self {
            registry: Arc::new(Registry::new()),
            pending: PendingTable::new(config.callback_timeout),
        }
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The pending request table.
    #[must_use]
    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Open a session for a newly connected peer.
    ///
    /// The session is joined right away when `join` names a room.
    pub fn connect_peer(&self, join: Option<JoinRequest>) -> (PeerSession, PeerOutbox) {
        let (id, outbox) = self.registry.add_peer(join);
        let session = PeerSession::new(id, Arc::clone(&self.registry), self.pending.clone());
        (session, outbox)
    }

    /// Submit a command to a room and wait for the answer.
    ///
    /// Returns the peer's answer, or one of the [`outcome`] strings. A
    /// `None` channel is one the caller gave but that is not a number; it
    /// only reaches unfiltered peers.
    pub async fn submit(
        &self,
        room: &str,
        channel: impl Into<Option<Channel>>,
        mut command: Command,
    ) -> String {
        let room = clamp_room_name(room);
        let channel = command.take_channel_variant().or(channel.into());
        let request = self.pending.create();
        let id = request.id().clone();

        let text = match command.into_envelope(&id).to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(request = %id, error = %e, "Failed to encode command");
                self.pending.resolve(id.as_str(), outcome::FAILED);
                return outcome::FAILED.to_string();
            }
        };

        let count = self.registry.deliver(room, channel, &text);
        if count == 0 {
            let result = if channel == Some(Channel::DEFAULT) {
                outcome::FAILED
            } else {
                outcome::SPECIAL
            };
            self.pending.resolve(id.as_str(), result);
            debug!(room = %room, channel = ?channel, request = %id, result, "No recipients");
            return result.to_string();
        }

        debug!(room = %room, channel = ?channel, request = %id, recipients = count, "Awaiting callback");
        request.wait().await
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}
