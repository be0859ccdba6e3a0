//! Registry of peer connections and passive listeners, and the routing
//! rules between them.
//!
//! Peers start in the lobby and move into a room when they join. Rooms
//! are created on first use and dropped as soon as their last peer or
//! listener leaves. Every member owns an unbounded outbox; delivery is a
//! non-blocking push, and a push into a closed outbox simply does not
//! count.

use dashmap::DashMap;
use relay_protocol::{Channel, JoinRequest, Tag};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Frame text queued for a peer.
pub type Outbound = Arc<str>;

/// Receiving half of a peer's outbox.
pub type PeerOutbox = mpsc::UnboundedReceiver<Outbound>;

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection is not registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection already belongs to a room.
    #[error("Connection {connection} already joined room {room}")]
    AlreadyJoined {
        /// The connection.
        connection: ConnectionId,
        /// Its current room.
        room: String,
    },

    /// Room names cannot be empty.
    #[error("Room name cannot be empty")]
    EmptyRoom,
}

/// Identifier of a registered peer or listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Get the raw id.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Room and channel attributes of a joined peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// The room.
    pub room: String,
    /// Only commands on this channel are delivered, when set.
    pub inbound: Option<Tag>,
    /// Default tag for relayed payloads.
    pub outbound: Option<Tag>,
}

/// Event queued for a passive listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// Periodic keep-alive.
    KeepAlive,
    /// Raw payload frame text.
    Data(Arc<str>),
}

/// Whether a peer with `inbound` filter accepts a command on `channel`.
///
/// A `None` channel stands for an unparseable one: only unfiltered peers
/// take it.
#[must_use]
pub fn accepts_command(inbound: Option<&Tag>, channel: Option<Channel>) -> bool {
    match (inbound, channel) {
        (None, _) => true,
        (Some(filter), Some(channel)) => filter.admits(channel),
        (Some(_), None) => false,
    }
}

/// Whether a peer with `inbound` filter accepts a payload relayed with `tag`.
///
/// Filtered peers only take payloads tagged with their channel; unfiltered
/// peers only take untagged payloads.
#[must_use]
pub fn accepts_relay(inbound: Option<&Tag>, tag: Option<&Tag>) -> bool {
    match (inbound, tag) {
        (Some(filter), Some(tag)) => filter == tag,
        (None, None) => true,
        _ => false,
    }
}

struct Peer {
    inbound: Option<Tag>,
    outbound: Option<Tag>,
    outbox: mpsc::UnboundedSender<Outbound>,
}

#[derive(Default)]
struct Room {
    peers: HashMap<ConnectionId, Peer>,
    listeners: HashMap<ConnectionId, mpsc::UnboundedSender<ListenerEvent>>,
}

impl Room {
    fn is_empty(&self) -> bool {
        self.peers.is_empty() && self.listeners.is_empty()
    }
}

/// The registry of live connections, indexed by room.
#[derive(Default)]
pub struct Registry {
    /// Rooms indexed by name.
    rooms: DashMap<String, Room>,
    /// Peers that have not joined a room yet.
    lobby: DashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
    /// Joined peers and listeners (connection -> room).
    memberships: DashMap<ConnectionId, String>,
    next_id: AtomicU64,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register a peer connection.
    ///
    /// With a join request naming a room the peer is joined immediately,
    /// otherwise it waits in the lobby.
    pub fn add_peer(&self, join: Option<JoinRequest>) -> (ConnectionId, PeerOutbox) {
        let id = self.next_connection_id();
        let (tx, rx) = mpsc::unbounded_channel();

        match join.filter(|j| !j.room.is_empty()) {
            Some(request) => self.insert_member(id, request, tx),
            None => {
                self.lobby.insert(id, tx);
                debug!(peer = %id, "Peer connected");
            }
        }

        (id, rx)
    }

    /// Move a lobby peer into a room.
    ///
    /// # Errors
    ///
    /// Fails if the room name is empty, the peer already joined a room, or
    /// the peer is not registered.
    pub fn join(&self, id: ConnectionId, request: JoinRequest) -> Result<Membership, RegistryError> {
        if request.room.is_empty() {
            return Err(RegistryError::EmptyRoom);
        }
        if let Some(room) = self.memberships.get(&id) {
            return Err(RegistryError::AlreadyJoined {
                connection: id,
                room: room.clone(),
            });
        }

        let (_, outbox) = self
            .lobby
            .remove(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;

        let membership = Membership {
            room: request.room.clone(),
            inbound: request.inbound.clone(),
            outbound: request.outbound.clone(),
        };
        self.insert_member(id, request, outbox);
        Ok(membership)
    }

    fn insert_member(&self, id: ConnectionId, request: JoinRequest, outbox: mpsc::UnboundedSender<Outbound>) {
        let JoinRequest {
            room: room_name,
            inbound,
            outbound,
        } = request;
        let mut room = self.rooms.entry(room_name.clone()).or_default();

        debug!(
            peer = %id,
            room = %room_name,
            inbound = ?inbound,
            outbound = ?outbound,
            peers = room.peers.len() + 1,
            "Peer joined"
        );

        room.peers.insert(
            id,
            Peer {
                inbound,
                outbound,
                outbox,
            },
        );
        self.memberships.insert(id, room_name);
    }

    /// Look up the room and channel attributes of a joined peer.
    #[must_use]
    pub fn membership(&self, id: ConnectionId) -> Option<Membership> {
        let room_name = self.memberships.get(&id)?.clone();
        let room = self.rooms.get(&room_name)?;
        let peer = room.peers.get(&id)?;
        Some(Membership {
            room: room_name,
            inbound: peer.inbound.clone(),
            outbound: peer.outbound.clone(),
        })
    }

    /// Remove a peer, joined or not.
    ///
    /// Returns `true` if the peer was registered.
    pub fn remove_peer(&self, id: ConnectionId) -> bool {
        if self.lobby.remove(&id).is_some() {
            debug!(peer = %id, "Peer disconnected");
            return true;
        }

        let Some((_, room_name)) = self.memberships.remove(&id) else {
            return false;
        };
        let removed = self
            .rooms
            .get_mut(&room_name)
            .map(|mut room| room.peers.remove(&id).is_some())
            .unwrap_or(false);
        self.drop_room_if_empty(&room_name);

        debug!(peer = %id, room = %room_name, "Peer left");
        removed
    }

    fn drop_room_if_empty(&self, room_name: &str) {
        if self.rooms.remove_if(room_name, |_, room| room.is_empty()).is_some() {
            debug!(room = %room_name, "Deleted empty room");
        }
    }

    /// Deliver a command to every peer of `room` accepting `channel`.
    ///
    /// Returns the number of peers the command was queued for.
    pub fn deliver(&self, room: &str, channel: impl Into<Option<Channel>>, payload: &str) -> usize {
        let channel = channel.into();
        let Some(entry) = self.rooms.get(room) else {
            trace!(room = %room, "Deliver to empty room");
            return 0;
        };

        let payload: Outbound = Arc::from(payload);
        let count = entry
            .peers
            .values()
            .filter(|peer| accepts_command(peer.inbound.as_ref(), channel))
            .filter(|peer| peer.outbox.send(Arc::clone(&payload)).is_ok())
            .count();

        trace!(room = %room, channel = ?channel, recipients = count, "Delivered command");
        count
    }

    /// Relay a payload from `sender` to its siblings in `room`.
    ///
    /// Returns the number of siblings the payload was queued for.
    pub fn relay(&self, sender: ConnectionId, room: &str, tag: Option<&Tag>, payload: &str) -> usize {
        let Some(entry) = self.rooms.get(room) else {
            return 0;
        };

        let payload: Outbound = Arc::from(payload);
        let count = entry
            .peers
            .iter()
            .filter(|(id, peer)| **id != sender && accepts_relay(peer.inbound.as_ref(), tag))
            .filter(|(_, peer)| peer.outbox.send(Arc::clone(&payload)).is_ok())
            .count();

        trace!(peer = %sender, room = %room, tag = ?tag, recipients = count, "Relayed payload");
        count
    }

    /// Subscribe a passive listener to `room`.
    ///
    /// The subscription starts with a keep-alive queued and unregisters
    /// itself when dropped.
    pub fn subscribe(self: &Arc<Self>, room: &str) -> ListenerSubscription {
        let id = self.next_connection_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ListenerEvent::KeepAlive);

        let mut entry = self.rooms.entry(room.to_string()).or_default();
        entry.listeners.insert(id, tx);
        self.memberships.insert(id, room.to_string());

        debug!(
            listener = %id,
            room = %room,
            listeners = entry.listeners.len(),
            "Listener subscribed"
        );

        ListenerSubscription {
            id,
            room: room.to_string(),
            events: rx,
            registry: Arc::clone(self),
        }
    }

    fn remove_listener(&self, id: ConnectionId) {
        let Some((_, room_name)) = self.memberships.remove(&id) else {
            return;
        };
        if let Some(mut room) = self.rooms.get_mut(&room_name) {
            room.listeners.remove(&id);
        }
        self.drop_room_if_empty(&room_name);

        debug!(listener = %id, room = %room_name, "Listener unsubscribed");
    }

    /// Copy a payload frame to every listener of `room`.
    ///
    /// Returns the number of listeners it was queued for.
    pub fn mirror(&self, room: &str, payload: &str) -> usize {
        let Some(entry) = self.rooms.get(room) else {
            return 0;
        };
        if entry.listeners.is_empty() {
            return 0;
        }

        let payload: Arc<str> = Arc::from(payload);
        entry
            .listeners
            .values()
            .filter(|tx| tx.send(ListenerEvent::Data(Arc::clone(&payload))).is_ok())
            .count()
    }

    /// Queue a keep-alive for every listener.
    ///
    /// Returns the number of listeners reached.
    pub fn ping_listeners(&self) -> usize {
        self.rooms
            .iter()
            .map(|room| {
                room.listeners
                    .values()
                    .filter(|tx| tx.send(ListenerEvent::KeepAlive).is_ok())
                    .count()
            })
            .sum()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let (joined_peers, listeners) = self.rooms.iter().fold((0, 0), |(p, l), room| {
            (p + room.peers.len(), l + room.listeners.len())
        });
        RegistryStats {
            room_count: self.rooms.len(),
            lobby_peers: self.lobby.len(),
            joined_peers,
            listeners,
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of rooms with at least one member.
    pub room_count: usize,
    /// Peers that have not joined yet.
    pub lobby_peers: usize,
    /// Peers in a room.
    pub joined_peers: usize,
    /// Passive listeners.
    pub listeners: usize,
}

/// A passive listener's handle on its room.
///
/// Unregisters the listener when dropped.
pub struct ListenerSubscription {
    id: ConnectionId,
    room: String,
    events: mpsc::UnboundedReceiver<ListenerEvent>,
    registry: Arc<Registry>,
}

impl ListenerSubscription {
    /// The listener's id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The room this listener follows.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<ListenerEvent> {
        self.events.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<ListenerEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for ListenerSubscription {
    fn drop(&mut self) {
        self.registry.remove_listener(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(outbox: &mut PeerOutbox) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = outbox.try_recv() {
            frames.push(frame.to_string());
        }
        frames
    }

    #[test]
    fn test_add_and_remove_peer() {
        let registry = Registry::new();

        let (lobby_id, _rx1) = registry.add_peer(None);
        let (joined_id, _rx2) = registry.add_peer(Some(JoinRequest::new("studio")));

        let stats = registry.stats();
        assert_eq!(stats.lobby_peers, 1);
        assert_eq!(stats.joined_peers, 1);
        assert_eq!(stats.room_count, 1);

        assert!(registry.remove_peer(lobby_id));
        assert!(registry.remove_peer(joined_id));
        assert!(!registry.remove_peer(joined_id));

        // Room should be auto-deleted
        assert_eq!(registry.stats().room_count, 0);
    }

    #[test]
    fn test_join_from_lobby() {
        let registry = Registry::new();
        let (id, _rx) = registry.add_peer(None);
        assert!(registry.membership(id).is_none());

        let request = JoinRequest::new("studio").with_inbound(Channel::new(2));
        let membership = registry.join(id, request).unwrap();
        assert_eq!(membership.room, "studio");
        assert_eq!(registry.membership(id), Some(membership));
        assert_eq!(registry.stats().lobby_peers, 0);
    }

    #[test]
    fn test_room_is_immutable() {
        let registry = Registry::new();
        let (id, _rx) = registry.add_peer(Some(JoinRequest::new("first")));

        assert_eq!(
            registry.join(id, JoinRequest::new("second")),
            Err(RegistryError::AlreadyJoined {
                connection: id,
                room: "first".into()
            })
        );
        assert_eq!(registry.membership(id).unwrap().room, "first");
    }

    #[test]
    fn test_join_rejects_empty_room_and_unknown_peer() {
        let registry = Registry::new();
        let (id, _rx) = registry.add_peer(None);

        assert_eq!(registry.join(id, JoinRequest::new("")), Err(RegistryError::EmptyRoom));
        assert!(registry.remove_peer(id));
        assert_eq!(
            registry.join(id, JoinRequest::new("studio")),
            Err(RegistryError::UnknownConnection(id))
        );
    }

    #[test]
    fn test_deliver_channel_isolation() {
        let registry = Registry::new();
        let (_, mut filtered) =
            registry.add_peer(Some(JoinRequest::new("studio").with_inbound(Channel::new(2))));
        let (_, mut open) = registry.add_peer(Some(JoinRequest::new("studio")));

        assert_eq!(registry.deliver("studio", Channel::new(2), "two"), 2);
        assert_eq!(registry.deliver("studio", Channel::new(3), "three"), 1);

        assert_eq!(drain(&mut filtered), vec!["two"]);
        assert_eq!(drain(&mut open), vec!["two", "three"]);
    }

    #[test]
    fn test_deliver_skips_other_rooms_and_lobby() {
        let registry = Registry::new();
        let (_, mut lobby) = registry.add_peer(None);
        let (_, mut other) = registry.add_peer(Some(JoinRequest::new("other")));

        assert_eq!(registry.deliver("studio", Channel::DEFAULT, "hello"), 0);
        assert!(drain(&mut lobby).is_empty());
        assert!(drain(&mut other).is_empty());
    }

    #[test]
    fn test_deliver_swallows_closed_outbox() {
        let registry = Registry::new();
        let (_, closed) = registry.add_peer(Some(JoinRequest::new("studio")));
        let (_, mut open) = registry.add_peer(Some(JoinRequest::new("studio")));
        drop(closed);

        assert_eq!(registry.deliver("studio", Channel::DEFAULT, "hello"), 1);
        assert_eq!(drain(&mut open), vec!["hello"]);
    }

    #[test]
    fn test_deliver_unparseable_channel_skips_filtered() {
        let registry = Registry::new();
        let (_, mut filtered) =
            registry.add_peer(Some(JoinRequest::new("studio").with_inbound(Channel::new(2))));
        let (_, mut open) = registry.add_peer(Some(JoinRequest::new("studio")));

        assert_eq!(registry.deliver("studio", None::<Channel>, "nan"), 1);
        assert!(drain(&mut filtered).is_empty());
        assert_eq!(drain(&mut open), vec!["nan"]);
    }

    #[test]
    fn test_deliver_token_filter_takes_no_commands() {
        let registry = Registry::new();
        let (_, mut token) = registry.add_peer(Some(
            JoinRequest::new("studio").with_inbound(Tag::Token("abc".into())),
        ));

        assert_eq!(registry.deliver("studio", Channel::new(2), "cmd"), 0);
        assert_eq!(registry.deliver("studio", Channel::DEFAULT, "cmd"), 0);
        assert!(drain(&mut token).is_empty());
    }

    #[test]
    fn test_relay_matching_truth_table() {
        let three = Tag::from(Channel::new(3));
        let four = Tag::from(Channel::new(4));
        let token = Tag::Token("stage".into());

        assert!(accepts_relay(None, None));
        assert!(accepts_relay(Some(&three), Some(&three)));
        assert!(!accepts_relay(Some(&three), Some(&four)));
        assert!(!accepts_relay(Some(&three), None));
        assert!(!accepts_relay(None, Some(&three)));
        assert!(accepts_relay(Some(&token), Some(&token)));
        assert!(!accepts_relay(Some(&token), Some(&three)));
        assert!(!accepts_relay(None, Some(&token)));
    }

    #[test]
    fn test_relay_excludes_sender() {
        let registry = Registry::new();
        let (sender, mut sender_rx) = registry.add_peer(Some(JoinRequest::new("studio")));
        let (_, mut sibling) = registry.add_peer(Some(JoinRequest::new("studio")));
        let (_, mut tagged) =
            registry.add_peer(Some(JoinRequest::new("studio").with_inbound(Channel::new(5))));

        assert_eq!(registry.relay(sender, "studio", None, "hi"), 1);
        assert!(drain(&mut sender_rx).is_empty());
        assert_eq!(drain(&mut sibling), vec!["hi"]);
        assert!(drain(&mut tagged).is_empty());

        assert_eq!(registry.relay(sender, "studio", Some(&Channel::new(5).into()), "five"), 1);
        assert_eq!(drain(&mut tagged), vec!["five"]);
        assert!(drain(&mut sibling).is_empty());
    }

    #[test]
    fn test_listener_mirror_and_ping() {
        let registry = Arc::new(Registry::new());
        let mut listener = registry.subscribe("studio");
        let mut elsewhere = registry.subscribe("other");

        assert_eq!(listener.try_recv(), Some(ListenerEvent::KeepAlive));
        assert_eq!(elsewhere.try_recv(), Some(ListenerEvent::KeepAlive));

        assert_eq!(registry.mirror("studio", r#"{"chat":"hi"}"#), 1);
        assert_eq!(
            listener.try_recv(),
            Some(ListenerEvent::Data(Arc::from(r#"{"chat":"hi"}"#)))
        );
        assert_eq!(elsewhere.try_recv(), None);

        assert_eq!(registry.ping_listeners(), 2);
        assert_eq!(listener.try_recv(), Some(ListenerEvent::KeepAlive));
    }

    #[test]
    fn test_listeners_do_not_receive_commands() {
        let registry = Arc::new(Registry::new());
        let mut listener = registry.subscribe("studio");
        listener.try_recv();

        assert_eq!(registry.deliver("studio", Channel::DEFAULT, "cmd"), 0);
        assert_eq!(listener.try_recv(), None);
    }

    #[test]
    fn test_listener_drop_unregisters() {
        let registry = Arc::new(Registry::new());
        let listener = registry.subscribe("studio");
        assert_eq!(registry.stats().listeners, 1);

        drop(listener);
        assert_eq!(registry.stats().listeners, 0);
        assert_eq!(registry.stats().room_count, 0);
    }
}
