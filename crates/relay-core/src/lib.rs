//! # relay-core
//!
//! Rooms, routing and request correlation for the Relay bridge.
//!
//! This crate provides the building blocks between the HTTP adapter and
//! the peer sockets:
//!
//! - **Registry** - Peers and passive listeners grouped by room
//! - **PendingTable** - Request ids waiting for a peer callback
//! - **PeerSession** - Join handshake and frame routing for one peer
//! - **Bridge** - Submit a command and wait for its answer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  submit  ┌─────────────┐ deliver ┌─────────────┐
//! │ HTTP caller │─────────▶│   Bridge    │────────▶│  Registry   │──▶ peers
//! └─────────────┘          └─────────────┘         └─────────────┘
//!                                 ▲                       ▲
//!                          resolve│                 relay │ mirror
//!                          ┌─────────────┐         ┌─────────────┐
//!                          │PendingTable │◀────────│ PeerSession │
//!                          └─────────────┘callback └─────────────┘
//! ```

pub mod bridge;
pub mod correlation;
pub mod registry;
pub mod room;
pub mod session;

pub use bridge::{outcome, Bridge, BridgeConfig};
pub use correlation::{CorrelationError, PendingRequest, PendingTable};
pub use registry::{
    ConnectionId, ListenerEvent, ListenerSubscription, Membership, PeerOutbox, Registry,
    RegistryError, RegistryStats,
};
pub use room::{clamp_room_name, MAX_ROOM_NAME_LENGTH};
pub use session::{FrameOutcome, PeerSession};
