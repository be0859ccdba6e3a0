//! # relay-protocol
//!
//! Wire vocabulary for the Relay bridge.
//!
//! HTTP callers submit [`Command`]s; the bridge seals each one into an
//! [`Envelope`] tagged with a [`RequestId`] and fans it out to the peers of
//! a room. Peers talk back with JSON text frames decoded as [`PeerFrame`]s.
//!
//! ## Frame kinds
//!
//! - `Join` - `{"join": <room>, "in": <channel>, "out": <channel>}`
//! - `Callback` - `{"callback": {"get": <request id>, "result": <value>}}`
//! - `Payload` - anything else, relayed to the room
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{Command, Phase, PeerFrame, RequestId};
//!
//! let id = RequestId::generate();
//! let envelope = Command::action("mute", None, None).into_envelope(&id);
//! assert_eq!(envelope.request_id(), Some(id.as_str()));
//!
//! let reply = format!(r#"{{"callback":{{"get":"{id}","result":"ok"}}}}"#);
//! assert_eq!(PeerFrame::decode(&reply, Phase::Joined).kind(), "callback");
//! ```

pub mod channel;
pub mod command;
pub mod frames;

pub use channel::{Channel, Tag};
pub use command::{Command, Envelope, ProtocolError, RequestId};
pub use frames::{CallbackReply, JoinRequest, PeerFrame, Phase};
