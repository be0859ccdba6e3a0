//! Frames sent by peers over their persistent connection.
//!
//! Peer frames are JSON text. How a frame is interpreted depends on the
//! connection's [`Phase`]: before joining only join frames count, after
//! joining a frame is either a callback answering a pending request or a
//! payload relayed to the rest of the room.

use serde_json::{Map, Value};

use crate::channel::Tag;

/// Result text used when a callback frame carries no `result`.
pub const NULL_RESULT: &str = "null";

/// Connection phase used to select the decoding rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Not yet assigned to a room.
    Handshake,
    /// Member of a room.
    Joined,
}

/// Room membership requested by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Room to join.
    pub room: String,
    /// Only receive commands on this channel.
    pub inbound: Option<Tag>,
    /// Default tag for relayed payloads.
    pub outbound: Option<Tag>,
}

impl JoinRequest {
    /// Create a join request without channel attributes.
    #[must_use]
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            inbound: None,
            outbound: None,
        }
    }

    /// Set the inbound filter.
    #[must_use]
    pub fn with_inbound(mut self, tag: impl Into<Tag>) -> Self {
        self.inbound = Some(tag.into());
        self
    }

    /// Set the outbound tag.
    #[must_use]
    pub fn with_outbound(mut self, tag: impl Into<Tag>) -> Self {
        self.outbound = Some(tag.into());
        self
    }

    /// Parse the segments following `/join/` in a connect path.
    ///
    /// Segments are `<room>/<in>/<out>`; the channels are optional and
    /// ignored when zero or not numeric. Returns `None` when the room
    /// segment is missing or empty.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let mut segments = path.trim_start_matches('/').split('/');
        let room = segments.next().filter(|r| !r.is_empty())?;
        let inbound = segments.next().and_then(Tag::from_segment);
        let outbound = segments.next().and_then(Tag::from_segment);
        Some(Self {
            room: room.to_string(),
            inbound,
            outbound,
        })
    }

    fn from_frame(frame: &Map<String, Value>) -> Option<Self> {
        let room = frame.get("join").map(value_text)?;
        Some(Self {
            room,
            inbound: frame.get("in").and_then(Tag::from_json),
            outbound: frame.get("out").and_then(Tag::from_json),
        })
    }
}

/// A peer's answer to a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackReply {
    /// The request being answered.
    pub request: String,
    /// Result text: strings verbatim, other values as JSON.
    pub result: String,
}

/// A decoded peer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    /// Room assignment.
    Join(JoinRequest),
    /// Answer to a pending request.
    Callback(CallbackReply),
    /// Traffic for the rest of the room.
    Payload {
        /// Per-message outbound tag.
        out: Option<Tag>,
    },
    /// Malformed or not applicable in the current phase.
    Ignore,
}

impl PeerFrame {
    /// Decode a text frame for the given phase.
    ///
    /// Decoding never fails: anything unusable maps to [`PeerFrame::Ignore`].
    #[must_use]
    pub fn decode(text: &str, phase: Phase) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return PeerFrame::Ignore;
        };

        match phase {
            Phase::Handshake => match &value {
                Value::Object(frame) => JoinRequest::from_frame(frame)
                    .map_or(PeerFrame::Ignore, PeerFrame::Join),
                _ => PeerFrame::Ignore,
            },
            Phase::Joined => match &value {
                Value::Null => PeerFrame::Ignore,
                Value::Object(frame) => decode_joined_object(frame),
                _ => PeerFrame::Payload { out: None },
            },
        }
    }

    /// Short name of the frame kind, for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            PeerFrame::Join(_) => "join",
            PeerFrame::Callback(_) => "callback",
            PeerFrame::Payload { .. } => "payload",
            PeerFrame::Ignore => "ignored",
        }
    }
}

fn decode_joined_object(frame: &Map<String, Value>) -> PeerFrame {
    match frame.get("callback") {
        Some(Value::Object(callback)) => {
            if let Some(request) = callback.get("get") {
                return PeerFrame::Callback(CallbackReply {
                    request: value_text(request),
                    result: callback
                        .get("result")
                        .map_or_else(|| NULL_RESULT.to_string(), value_text),
                });
            }
        }
        // A truthy scalar cannot be inspected for `get`; drop the frame.
        Some(value) if is_truthy_scalar(value) => return PeerFrame::Ignore,
        _ => {}
    }

    PeerFrame::Payload {
        out: frame.get("out").and_then(Tag::from_json),
    }
}

fn is_truthy_scalar(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Null | Value::Array(_) | Value::Object(_) => false,
    }
}

/// Text form of a JSON value: strings verbatim, everything else as JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    fn joined(text: &str) -> PeerFrame {
        PeerFrame::decode(text, Phase::Joined)
    }

    #[test]
    fn test_join_frame() {
        let frame = PeerFrame::decode(r#"{"join":"studio","in":2,"out":"3"}"#, Phase::Handshake);
        assert_eq!(
            frame,
            PeerFrame::Join(
                JoinRequest::new("studio")
                    .with_inbound(Channel::new(2))
                    .with_outbound(Channel::new(3))
            )
        );
    }

    #[test]
    fn test_join_frame_stringifies_room() {
        let frame = PeerFrame::decode(r#"{"join":42}"#, Phase::Handshake);
        assert_eq!(frame, PeerFrame::Join(JoinRequest::new("42")));
    }

    #[test]
    fn test_join_frame_zero_channels_unset() {
        let frame = PeerFrame::decode(r#"{"join":"r","in":0,"out":false}"#, Phase::Handshake);
        assert_eq!(frame, PeerFrame::Join(JoinRequest::new("r")));
    }

    #[test]
    fn test_join_frame_non_numeric_filter_kept() {
        let PeerFrame::Join(request) =
            PeerFrame::decode(r#"{"join":"r","in":"abc","out":"0"}"#, Phase::Handshake)
        else {
            panic!("expected join");
        };
        assert_eq!(request.inbound, Some(Tag::Token("abc".into())));
        assert_eq!(request.outbound, Some(Tag::Channel(Channel::new(0))));
    }

    #[test]
    fn test_handshake_ignores_everything_else() {
        for text in ["not json", "5", "null", r#"{"hello":"world"}"#, r#"["join"]"#] {
            assert_eq!(PeerFrame::decode(text, Phase::Handshake), PeerFrame::Ignore, "{text}");
        }
        // Callback frames count for nothing until the peer has joined.
        assert_eq!(
            PeerFrame::decode(r#"{"callback":{"get":"x","result":1}}"#, Phase::Handshake),
            PeerFrame::Ignore
        );
    }

    #[test]
    fn test_callback_frame_scalar_result() {
        assert_eq!(
            joined(r#"{"callback":{"get":"abc","result":"ok"}}"#),
            PeerFrame::Callback(CallbackReply {
                request: "abc".into(),
                result: "ok".into()
            })
        );
        assert_eq!(
            joined(r#"{"callback":{"get":"abc","result":12}}"#),
            PeerFrame::Callback(CallbackReply {
                request: "abc".into(),
                result: "12".into()
            })
        );
    }

    #[test]
    fn test_callback_frame_structured_result() {
        let PeerFrame::Callback(reply) =
            joined(r#"{"callback":{"get":"abc","result":{"muted":true}}}"#)
        else {
            panic!("expected callback");
        };
        assert_eq!(reply.result, r#"{"muted":true}"#);
    }

    #[test]
    fn test_callback_frame_without_result() {
        let PeerFrame::Callback(reply) = joined(r#"{"callback":{"get":"abc"}}"#) else {
            panic!("expected callback");
        };
        assert_eq!(reply.result, NULL_RESULT);
    }

    #[test]
    fn test_callback_without_get_is_payload() {
        assert_eq!(
            joined(r#"{"callback":{"result":1}}"#),
            PeerFrame::Payload { out: None }
        );
        assert_eq!(joined(r#"{"callback":0}"#), PeerFrame::Payload { out: None });
        assert_eq!(joined(r#"{"callback":"yes"}"#), PeerFrame::Ignore);
    }

    #[test]
    fn test_payload_frames() {
        assert_eq!(
            joined(r#"{"chat":"hi","out":4}"#),
            PeerFrame::Payload {
                out: Some(Tag::Channel(Channel::new(4)))
            }
        );
        assert_eq!(
            joined(r#"{"chat":"hi","out":"stage"}"#),
            PeerFrame::Payload {
                out: Some(Tag::Token("stage".into()))
            }
        );
        assert_eq!(joined("7"), PeerFrame::Payload { out: None });
        assert_eq!(joined(r#""text""#), PeerFrame::Payload { out: None });
        // A join frame after joining is ordinary traffic.
        assert_eq!(joined(r#"{"join":"other"}"#), PeerFrame::Payload { out: None });
    }

    #[test]
    fn test_joined_ignores_malformed() {
        assert_eq!(joined("{oops"), PeerFrame::Ignore);
        assert_eq!(joined("null"), PeerFrame::Ignore);
    }

    #[test]
    fn test_join_from_path() {
        assert_eq!(
            JoinRequest::from_path("studio/2/3"),
            Some(
                JoinRequest::new("studio")
                    .with_inbound(Channel::new(2))
                    .with_outbound(Channel::new(3))
            )
        );
        assert_eq!(
            JoinRequest::from_path("/studio/x/0"),
            Some(JoinRequest::new("studio"))
        );
        assert_eq!(JoinRequest::from_path(""), None);
        assert_eq!(JoinRequest::from_path("/"), None);
    }
}
