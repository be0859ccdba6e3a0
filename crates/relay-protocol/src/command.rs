//! Commands submitted by HTTP callers and the envelopes sent to peers.
//!
//! A [`Command`] is an arbitrary JSON object. Before delivery it is sealed
//! into an [`Envelope`] that carries the request id under the `get` key,
//! which a peer echoes back in its callback frame.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::channel::Channel;

/// Envelope key carrying the request id.
pub const REQUEST_ID_KEY: &str = "get";

/// Action sent by a bare `GET /<room>`.
pub const DETAILS_ACTION: &str = "getDetails";

/// Base name of the channel-variant actions (`content2` ... `content7`).
pub const CHANNEL_VARIANT_ACTION: &str = "content";

/// Length of generated request ids.
pub const REQUEST_ID_LENGTH: usize = 9;

const REQUEST_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Identifier correlating a command with the peer callback that answers it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Create a request id from an existing token.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a short random base-36 token.
    ///
    /// Tokens are not guaranteed unique; the pending table retries on
    /// collision.
    #[must_use]
    pub fn generate() -> Self {
        let token = (0..REQUEST_ID_LENGTH)
            .map(|_| char::from(REQUEST_ID_ALPHABET[fastrand::usize(..REQUEST_ID_ALPHABET.len())]))
            .collect();
        Self(token)
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::borrow::Borrow<str> for RequestId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A normalized command addressed to the peers of a room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    fields: Map<String, Value>,
}

impl Command {
    /// Create an empty command.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an `{action, target?, value?}` command.
    #[must_use]
    pub fn action(
        action: impl Into<String>,
        target: Option<String>,
        value: Option<String>,
    ) -> Self {
        let mut fields = Map::new();
        fields.insert("action".into(), Value::String(action.into()));
        if let Some(target) = target {
            fields.insert("target".into(), Value::String(target));
        }
        if let Some(value) = value {
            fields.insert("value".into(), Value::String(value));
        }
        Self { fields }
    }

    /// Build a command from the positional path segments after the room.
    ///
    /// With both trailing segments present they are `target` and `value`.
    /// With only one, it is the `value` and there is no target.
    #[must_use]
    pub fn from_path(action: impl Into<String>, first: Option<String>, second: Option<String>) -> Self {
        match (first, second) {
            (Some(value), None) => Self::action(action, None, Some(value)),
            (target, value) => Self::action(action, target, value),
        }
    }

    /// The command sent by a bare room lookup.
    #[must_use]
    pub fn details() -> Self {
        Self::action(DETAILS_ACTION, None, Some("value".to_string()))
    }

    /// Build a command whose fields are the members of a JSON object.
    ///
    /// Anything other than an object contributes no fields.
    #[must_use]
    pub fn from_body(body: Value) -> Self {
        match body {
            Value::Object(fields) => Self { fields },
            _ => Self::default(),
        }
    }

    /// Build a command with a single field named after the action.
    #[must_use]
    pub fn keyed(action: impl Into<String>, body: Value) -> Self {
        let mut fields = Map::new();
        fields.insert(action.into(), body);
        Self { fields }
    }

    /// The `action` field, if it is a string.
    #[must_use]
    pub fn action_name(&self) -> Option<&str> {
        self.fields.get("action").and_then(Value::as_str)
    }

    /// Get a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Normalize a channel-variant action.
    ///
    /// `content2` through `content7` address channels 2 to 7. The action is
    /// rewritten to `content` and the channel is returned.
    pub fn take_channel_variant(&mut self) -> Option<Channel> {
        let channel = channel_variant(self.action_name()?)?;
        self.fields.insert(
            "action".into(),
            Value::String(CHANNEL_VARIANT_ACTION.to_string()),
        );
        Some(channel)
    }

    /// Seal the command into an envelope tagged with `id`.
    #[must_use]
    pub fn into_envelope(self, id: &RequestId) -> Envelope {
        let mut fields = self.fields;
        fields.insert(REQUEST_ID_KEY.into(), Value::String(id.to_string()));
        Envelope { fields }
    }
}

fn channel_variant(action: &str) -> Option<Channel> {
    let suffix = action.strip_prefix(CHANNEL_VARIANT_ACTION)?;
    match suffix.as_bytes() {
        [digit @ b'2'..=b'7'] => Some(Channel::new(i64::from(digit - b'0'))),
        _ => None,
    }
}

/// A command ready for delivery to peers.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// The request id carried by this envelope.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.fields.get(REQUEST_ID_KEY).and_then(Value::as_str)
    }

    /// Encode the envelope as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&self.fields)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sealed(command: Command) -> Value {
        let text = command
            .into_envelope(&RequestId::from("abc123xyz"))
            .to_text()
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_request_id_generation() {
        let id = RequestId::generate();
        assert_eq!(id.as_str().len(), REQUEST_ID_LENGTH);
        assert!(id
            .as_str()
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
        assert_ne!(RequestId::generate(), RequestId::generate());
    }

    #[test]
    fn test_path_command_with_target_and_value() {
        let cmd = Command::from_path("mic", Some("guest1".into()), Some("toggle".into()));
        assert_eq!(
            sealed(cmd),
            json!({"action": "mic", "target": "guest1", "value": "toggle", "get": "abc123xyz"})
        );
    }

    #[test]
    fn test_path_command_single_segment_is_value() {
        let cmd = Command::from_path("volume", Some("50".into()), None);
        let value = sealed(cmd);
        assert_eq!(value["value"], "50");
        assert!(value.get("target").is_none());
    }

    #[test]
    fn test_path_command_omits_absent_fields() {
        let value = sealed(Command::from_path("mute", None, None));
        assert_eq!(value, json!({"action": "mute", "get": "abc123xyz"}));
    }

    #[test]
    fn test_details_command() {
        let value = sealed(Command::details());
        assert_eq!(
            value,
            json!({"action": "getDetails", "value": "value", "get": "abc123xyz"})
        );
    }

    #[test]
    fn test_body_merge_overrides_get() {
        let cmd = Command::from_body(json!({"action": "layout", "get": "spoofed", "n": 2}));
        let value = sealed(cmd);
        assert_eq!(value["get"], "abc123xyz");
        assert_eq!(value["n"], 2);
    }

    #[test]
    fn test_non_object_body_has_no_fields() {
        let value = sealed(Command::from_body(json!([1, 2, 3])));
        assert_eq!(value, json!({"get": "abc123xyz"}));
    }

    #[test]
    fn test_keyed_command() {
        let value = sealed(Command::keyed("layout", json!({"slot": 1})));
        assert_eq!(value, json!({"layout": {"slot": 1}, "get": "abc123xyz"}));
    }

    #[test]
    fn test_channel_variant() {
        let mut cmd = Command::action("content3", None, Some("hi".into()));
        assert_eq!(cmd.take_channel_variant(), Some(Channel::new(3)));
        assert_eq!(cmd.action_name(), Some("content"));

        for action in ["content", "content1", "content8", "content22", "xcontent2"] {
            let mut cmd = Command::action(action, None, None);
            assert_eq!(cmd.take_channel_variant(), None, "{action}");
            assert_eq!(cmd.action_name(), Some(action));
        }
    }
}
