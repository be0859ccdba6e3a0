//! Channel numbers for sub-addressing inside a room.
//!
//! A command is sent on a channel (default `1`). Peer inbound filters and
//! outbound tags are `Option<Tag>`: a zero or otherwise falsy value on the
//! wire means "unset", any other value is kept and compared.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// An integer channel within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(i64);

impl Channel {
    /// The channel used when a caller does not pick one.
    pub const DEFAULT: Channel = Channel(1);

    /// Create a channel from a number.
    #[must_use]
    pub const fn new(number: i64) -> Self {
        Self(number)
    }

    /// Get the channel number.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this is the default channel.
    #[must_use]
    pub fn is_default(self) -> bool {
        self == Self::DEFAULT
    }

    /// Parse the leading integer of a string, ignoring trailing garbage.
    ///
    /// `"3"`, `" 3"` and `"3abc"` all parse to channel 3; `"abc"` and `""`
    /// yield `None`.
    #[must_use]
    pub fn parse_lenient(input: &str) -> Option<Self> {
        let s = input.trim_start();
        let (negative, digits) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let end = digits
            .bytes()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(digits.len());
        if end == 0 {
            return None;
        }
        let magnitude: i64 = digits[..end].parse().ok()?;
        Some(Self(if negative { -magnitude } else { magnitude }))
    }
}

/// A peer's inbound filter or outbound tag.
///
/// Values that read as a whole number compare as that [`Channel`]. Any
/// other value is kept as an opaque token that only matches itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// A numeric channel.
    Channel(Channel),
    /// A non-numeric value.
    Token(String),
}

impl Tag {
    /// Parse a filter or tag from a connect-path segment.
    ///
    /// Only the leading integer counts; zero and unparseable segments
    /// leave the attribute unset.
    #[must_use]
    pub fn from_segment(segment: &str) -> Option<Self> {
        Channel::parse_lenient(segment)
            .filter(|c| c.0 != 0)
            .map(Tag::Channel)
    }

    /// Read a filter or tag from a JSON frame field.
    ///
    /// `0`, `false`, `null` and `""` leave the attribute unset. Numbers
    /// and numeric strings compare by value, `true` as channel 1.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null | Value::Bool(false) => None,
            Value::Bool(true) => Some(Tag::Channel(Channel::DEFAULT)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => None,
                Some(number) => Some(Tag::Channel(Channel(number))),
                None => n.as_f64().filter(|f| *f != 0.0).map(Self::from_number),
            },
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(match numeric_text(s) {
                Some(number) => Self::from_number(number),
                None => Tag::Token(s.clone()),
            }),
            Value::Array(_) | Value::Object(_) => Some(Tag::Token(value.to_string())),
        }
    }

    fn from_number(number: f64) -> Self {
        if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
            Tag::Channel(Channel(number as i64))
        } else {
            Tag::Token(number.to_string())
        }
    }

    /// The channel, for numeric tags.
    #[must_use]
    pub fn channel(&self) -> Option<Channel> {
        match self {
            Tag::Channel(channel) => Some(*channel),
            Tag::Token(_) => None,
        }
    }

    /// Whether this filter admits a command on `channel`.
    #[must_use]
    pub fn admits(&self, channel: Channel) -> bool {
        self.channel() == Some(channel)
    }
}

/// Numeric value of a string the way loose comparison reads it: blank is
/// zero, otherwise the whole trimmed text must be a finite number.
fn numeric_text(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
}

impl From<Channel> for Tag {
    fn from(channel: Channel) -> Self {
        Tag::Channel(channel)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Channel(channel) => write!(f, "{channel}"),
            Tag::Token(token) => write!(f, "{token:?}"),
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Channel {
    fn from(number: i64) -> Self {
        Self(number)
    }
}
