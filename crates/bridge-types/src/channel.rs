//! Dot-notated channel names (`host.state`, `xmc.publishing.status`).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum accepted channel length in bytes.
pub const MAX_CHANNEL_LEN: usize = 256;

/// Errors from channel name parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel name is empty")]
    Empty,

    #[error("Channel name exceeds {MAX_CHANNEL_LEN} bytes")]
    TooLong,

    #[error("Channel {0:?} has an empty segment")]
    EmptySegment(String),

    #[error("Channel {name:?} contains invalid character {ch:?}")]
    InvalidChar { name: String, ch: char },
}

/// Logical resource key used to route requests, events and subscriptions.
///
/// Segments are separated by `.` and consist of ASCII alphanumerics,
/// `_` or `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel(String);

impl Channel {
    /// Parse and validate a channel name.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError` for empty names, empty segments or characters
    /// outside `[A-Za-z0-9_-]`.
    pub fn parse(name: &str) -> Result<Self, ChannelError> {
        if name.is_empty() {
            return Err(ChannelError::Empty);
        }
        if name.len() > MAX_CHANNEL_LEN {
            return Err(ChannelError::TooLong);
        }
        for segment in name.split('.') {
            if segment.is_empty() {
                return Err(ChannelError::EmptySegment(name.to_string()));
            }
            if let Some(ch) = segment
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
            {
                return Err(ChannelError::InvalidChar {
                    name: name.to_string(),
                    ch,
                });
            }
        }
        Ok(Self(name.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segments of the name, e.g. `["host", "state"]`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// First segment, the namespace the channel belongs to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }
}

impl TryFrom<String> for Channel {
    type Error = ChannelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Channel {
    type Error = ChannelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
