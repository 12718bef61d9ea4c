//! Topic identifiers
//!
//! Channels are slash-separated paths rooted at a namespace:
//! `/default/comments`. Each segment must match `[a-zA-Z0-9-]{1,50}` and a
//! channel has between one and five segments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The topic every component talks about unless configured otherwise
pub const DEFAULT_CHANNEL: &str = "/default/comments";

const MAX_SEGMENTS: usize = 5;
const MAX_SEGMENT_LEN: usize = 50;

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_SEGMENT_LEN
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel name cannot be empty")]
    Empty,

    #[error("channel must start with '/'")]
    MissingLeadingSlash,

    #[error("invalid segment '{0}': must match [a-zA-Z0-9-]{{1,50}}")]
    InvalidSegment(String),

    #[error("empty segment in channel name")]
    EmptySegment,

    #[error("channel has {0} segments, at most 5 are allowed")]
    TooManySegments(usize),
}

/// A validated channel path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel {
    name: String,
}

impl Channel {
    /// Parse and validate a channel path
    pub fn parse(name: &str) -> Result<Self, ChannelError> {
        if name.is_empty() {
            return Err(ChannelError::Empty);
        }

        let rest = name
            .strip_prefix('/')
            .ok_or(ChannelError::MissingLeadingSlash)?;

        let mut count = 0;
        for part in rest.split('/') {
            if part.is_empty() {
                return Err(ChannelError::EmptySegment);
            }
            if !is_valid_segment(part) {
                return Err(ChannelError::InvalidSegment(part.to_string()));
            }
            count += 1;
        }

        if count > MAX_SEGMENTS {
            return Err(ChannelError::TooManySegments(count));
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// First segment
    pub fn namespace(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.name[1..].split('/')
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            name: DEFAULT_CHANNEL.to_string(),
        }
    }
}

impl FromStr for Channel {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Channel {
    type Error = ChannelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.name
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
