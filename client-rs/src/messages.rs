//! Wire types for the comments topic
//!
//! These are shared with the bridge server so both ends of every boundary
//! serialize through one definition.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::token::Credential;

/// A single comment exchanged on the topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Sequence-assigned id; assignment order is presentation order
    pub id: u64,

    /// Display name of the author
    pub author: String,

    /// Comment body
    pub content: String,

    /// Cosmetic timestamp label ("2 days ago"), never used for ordering
    #[serde(default)]
    pub date: String,

    /// Key a composer attaches so its own echo can be told apart from
    /// another publisher's item carrying the same id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<Uuid>,
}

/// Identity of an item within a topic view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub id: u64,
    pub submission: Option<Uuid>,
}

impl Item {
    pub fn new(
        id: u64,
        author: impl Into<String>,
        content: impl Into<String>,
        date: impl Into<String>,
    ) -> Self {
        Self {
            id,
            author: author.into(),
            content: content.into(),
            date: date.into(),
            submission: None,
        }
    }

    /// Tag the item with a composer submission key
    pub fn with_submission(mut self, submission: Uuid) -> Self {
        self.submission = Some(submission);
        self
    }

    pub fn key(&self) -> ItemKey {
        ItemKey {
            id: self.id,
            submission: self.submission,
        }
    }

    /// Whether the content is publishable (non-empty after trimming)
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// Body of a publish request against the broker ingress
///
/// Each event is an Item serialized to a JSON string, not a nested object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub events: Vec<String>,
}

impl Envelope {
    /// Wrap a single item
    pub fn single(channel: impl Into<String>, item: &Item) -> serde_json::Result<Self> {
        Ok(Self {
            channel: channel.into(),
            events: vec![serde_json::to_string(item)?],
        })
    }
}

/// Control frames sent from the subscriber to the realtime endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Opens the protocol conversation
    ConnectionInit,

    /// Subscribe to a channel under a correlation id
    Subscribe {
        id: String,
        channel: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        authorization: Option<Credential>,
    },

    /// Tear down a subscription
    Unsubscribe { id: String },
}

/// Frames received from the realtime endpoint
///
/// Only `event` matters for delivery; everything else (acks, keepalives) is
/// routed on `frame_type`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InboundFrame {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(rename = "type", default)]
    pub frame_type: String,

    #[serde(default)]
    pub event: Option<serde_json::Value>,

    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

impl InboundFrame {
    /// Decode the carried event, if any
    ///
    /// The broker sends events as JSON strings; an already-decoded object is
    /// accepted as well.
    pub fn item(&self) -> Option<serde_json::Result<Item>> {
        match self.event.as_ref()? {
            serde_json::Value::String(raw) => Some(serde_json::from_str(raw)),
            serde_json::Value::Null => None,
            other => Some(serde_json::from_value(other.clone())),
        }
    }

    /// Whether the broker rejected the handshake or subscription
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.frame_type.as_str(),
            "connection_error" | "subscribe_error" | "error"
        )
    }
}

/// What the token service hands an untrusted subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeGrant {
    /// `header-…` subprotocol token
    pub protocol: String,

    /// Host serving `/event/realtime`
    pub realtime_host: String,

    /// Topic the grant was issued for
    pub channel: String,
}

/// Response of the local publish entrypoint (`POST /api/comments`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}
