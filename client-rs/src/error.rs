//! Error types for the comments client

use crate::channel::ChannelError;
use crate::token::TokenError;
use thiserror::Error;

/// Errors that can occur when subscribing to or publishing on the topic
#[derive(Error, Debug)]
pub enum Error {
    /// Required configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection could not be established or the handshake was rejected
    #[error("Connection error: {0}")]
    Connect(String),

    /// An inbound frame could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The publish entrypoint rejected the item or was unreachable
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Content was empty after trimming; nothing was sent
    #[error("Comment cannot be empty")]
    EmptyContent,

    /// A submission from the same composer is already in flight
    #[error("A submission is already in progress")]
    SubmitInFlight,

    /// Grant carried an unusable token
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Channel path failed validation
    #[error("Invalid channel: {0}")]
    InvalidChannel(#[from] ChannelError),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to serialize/deserialize message
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// The session has been closed
    #[error("Session closed")]
    Closed,
}

impl Error {
    /// Message fit for showing next to a restored draft
    pub fn user_message(&self) -> String {
        match self {
            Error::EmptyContent | Error::SubmitInFlight => self.to_string(),
            Error::Publish(reason) => reason.clone(),
            _ => "Failed to post comment".to_string(),
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;
