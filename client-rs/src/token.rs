//! Credential binding and the subprotocol token that carries it
//!
//! Token format: `header-` + base64url-no-pad(JSON `{"x-api-key", "host"}`).
//! The realtime endpoint recognises the prefix during subprotocol
//! negotiation, so the credential never travels in an application payload.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Subprotocol token prefix
pub const TOKEN_PREFIX: &str = "header-";

/// Protocol name the realtime endpoint speaks
pub const EVENT_SUBPROTOCOL: &str = "aws-appsync-event-ws";

/// Header name the secret is bound under
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token prefix: expected '{expected}'")]
    InvalidPrefix { expected: &'static str },

    #[error("token decode error: {0}")]
    DecodeError(String),
}

/// Secret bound to a target host
///
/// Lives only for one handshake or one publish call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "x-api-key")]
    api_key: String,
    host: String,
}

impl Credential {
    pub fn new(api_key: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            host: host.into(),
        }
    }

    /// Secret value (for attaching as a request header)
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Encode as a subprotocol token
    pub fn to_protocol_token(&self) -> ProtocolToken {
        // Two string fields cannot fail to serialize
        let json = serde_json::to_vec(self).unwrap_or_default();
        ProtocolToken {
            token: format!("{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(json)),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"[REDACTED]")
            .field("host", &self.host)
            .finish()
    }
}

/// A `header-…` subprotocol token
#[derive(Clone, PartialEq, Eq)]
pub struct ProtocolToken {
    token: String,
}

impl ProtocolToken {
    /// Parse a token string, checking the prefix and the encoded binding
    pub fn parse(token: &str) -> Result<Self, TokenError> {
        let parsed = Self {
            token: token.to_string(),
        };
        parsed.credential()?;
        Ok(parsed)
    }

    /// Decode the carried credential
    pub fn credential(&self) -> Result<Credential, TokenError> {
        let encoded = self
            .token
            .strip_prefix(TOKEN_PREFIX)
            .ok_or(TokenError::InvalidPrefix {
                expected: TOKEN_PREFIX,
            })?;

        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| TokenError::DecodeError(e.to_string()))?;

        serde_json::from_slice(&json).map_err(|e| TokenError::DecodeError(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Value for the `Sec-WebSocket-Protocol` request header
    pub fn subprotocols(&self) -> String {
        format!("{}, {}", EVENT_SUBPROTOCOL, self.token)
    }
}

impl fmt::Display for ProtocolToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

impl fmt::Debug for ProtocolToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolToken([REDACTED])")
    }
}
