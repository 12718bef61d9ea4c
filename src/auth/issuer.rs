//! Credential issuing
//!
//! Only this crate ever holds the secret key. Subscribers receive a
//! [`RealtimeGrant`] carrying the encoded protocol token; publishers never see
//! the credential at all because the gateway attaches it server-side.

use commentbus_client::{Channel, Credential, ProtocolToken, RealtimeGrant};
use std::fmt;
use thiserror::Error;

/// Environment variable holding the broker API key
pub const API_KEY_ENV: &str = "COMMENTBUS_API_KEY";

/// Environment variable holding the broker HTTP host
pub const HTTP_HOST_ENV: &str = "COMMENTBUS_HTTP_HOST";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(&'static str),
}

/// Broker API key
#[derive(Clone)]
pub struct SecretKey {
    key: String,
}

impl SecretKey {
    pub fn new(key: String) -> Self {
        Self { key }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var(API_KEY_ENV).ok().map(Self::new)
    }

    /// Get the key (for internal use)
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// Build the credential binding a secret to a host
pub fn issue(secret: &SecretKey, host: &str) -> Credential {
    Credential::new(secret.as_str(), host)
}

/// Build the subprotocol token for a secret and host
pub fn issue_token(secret: &SecretKey, host: &str) -> ProtocolToken {
    issue(secret, host).to_protocol_token()
}

/// Issues credentials for one broker host
#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    secret: SecretKey,
    host: String,
}

impl CredentialIssuer {
    /// Fails if either value is missing; nothing can connect without both
    pub fn new(secret: SecretKey, host: impl Into<String>) -> Result<Self, ConfigError> {
        let host = host.into();

        if secret.as_str().trim().is_empty() {
            return Err(ConfigError::Missing(API_KEY_ENV));
        }
        if host.trim().is_empty() {
            return Err(ConfigError::Missing(HTTP_HOST_ENV));
        }

        Ok(Self { secret, host })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = SecretKey::from_env().ok_or(ConfigError::Missing(API_KEY_ENV))?;
        let host = std::env::var(HTTP_HOST_ENV).map_err(|_| ConfigError::Missing(HTTP_HOST_ENV))?;
        Self::new(secret, host)
    }

    /// Host the credentials are bound to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Fresh credential for one publish call or handshake
    pub fn credential(&self) -> Credential {
        issue(&self.secret, &self.host)
    }

    /// Fresh subprotocol token
    pub fn protocol_token(&self) -> ProtocolToken {
        issue_token(&self.secret, &self.host)
    }

    /// Grant handed to an untrusted subscriber
    pub fn grant(&self, channel: &Channel, realtime_host: &str) -> RealtimeGrant {
        RealtimeGrant {
            protocol: self.protocol_token().to_string(),
            realtime_host: realtime_host.to_string(),
            channel: channel.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(key: &str) -> SecretKey {
        SecretKey::new(key.to_string())
    }

    #[test]
    fn test_issue_credential() {
        let credential = issue(&secret("da2-key"), "api.example.com");
        assert_eq!(credential.api_key(), "da2-key");
        assert_eq!(credential.host(), "api.example.com");
    }

    #[test]
    fn test_issue_token_roundtrip() {
        let token = issue_token(&secret("da2-key"), "api.example.com");
        assert!(token.as_str().starts_with("header-"));

        let decoded = ProtocolToken::parse(token.as_str()).unwrap().credential().unwrap();
        assert_eq!(decoded, Credential::new("da2-key", "api.example.com"));
    }

    #[test]
    fn test_issue_token_deterministic() {
        let a = issue_token(&secret("k"), "h");
        let b = issue_token(&secret("k"), "h");
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_issuer_rejects_missing_values() {
        assert_eq!(
            CredentialIssuer::new(secret(""), "h").unwrap_err(),
            ConfigError::Missing(API_KEY_ENV)
        );
        assert_eq!(
            CredentialIssuer::new(secret("k"), "  ").unwrap_err(),
            ConfigError::Missing(HTTP_HOST_ENV)
        );
    }

    #[test]
    fn test_grant_contents() {
        let issuer = CredentialIssuer::new(secret("k"), "api.example.com").unwrap();
        let grant = issuer.grant(&Channel::default(), "rt.example.com");

        assert_eq!(grant.channel, "/default/comments");
        assert_eq!(grant.realtime_host, "rt.example.com");
        assert_eq!(grant.protocol, issuer.protocol_token().to_string());

        // The grant never repeats the secret in the clear
        let json = serde_json::to_string(&grant).unwrap();
        assert!(!json.contains("\"k\""));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let issuer = CredentialIssuer::new(secret("top-secret"), "h").unwrap();
        let debug = format!("{:?}", issuer);
        assert!(!debug.contains("top-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
