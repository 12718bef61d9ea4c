//! Publish gateway: one-shot requests against the broker's ingress endpoint
//!
//! The gateway never touches a topic view. A successful publish only means
//! the broker accepted the envelope; subscribers see the item when it comes
//! back over their own connection.

use crate::auth::CredentialIssuer;
use commentbus_client::token::API_KEY_HEADER;
use commentbus_client::{Channel, Envelope, Item};
use reqwest::header::HOST;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Ingress path on the broker HTTP host
pub const INGRESS_PATH: &str = "/event";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("content is empty")]
    EmptyContent,

    #[error("ingress rejected the event with status {status}")]
    Rejected { status: u16 },

    #[error("ingress unreachable: {0}")]
    Unreachable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PublishError {
    /// Reason shown to the person whose draft was not sent
    pub fn user_message(&self) -> &'static str {
        match self {
            PublishError::EmptyContent => "Comment cannot be empty",
            _ => "Failed to post comment",
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Topic every envelope is addressed to
    pub channel: Channel,

    /// Request timeout
    pub timeout: Duration,

    /// Use `http://` for the ingress (DANGEROUS - only for local testing)
    pub dangerous_plaintext: bool,
}

impl GatewayConfig {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            timeout: Duration::from_secs(10),
            dangerous_plaintext: false,
        }
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Talk plain HTTP to the ingress (DANGEROUS - only for local testing)
    pub fn dangerous_plaintext(mut self) -> Self {
        self.dangerous_plaintext = true;
        self
    }

    /// Ingress URL for a host
    pub fn ingress_url(&self, host: &str) -> String {
        let scheme = if self.dangerous_plaintext { "http" } else { "https" };
        format!("{}://{}{}", scheme, host, INGRESS_PATH)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new(Channel::default())
    }
}

/// Publishes items to the broker ingress
#[derive(Clone)]
pub struct PublishGateway {
    issuer: Arc<CredentialIssuer>,
    config: GatewayConfig,
    client: Client,
}

impl PublishGateway {
    pub fn new(issuer: Arc<CredentialIssuer>, config: GatewayConfig) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PublishError::Unreachable(e.to_string()))?;

        Ok(Self {
            issuer,
            config,
            client,
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.config.channel
    }

    /// Publish one item
    ///
    /// Empty content is rejected before any network I/O. Retrying after a
    /// failure sends a brand-new event; nothing here deduplicates retries.
    pub async fn publish(&self, item: &Item) -> Result<(), PublishError> {
        if !item.has_content() {
            return Err(PublishError::EmptyContent);
        }

        let envelope = Envelope::single(self.config.channel.as_str(), item)?;
        let credential = self.issuer.credential();
        let url = self.config.ingress_url(credential.host());

        debug!(item_id = item.id, channel = %self.config.channel, "Publishing to ingress");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, credential.api_key())
            .header(HOST, credential.host())
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Ingress unreachable");
                PublishError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(item_id = item.id, status = %status, "Ingress rejected event");
            return Err(PublishError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!(item_id = item.id, status = %status, "Event accepted");
        Ok(())
    }
}
