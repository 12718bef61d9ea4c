//! Where a subscription session gets its grant from
//!
//! The secret never reaches the subscriber: an untrusted process asks the
//! bridge's token service, and only trusted processes may hold a pre-issued
//! grant.

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::messages::RealtimeGrant;
use crate::token::ProtocolToken;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Path of the token service on the bridge server
pub const TOKEN_PATH: &str = "/api/realtime/token";

/// Supplies realtime grants to a session before each connection attempt
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn request_token(&self, channel: &Channel) -> Result<RealtimeGrant>;
}

/// Fetches grants from the bridge server's token service
pub struct HttpTokenSource {
    base_url: String,
    client: Client,
}

impl HttpTokenSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn request_token(&self, channel: &Channel) -> Result<RealtimeGrant> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), TOKEN_PATH);
        debug!(channel = %channel, "Requesting realtime grant");

        let response = self
            .client
            .get(&url)
            .query(&[("channel", channel.as_str())])
            .send()
            .await
            .map_err(|e| Error::Connect(format!("token service unreachable: {}", e)))?;

        match response.status() {
            status if status.is_success() => {
                let grant: RealtimeGrant = response.json().await?;
                ProtocolToken::parse(&grant.protocol)?;
                Ok(grant)
            }
            StatusCode::NOT_FOUND => Err(Error::Config(format!(
                "token service does not serve channel {}",
                channel
            ))),
            status => Err(Error::Connect(format!("token service returned {}", status))),
        }
    }
}

/// Serves one pre-issued grant; for trusted callers and tests
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    grant: RealtimeGrant,
}

impl StaticTokenSource {
    pub fn new(grant: RealtimeGrant) -> Self {
        Self { grant }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn request_token(&self, channel: &Channel) -> Result<RealtimeGrant> {
        if self.grant.channel != channel.as_str() {
            return Err(Error::Config(format!(
                "grant issued for {}, not {}",
                self.grant.channel, channel
            )));
        }
        Ok(self.grant.clone())
    }
}
