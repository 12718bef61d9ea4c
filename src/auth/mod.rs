//! Credential issuing for the broker
//!
//! - Publish path: the credential is attached as `x-api-key` / `host` request
//!   headers by the gateway.
//! - Subscribe path: the credential is encoded as a `header-` subprotocol
//!   token and handed to subscribers inside a grant.

mod issuer;

pub use issuer::{
    issue, issue_token, ConfigError, CredentialIssuer, SecretKey, API_KEY_ENV, HTTP_HOST_ENV,
};
