//! Commentbus - realtime comments bridge
//!
//! The trusted half of the comments topic: issues broker credentials, hands
//! subscribers a realtime grant, and publishes new comments to the broker's
//! ingress endpoint. The untrusted subscriber half lives in
//! `commentbus-client`.

pub mod auth;
pub mod gateway;
pub mod server;

pub use auth::{CredentialIssuer, SecretKey};
pub use gateway::{GatewayConfig, PublishError, PublishGateway};
pub use server::{create_router, run_bridge_server, BridgeConfig, BridgeState};
