//! Comments topic client
//!
//! Subscribes to the comments topic over the realtime WebSocket endpoint and
//! publishes through the bridge server's HTTP entrypoint. The two paths are
//! separate transports; a [`TopicView`] reconciles what arrives into one
//! deduplicated, arrival-ordered list.
//!
//! # Example
//!
//! ```no_run
//! use commentbus_client::{
//!     Composer, HttpTokenSource, PublishClient, PublishConfig, SessionConfig,
//!     SharedTopicView, SubscriptionSession, TopicView,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tokens = Arc::new(HttpTokenSource::new("http://localhost:3000")?);
//!     let session = SubscriptionSession::new(SessionConfig::default(), tokens);
//!     let view = SharedTopicView::new(TopicView::new());
//!
//!     let stream = session.open().await?;
//!     let follower = {
//!         let view = view.clone();
//!         tokio::spawn(async move { view.follow(stream).await })
//!     };
//!
//!     let composer = Composer::new(
//!         PublishClient::new(PublishConfig::new("http://localhost:3000"))?,
//!         "Current User",
//!     );
//!     composer.set_draft("Great article!");
//!     composer.submit(&view).await?;
//!
//!     session.close().await?;
//!     follower.await??;
//!     Ok(())
//! }
//! ```

pub mod channel;
mod config;
mod error;
mod messages;
mod publish;
mod session;
mod source;
pub mod token;
mod view;

pub use channel::{Channel, DEFAULT_CHANNEL};
pub use config::{PublishConfig, SessionConfig, REALTIME_PATH};
pub use error::{Error, Result};
pub use messages::{
    ClientFrame, Envelope, InboundFrame, Item, ItemKey, PublishResponse, RealtimeGrant,
};
pub use publish::{Composer, PublishClient, COMMENTS_PATH};
pub use session::{ConnectionState, ItemStream, SubscriptionSession};
pub use source::{HttpTokenSource, StaticTokenSource, TokenSource, TOKEN_PATH};
pub use token::{Credential, ProtocolToken};
pub use view::{SharedTopicView, TopicView};
