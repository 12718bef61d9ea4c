//! Publishing through the bridge's local entrypoint (`POST /api/comments`)

use crate::config::PublishConfig;
use crate::error::{Error, Result};
use crate::messages::{Item, PublishResponse};
use crate::view::SharedTopicView;
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

/// Path of the local publish entrypoint
pub const COMMENTS_PATH: &str = "/api/comments";

const GENERIC_FAILURE: &str = "Failed to post comment";

/// Client for the bridge's publish entrypoint
///
/// Publishing does not touch any topic view; visibility is confirmed only
/// when the item comes back over the subscription.
#[derive(Clone)]
pub struct PublishClient {
    config: PublishConfig,
    client: Client,
}

impl PublishClient {
    pub fn new(config: PublishConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// Send one item; empty content is rejected before any request is made
    pub async fn publish(&self, item: &Item) -> Result<()> {
        if !item.has_content() {
            return Err(Error::EmptyContent);
        }

        let response = self
            .client
            .post(self.config.url(COMMENTS_PATH))
            .json(item)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Publish entrypoint unreachable");
                Error::Publish(GENERIC_FAILURE.to_string())
            })?;

        let status = response.status();
        let body = response.json::<PublishResponse>().await.ok();

        match body {
            Some(body) if status.is_success() && body.success => {
                debug!(item_id = item.id, "Item published");
                Ok(())
            }
            body => {
                let reason = body
                    .and_then(|b| b.error)
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string());
                warn!(item_id = item.id, status = %status, reason = %reason, "Publish rejected");
                Err(Error::Publish(reason))
            }
        }
    }
}

/// Resets the in-flight flag on every exit path
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One submission unit: a draft plus a single-flight guard
///
/// A failed submit leaves the draft in place so nothing typed is lost.
pub struct Composer {
    client: PublishClient,
    author: String,
    draft: Mutex<String>,
    in_flight: AtomicBool,
    optimistic: bool,
}

impl Composer {
    pub fn new(client: PublishClient, author: impl Into<String>) -> Self {
        Self {
            client,
            author: author.into(),
            draft: Mutex::new(String::new()),
            in_flight: AtomicBool::new(false),
            optimistic: false,
        }
    }

    /// Show submissions in the view as pending until they are confirmed
    pub fn optimistic(mut self) -> Self {
        self.optimistic = true;
        self
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        *self.draft.lock() = text.into();
    }

    pub fn draft(&self) -> String {
        self.draft.lock().clone()
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Publish the current draft under the view's next id
    ///
    /// On success the draft is cleared (unless it was edited meanwhile); on
    /// failure it is kept and any pending entry is withdrawn.
    pub async fn submit(&self, view: &SharedTopicView) -> Result<Item> {
        let content = self.draft.lock().trim().to_string();
        if content.is_empty() {
            return Err(Error::EmptyContent);
        }

        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(Error::SubmitInFlight);
        }
        let _guard = InFlight(&self.in_flight);

        let item = Item::new(view.next_id(), self.author.clone(), content, "Just now")
            .with_submission(Uuid::new_v4());
        if self.optimistic {
            view.apply_pending(item.clone());
        }

        match self.client.publish(&item).await {
            Ok(()) => {
                let mut draft = self.draft.lock();
                if draft.trim() == item.content {
                    draft.clear();
                }
                Ok(item)
            }
            Err(e) => {
                if self.optimistic {
                    view.discard_pending(item.key());
                }
                Err(e)
            }
        }
    }
}
