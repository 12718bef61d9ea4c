//! Deduplicated, insertion-ordered view of the topic
//!
//! Confirmed items arrive from the subscription session and are appended in
//! arrival order; a repeated item is a no-op. Optionally, a composer can show
//! a submission before the broker echoes it back: such entries live in a
//! separate pending lane keyed by their submission key, and only the confirmed
//! item carrying that same key replaces them.

use crate::error::Result;
use crate::messages::{Item, ItemKey};
use crate::session::ItemStream;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Topic state as observed by one subscriber
#[derive(Debug, Clone, Default)]
pub struct TopicView {
    items: Vec<Item>,
    seen: HashSet<ItemKey>,
    pending: Vec<Item>,
}

impl TopicView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from externally supplied items (duplicates are dropped)
    pub fn seeded(initial: impl IntoIterator<Item = Item>) -> Self {
        let mut view = Self::new();
        for item in initial {
            view.apply(item);
        }
        view
    }

    /// Append a confirmed item; returns false if it was already present
    ///
    /// Items without a submission key are identified by id alone.
    pub fn apply(&mut self, item: Item) -> bool {
        let key = item.key();
        if !self.seen.insert(key) {
            debug!(item_id = item.id, "Duplicate item ignored");
            return false;
        }

        self.pending.retain(|p| p.key() != key);
        self.items.push(item);
        true
    }

    /// Confirmed items in presentation order
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Show a local submission before confirmation
    ///
    /// Ignored if the item is already confirmed or pending.
    pub fn apply_pending(&mut self, item: Item) -> bool {
        let key = item.key();
        if self.seen.contains(&key) || self.pending.iter().any(|p| p.key() == key) {
            return false;
        }
        self.pending.push(item);
        true
    }

    /// Drop a pending entry whose publish failed
    pub fn discard_pending(&mut self, key: ItemKey) -> Option<Item> {
        let pos = self.pending.iter().position(|p| p.key() == key)?;
        Some(self.pending.remove(pos))
    }

    /// Entries still awaiting confirmation
    pub fn pending(&self) -> &[Item] {
        &self.pending
    }

    /// Confirmed items followed by pending ones
    pub fn entries(&self) -> Vec<Item> {
        self.items.iter().chain(self.pending.iter()).cloned().collect()
    }

    /// Id a local composer should assign to its next submission
    pub fn next_id(&self) -> u64 {
        self.items
            .iter()
            .chain(self.pending.iter())
            .map(|item| item.id)
            .max()
            .map_or(1, |max| max + 1)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.seen.contains(key)
    }
}

/// A topic view shared between a receive loop and readers on other threads
#[derive(Debug, Clone, Default)]
pub struct SharedTopicView {
    inner: Arc<Mutex<TopicView>>,
}

impl SharedTopicView {
    pub fn new(view: TopicView) -> Self {
        Self {
            inner: Arc::new(Mutex::new(view)),
        }
    }

    pub fn apply(&self, item: Item) -> bool {
        self.inner.lock().apply(item)
    }

    pub fn apply_pending(&self, item: Item) -> bool {
        self.inner.lock().apply_pending(item)
    }

    pub fn discard_pending(&self, key: ItemKey) -> Option<Item> {
        self.inner.lock().discard_pending(key)
    }

    /// Snapshot of the confirmed items
    pub fn items(&self) -> Vec<Item> {
        self.inner.lock().items().to_vec()
    }

    /// Snapshot of confirmed followed by pending entries
    pub fn entries(&self) -> Vec<Item> {
        self.inner.lock().entries()
    }

    pub fn next_id(&self) -> u64 {
        self.inner.lock().next_id()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Apply every item a session delivers, one at a time in arrival order
    ///
    /// Returns when the stream ends, or with the error that ended it.
    pub async fn follow(&self, stream: ItemStream) -> Result<()> {
        stream
            .for_each_item(|item| {
                self.apply(item);
            })
            .await
    }
}
