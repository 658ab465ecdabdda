//! In-process content source.
//!
//! Seedable [`ContentSource`] used by the `memory` provider mode and the
//! test suite. Supports injecting transient fetch failures so retry paths
//! can be exercised deterministically.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use chanport_core::AppError;
use chanport_core::result::AppResult;
use chanport_core::traits::ContentSource;
use chanport_entity::ContentItem;

/// In-memory [`ContentSource`] over seeded collections.
#[derive(Debug, Default)]
pub struct MemorySource {
    /// Items per source collection, ordered by id.
    collections: DashMap<String, BTreeMap<i64, ContentItem>>,
    /// Items delivered per destination, in emit order.
    sent: Mutex<Vec<(String, ContentItem)>>,
    /// Remote id counter for `send_item`.
    next_remote_id: AtomicI64,
    /// Remaining fetch calls to fail with a transient error.
    fetch_failures: AtomicU32,
    /// Artificial latency per fetch call, in milliseconds.
    fetch_delay_ms: AtomicU32,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self {
            next_remote_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    /// Seed a collection with items.
    pub fn seed(&self, source: &str, items: impl IntoIterator<Item = ContentItem>) {
        let mut collection = self.collections.entry(source.to_string()).or_default();
        for item in items {
            collection.insert(item.id, item);
        }
    }

    /// Seed a collection with standalone text items at the given ids.
    pub fn seed_ids(&self, source: &str, ids: impl IntoIterator<Item = i64>) {
        self.seed(
            source,
            ids.into_iter()
                .map(|id| ContentItem::text(id, serde_json::json!({ "id": id }))),
        );
    }

    /// Fail the next `count` fetch calls with a transient error.
    pub fn inject_fetch_failures(&self, count: u32) {
        self.fetch_failures.store(count, Ordering::SeqCst);
    }

    /// Delay every fetch call by `millis`.
    pub fn set_fetch_delay_ms(&self, millis: u32) {
        self.fetch_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Items delivered to a destination so far, in emit order.
    pub fn sent_to(&self, destination: &str) -> Vec<ContentItem> {
        self.sent
            .lock()
            .expect("sent log poisoned")
            .iter()
            .filter(|(dst, _)| dst == destination)
            .map(|(_, item)| item.clone())
            .collect()
    }
}

#[async_trait]
impl ContentSource for MemorySource {
    async fn get_items_by_id(
        &self,
        source: &str,
        ids: &[i64],
    ) -> AppResult<Vec<Option<ContentItem>>> {
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
        }
        if self
            .fetch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::transient_fetch("injected fetch failure"));
        }

        let collection = self.collections.get(source);
        Ok(ids
            .iter()
            .map(|id| {
                collection
                    .as_ref()
                    .and_then(|c| c.value().get(id).cloned())
            })
            .collect())
    }

    async fn send_item(&self, destination: &str, item: &ContentItem) -> AppResult<i64> {
        self.sent
            .lock()
            .expect("sent log poisoned")
            .push((destination.to_string(), item.clone()));
        Ok(self.next_remote_id.fetch_add(1, Ordering::SeqCst))
    }
}
