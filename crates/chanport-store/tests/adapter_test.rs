//! Adapter integration tests: flush triggers, retry/dead-letter paths,
//! and quota-guarded throttling against a metered backend.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use chanport_core::AppError;
use chanport_core::config::quota::QuotaConfig;
use chanport_core::config::store::StoreConfig;
use chanport_core::result::AppResult;
use chanport_core::traits::DocumentStore;
use chanport_entity::{BatchOperation, WritePriority};
use chanport_store::{BatchedStoreAdapter, MemoryDocumentStore, QuotaGuard};

fn fast_config() -> StoreConfig {
    StoreConfig {
        flush_interval_seconds: 60,
        max_batch_size: 20,
        queue_capacity: 1024,
        max_attempts: 3,
        retry_base_ms: 1,
        retry_cap_ms: 4,
        cache_ttl_seconds: 300,
        cache_capacity: 100,
    }
}

fn roomy_quota() -> Arc<QuotaGuard> {
    Arc::new(QuotaGuard::new(QuotaConfig::default()))
}

#[tokio::test]
async fn test_force_flush_drains_the_queue() {
    let store = Arc::new(MemoryDocumentStore::new());
    let adapter = BatchedStoreAdapter::start(
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        roomy_quota(),
        fast_config(),
    );

    for i in 0..3 {
        adapter
            .set("items", &format!("k{i}"), json!({ "i": i }), WritePriority::Normal)
            .await
            .expect("enqueue");
    }
    assert_eq!(store.document_count(), 0, "below both flush triggers");

    adapter.force_flush().await.expect("flush");
    assert_eq!(store.document_count(), 3);
    let stats = adapter.stats();
    assert_eq!(stats.flushed_total, 3);
    assert_eq!(stats.pending, 0);
    assert!(stats.dead_letter_count == 0);
}

#[tokio::test]
async fn test_queue_size_trigger_flushes_without_interval() {
    let store = Arc::new(MemoryDocumentStore::new());
    // Interval is 60 s; only the max-queue-size trigger can fire in time.
    let adapter = BatchedStoreAdapter::start(
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        roomy_quota(),
        StoreConfig {
            max_batch_size: 5,
            ..fast_config()
        },
    );

    for i in 0..5 {
        adapter
            .set("items", &format!("k{i}"), json!({ "i": i }), WritePriority::Normal)
            .await
            .expect("enqueue");
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    while store.document_count() < 5 {
        assert!(Instant::now() < deadline, "size trigger did not fire");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(adapter.stats().flushed_total, 5);
}

#[tokio::test]
async fn test_enqueue_confirmed_returns_after_the_write_lands() {
    let store = Arc::new(MemoryDocumentStore::new());
    let adapter = BatchedStoreAdapter::start(
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        roomy_quota(),
        fast_config(),
    );

    let op = BatchOperation::set("checkpoints", "job-1", json!({ "n": 1 }), WritePriority::Critical);
    adapter.enqueue_confirmed(op).await.expect("confirmed write");

    let doc = store.get("checkpoints", "job-1").await.expect("get");
    assert_eq!(doc, Some(json!({ "n": 1 })));
}

/// Fails the first N batched writes wholesale with a transient error.
#[derive(Debug)]
struct FlakyStore {
    inner: MemoryDocumentStore,
    failures_left: AtomicU32,
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, key: &str) -> AppResult<Option<serde_json::Value>> {
        self.inner.get(collection, key).await
    }

    async fn batched_write(&self, ops: &[BatchOperation]) -> AppResult<Vec<AppResult<()>>> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::transient_fetch("backend hiccup"));
        }
        self.inner.batched_write(ops).await
    }
}

#[tokio::test]
async fn test_transient_backend_failures_retry_until_success() {
    let store = Arc::new(FlakyStore {
        inner: MemoryDocumentStore::new(),
        failures_left: AtomicU32::new(2),
    });
    let adapter = BatchedStoreAdapter::start(
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        roomy_quota(),
        fast_config(),
    );

    for i in 0..5 {
        adapter
            .set("items", &format!("k{i}"), json!({ "i": i }), WritePriority::Normal)
            .await
            .expect("enqueue");
    }
    adapter.force_flush().await.expect("flush retries through hiccups");

    assert_eq!(store.inner.document_count(), 5);
    let stats = adapter.stats();
    assert_eq!(stats.flushed_total, 5);
    assert_eq!(stats.dead_letter_count, 0);
}

/// Rejects individual operations whose key starts with `bad`.
#[derive(Debug)]
struct RejectingStore {
    inner: MemoryDocumentStore,
}

#[async_trait]
impl DocumentStore for RejectingStore {
    async fn get(&self, collection: &str, key: &str) -> AppResult<Option<serde_json::Value>> {
        self.inner.get(collection, key).await
    }

    async fn batched_write(&self, ops: &[BatchOperation]) -> AppResult<Vec<AppResult<()>>> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            if op.key.starts_with("bad") {
                results.push(Err(AppError::internal("malformed document")));
            } else {
                results.extend(self.inner.batched_write(std::slice::from_ref(op)).await?);
            }
        }
        Ok(results)
    }
}

#[tokio::test]
async fn test_operations_that_exhaust_attempts_dead_letter() {
    let store = Arc::new(RejectingStore {
        inner: MemoryDocumentStore::new(),
    });
    let adapter = BatchedStoreAdapter::start(
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        roomy_quota(),
        StoreConfig {
            max_attempts: 2,
            ..fast_config()
        },
    );

    adapter
        .set("items", "good", json!({ "ok": true }), WritePriority::Normal)
        .await
        .expect("enqueue");
    adapter
        .set("items", "bad:1", json!({ "ok": false }), WritePriority::Normal)
        .await
        .expect("enqueue");

    // First pass: the good op lands, the bad one is requeued.
    let _ = adapter.force_flush().await;
    assert_eq!(store.inner.document_count(), 1);
    assert_eq!(adapter.stats().dead_letter_count, 0);
    assert_eq!(adapter.stats().retried_total, 1);

    // Second pass exhausts the attempt budget.
    let _ = adapter.force_flush().await;
    let dead = adapter.dead_letter();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].key, "bad:1");
    assert_eq!(dead[0].attempt_count, 2);
    assert_eq!(adapter.stats().flushed_total, 1);
}

/// Records when each backend call happened and how many ops it carried.
#[derive(Debug)]
struct MeteredStore {
    inner: MemoryDocumentStore,
    started: Instant,
    calls: Mutex<Vec<(Duration, usize)>>,
}

#[async_trait]
impl DocumentStore for MeteredStore {
    async fn get(&self, collection: &str, key: &str) -> AppResult<Option<serde_json::Value>> {
        self.inner.get(collection, key).await
    }

    async fn batched_write(&self, ops: &[BatchOperation]) -> AppResult<Vec<AppResult<()>>> {
        self.calls
            .lock()
            .expect("call log poisoned")
            .push((self.started.elapsed(), ops.len()));
        self.inner.batched_write(ops).await
    }
}

#[tokio::test]
async fn test_quota_guard_throttles_without_dropping_data() {
    let window = Duration::from_millis(250);
    let per_window_limit = 30u64;
    let quota = Arc::new(QuotaGuard::with_minute_window(
        QuotaConfig {
            writes_per_minute: per_window_limit,
            ..QuotaConfig::default()
        },
        window,
    ));
    let store = Arc::new(MeteredStore {
        inner: MemoryDocumentStore::new(),
        started: Instant::now(),
        calls: Mutex::new(Vec::new()),
    });
    let adapter = BatchedStoreAdapter::start(
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        Arc::clone(&quota),
        fast_config(),
    );

    let begun = Instant::now();
    for i in 0..100 {
        adapter
            .set("items", &format!("k{i}"), json!({ "i": i }), WritePriority::Normal)
            .await
            .expect("enqueue never drops");
    }

    // Everything must land eventually, throttled across several windows.
    let deadline = Instant::now() + Duration::from_secs(10);
    while adapter.stats().flushed_total < 100 {
        assert!(
            Instant::now() < deadline,
            "quota-held operations were never flushed"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(store.inner.document_count(), 100);
    assert!(adapter.dead_letter().is_empty());
    assert!(
        begun.elapsed() >= Duration::from_millis(600),
        "100 ops at 30/window cannot finish this fast if the guard works"
    );

    // No backend-aligned window saw more than twice the per-window budget
    // (the overshoot tolerance for misaligned windows).
    let calls = store.calls.lock().expect("call log poisoned").clone();
    let total: usize = calls.iter().map(|(_, n)| n).sum();
    assert_eq!(total, 100);
    let max_bucket = {
        let mut buckets = std::collections::BTreeMap::new();
        for (at, n) in &calls {
            *buckets.entry(at.as_millis() as u64 / 250).or_insert(0usize) += n;
        }
        buckets.into_values().max().unwrap_or(0)
    };
    assert!(
        max_bucket as u64 <= per_window_limit * 2,
        "a window carried {max_bucket} ops against a budget of {per_window_limit}"
    );
}
