//! Id-space discovery over sparse ranges.
//!
//! The discoverer walks a range in small probe windows and reports which
//! ids actually hold content. Every id in the range is probed exactly
//! once, directly — an empty window advances the cursor only after its
//! probe ran, so real ids can never be skipped no matter how sparse the
//! neighborhood. The probe window is an independent knob from the
//! transfer batch size.

use std::sync::Arc;

use tracing::{debug, warn};

use chanport_core::retry::{RetryPolicy, retry_with_backoff};
use chanport_core::traits::ContentSource;
use chanport_entity::IdRange;

/// Outcome of probing one window.
#[derive(Debug, Clone)]
pub enum Probe {
    /// The window was probed; `ids` holds the present ids (possibly none).
    Found {
        /// The window that was probed.
        window: IdRange,
        /// Ids confirmed to hold content, in increasing order.
        ids: Vec<i64>,
    },
    /// Retries were exhausted; the window is an unresolved gap to re-scan
    /// later. The job continues past it.
    Gap {
        /// The window that could not be probed.
        window: IdRange,
    },
}

/// Windowed prober for a sparse id space.
#[derive(Debug, Clone)]
pub struct Discoverer {
    source: Arc<dyn ContentSource>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl Discoverer {
    /// Create a discoverer probing `batch_size` ids per window.
    pub fn new(source: Arc<dyn ContentSource>, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// The next window to probe from `cursor`, or `None` when the cursor
    /// has passed the end of the range. Restartable: the cursor is the
    /// only state.
    pub fn next_window(&self, range: IdRange, cursor: i64) -> Option<IdRange> {
        range.window_at(cursor, self.batch_size)
    }

    /// Probe one window for present ids.
    pub async fn probe(&self, source_name: &str, window: IdRange) -> Probe {
        let ids: Vec<i64> = window.ids().collect();

        let result = retry_with_backoff(&self.retry, "discovery probe", |_| async {
            self.source.get_items_by_id(source_name, &ids).await
        })
        .await;

        match result {
            Ok(items) => {
                let present: Vec<i64> = ids
                    .iter()
                    .zip(items.iter())
                    .filter(|(_, item)| item.is_some())
                    .map(|(id, _)| *id)
                    .collect();
                debug!(
                    "Probed window {}: {} of {} ids present",
                    window,
                    present.len(),
                    ids.len()
                );
                Probe::Found {
                    window,
                    ids: present,
                }
            }
            Err(e) => {
                warn!(
                    "Probe of window {} exhausted retries, recording gap: {}",
                    window, e
                );
                Probe::Gap { window }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use super::*;
    use crate::source::MemorySource;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: false,
        }
    }

    /// Drive discovery over a full range and collect every present id.
    async fn discover_all(discoverer: &Discoverer, range: IdRange) -> Vec<i64> {
        let mut found = Vec::new();
        let mut cursor = range.start;
        while let Some(window) = discoverer.next_window(range, cursor) {
            match discoverer.probe("src", window).await {
                Probe::Found { ids, .. } => found.extend(ids),
                Probe::Gap { .. } => panic!("unexpected gap"),
            }
            cursor = window.end + 1;
        }
        found
    }

    #[tokio::test]
    async fn test_discovery_returns_exact_id_set() {
        // Real ids clustered at both edges of a mostly-empty range; the
        // result must be exact regardless of probe window size.
        let real: BTreeSet<i64> = (9..=208).chain(1600..=2096).collect();
        let source = Arc::new(MemorySource::new());
        source.seed_ids("src", real.iter().copied());

        for batch_size in [1usize, 100, 150, 2088, 5000] {
            let discoverer = Discoverer::new(source.clone(), batch_size, fast_retry());
            let found = discover_all(&discoverer, IdRange::new(9, 2096)).await;
            assert_eq!(found.len(), 697, "batch size {batch_size}");
            assert_eq!(
                found.iter().copied().collect::<BTreeSet<i64>>(),
                real,
                "batch size {batch_size}"
            );
        }
    }

    #[tokio::test]
    async fn test_discovery_of_empty_range() {
        let source = Arc::new(MemorySource::new());
        let discoverer = Discoverer::new(source, 10, fast_retry());
        let found = discover_all(&discoverer, IdRange::new(1, 100)).await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_discovery_of_boundary_singletons() {
        let source = Arc::new(MemorySource::new());
        source.seed_ids("src", [1, 100]);
        let discoverer = Discoverer::new(source, 7, fast_retry());
        let found = discover_all(&discoverer, IdRange::new(1, 100)).await;
        assert_eq!(found, vec![1, 100]);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_not_gapped() {
        let source = Arc::new(MemorySource::new());
        source.seed_ids("src", [5]);
        source.inject_fetch_failures(2);

        let discoverer = Discoverer::new(source, 10, fast_retry());
        match discoverer.probe("src", IdRange::new(1, 10)).await {
            Probe::Found { ids, .. } => assert_eq!(ids, vec![5]),
            Probe::Gap { .. } => panic!("transient failures should be retried"),
        }
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_gap() {
        let source = Arc::new(MemorySource::new());
        source.seed_ids("src", [5]);
        source.inject_fetch_failures(10);

        let discoverer = Discoverer::new(source, 10, fast_retry());
        match discoverer.probe("src", IdRange::new(1, 10)).await {
            Probe::Gap { window } => assert_eq!(window, IdRange::new(1, 10)),
            Probe::Found { .. } => panic!("should have exhausted retries"),
        }
    }
}
