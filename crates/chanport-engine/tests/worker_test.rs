//! Migration worker integration tests: discovery-corrected totals, resume,
//! idempotence, monotonic checkpoints, group assembly, and failure limits.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use chanport_core::AppError;
use chanport_core::config::migration::GroupPolicy;
use chanport_core::result::AppResult;
use chanport_core::traits::{TransformOutcome, TransformPipeline};
use chanport_engine::{WorkerCommand, WorkerEvent};
use chanport_entity::{ContentItem, IdRange, JobPriority, JobStatus};

use common::*;

#[tokio::test]
async fn test_sparse_range_migrates_exact_count() {
    let h = harness();
    h.source.seed_ids("src", (9..=208).chain(1600..=2096));

    let base = job(IdRange::new(9, 2096), JobPriority::Normal);
    let job_id = base.id;
    let (worker, _commands, events) = h.worker(base, fast_migration_config());
    worker.run().await;

    let snapshots = drain_snapshots(events).await;
    let last = snapshots.last().expect("worker emitted snapshots");
    assert_eq!(last.status, JobStatus::Completed);
    // 697 real ids in a 2088-wide range: the corrected total, not the span.
    assert_eq!(last.total_count, 697);
    assert_eq!(last.processed_count, 697);
    assert_eq!(last.failed_count, 0);
    assert_eq!(last.gap_count, 0);
    assert!((last.percent_complete() - 100.0).abs() < 1e-9);

    let sent: Vec<i64> = h.source.sent_to("dst").iter().map(|i| i.id).collect();
    assert_eq!(sent.len(), 697);
    assert!(
        sent.windows(2).all(|w| w[0] < w[1]),
        "items must be emitted in strictly increasing id order"
    );

    let checkpoint = h
        .checkpoints
        .load(job_id)
        .await
        .expect("load")
        .expect("checkpoint present");
    assert_eq!(checkpoint.last_processed_id, 2096);
    assert_eq!(checkpoint.processed_count, 697);
    assert_eq!(checkpoint.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_rerun_of_completed_job_is_idempotent() {
    let h = harness();
    h.source.seed_ids("src", 1..=50);

    let base = job(IdRange::new(1, 60), JobPriority::Normal);
    let job_id = base.id;
    let (worker, _commands, events) = h.worker(base.clone(), fast_migration_config());
    worker.run().await;
    drop(drain_snapshots(events).await);

    let before = h.checkpoints.load(job_id).await.expect("load").expect("present");
    assert_eq!(before.processed_count, 50);

    let (rerun, _commands, events) = h.worker(base, fast_migration_config());
    rerun.run().await;
    let snapshots = drain_snapshots(events).await;
    assert_eq!(snapshots.last().expect("snapshots").status, JobStatus::Completed);

    let after = h.checkpoints.load(job_id).await.expect("load").expect("present");
    assert_eq!(after.processed_count, before.processed_count);
    assert_eq!(after.last_processed_id, before.last_processed_id);
    assert_eq!(after.total_discovered, before.total_discovered);
    // Nothing was emitted twice.
    assert_eq!(h.source.sent_to("dst").len(), 50);
}

#[tokio::test]
async fn test_resume_after_interruption_reaches_same_totals() {
    let h = harness();
    h.source.seed_ids("src", 1..=100);

    let mut config = fast_migration_config();
    config.discovery_batch_size = 5;
    config.emit_delay_ms = 2;
    let base = job(IdRange::new(1, 100), JobPriority::Normal);
    let job_id = base.id;

    let (worker, commands, mut events) = h.worker(base.clone(), config.clone());
    let handle = tokio::spawn(worker.run());

    // Cancel once some progress is visible; the worker stops at the next
    // sub-batch boundary.
    while let Some(WorkerEvent::Snapshot(snapshot)) = events.recv().await {
        if snapshot.processed_count >= 20 {
            break;
        }
    }
    commands.send(WorkerCommand::Cancel).expect("worker alive");
    while let Some(WorkerEvent::Snapshot(snapshot)) = events.recv().await {
        if snapshot.status == JobStatus::Cancelled {
            break;
        }
    }
    handle.await.expect("worker task");

    let interrupted = h.checkpoints.load(job_id).await.expect("load").expect("present");
    assert!(interrupted.last_processed_id < 100);
    assert_eq!(
        h.source.sent_to("dst").len() as u64,
        interrupted.processed_count,
        "checkpoint must agree with what was actually emitted"
    );

    // Restart with the same job id; the worker resumes past the checkpoint.
    let (resumed, _commands, events) = h.worker(base, config);
    resumed.run().await;
    let snapshots = drain_snapshots(events).await;
    let last = snapshots.last().expect("snapshots");
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.processed_count, 100);
    assert_eq!(last.total_count, 100);

    let sent: Vec<i64> = h.source.sent_to("dst").iter().map(|i| i.id).collect();
    assert_eq!(sent.len(), 100);
    let unique: BTreeSet<i64> = sent.iter().copied().collect();
    assert_eq!(unique.len(), 100, "no id may be emitted twice");
}

#[tokio::test]
async fn test_last_processed_id_monotonic_across_pause_resume() {
    let h = harness();
    h.source.seed_ids("src", 1..=60);

    let mut config = fast_migration_config();
    config.discovery_batch_size = 5;
    config.emit_delay_ms = 1;
    let base = job(IdRange::new(1, 60), JobPriority::Normal);
    let job_id = base.id;

    let (worker, commands, mut events) = h.worker(base, config);
    let handle = tokio::spawn(worker.run());

    let mut high_water = i64::MIN;
    let mut pause_cycles: u64 = 0;
    while let Some(WorkerEvent::Snapshot(snapshot)) = events.recv().await {
        if let Some(checkpoint) = h.checkpoints.load(job_id).await.expect("load") {
            assert!(
                checkpoint.last_processed_id >= high_water,
                "last_processed_id went backwards"
            );
            high_water = checkpoint.last_processed_id;
        }
        match snapshot.status {
            JobStatus::Running
                if pause_cycles < 3 && snapshot.processed_count > (pause_cycles + 1) * 12 =>
            {
                commands.send(WorkerCommand::Pause).expect("worker alive");
            }
            JobStatus::Paused => {
                pause_cycles += 1;
                commands.send(WorkerCommand::Run).expect("worker alive");
            }
            JobStatus::Completed => break,
            _ => {}
        }
    }
    handle.await.expect("worker task");

    assert!(pause_cycles >= 1, "at least one pause/resume cycle ran");
    let checkpoint = h.checkpoints.load(job_id).await.expect("load").expect("present");
    assert_eq!(checkpoint.last_processed_id, 60);
    assert_eq!(checkpoint.processed_count, 60);
}

#[tokio::test]
async fn test_unreachable_windows_become_gaps_not_failures() {
    let h = harness();
    h.source.seed_ids("src", 1..=30);

    let mut config = fast_migration_config();
    config.discovery_batch_size = 10;
    // Each probe makes up to 4 calls (1 + 3 retries); sink the first two
    // probe windows entirely.
    h.source.inject_fetch_failures(8);

    let base = job(IdRange::new(1, 30), JobPriority::Normal);
    let job_id = base.id;
    let (worker, _commands, events) = h.worker(base, config);
    worker.run().await;

    let snapshots = drain_snapshots(events).await;
    let last = snapshots.last().expect("snapshots");
    assert_eq!(last.status, JobStatus::Completed, "gaps never fail the job");
    assert_eq!(last.gap_count, 2);
    assert_eq!(last.processed_count, 10);
    assert_eq!(last.total_count, 10);

    let checkpoint = h.checkpoints.load(job_id).await.expect("load").expect("present");
    assert_eq!(
        checkpoint.gaps,
        vec![IdRange::new(1, 10), IdRange::new(11, 20)]
    );
    let sent: Vec<i64> = h.source.sent_to("dst").iter().map(|i| i.id).collect();
    assert_eq!(sent, (21..=30).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_group_completed_across_window_boundary() {
    let h = harness();
    h.source
        .seed("src", (1..=4).map(|id| ContentItem::text(id, json!({ "id": id }))));
    h.source.seed(
        "src",
        (5..=8).map(|id| ContentItem::grouped(id, json!({ "id": id }), "album-1")),
    );

    let mut config = fast_migration_config();
    config.discovery_batch_size = 5;

    let base = job(IdRange::new(1, 8), JobPriority::Normal);
    let (worker, _commands, events) = h.worker(base, config);
    worker.run().await;

    let snapshots = drain_snapshots(events).await;
    let last = snapshots.last().expect("snapshots");
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.total_count, 8);
    assert_eq!(last.processed_count, 8);

    // The window ends at id 5 but the group runs through id 8; look-ahead
    // must deliver the whole group in order.
    let sent: Vec<i64> = h.source.sent_to("dst").iter().map(|i| i.id).collect();
    assert_eq!(sent, (1..=8).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_group_spanning_transfer_chunks_is_emitted_once() {
    let h = harness();
    h.source
        .seed("src", (1..=4).map(|id| ContentItem::text(id, json!({ "id": id }))));
    h.source.seed(
        "src",
        (5..=8).map(|id| ContentItem::grouped(id, json!({ "id": id }), "album-2")),
    );
    h.source
        .seed("src", (9..=10).map(|id| ContentItem::text(id, json!({ "id": id }))));

    let mut config = fast_migration_config();
    // A dense 10-id window split into transfer chunks of 6; the group
    // straddles the chunk boundary, so look-ahead from the first chunk
    // reaches ids the second chunk also holds.
    config.discovery_batch_size = 10;
    config.transfer_batch_size = 6;

    let base = job(IdRange::new(1, 10), JobPriority::Normal);
    let (worker, _commands, events) = h.worker(base, config);
    worker.run().await;

    let snapshots = drain_snapshots(events).await;
    let last = snapshots.last().expect("snapshots");
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.total_count, 10);
    assert_eq!(last.processed_count, 10);

    let sent: Vec<i64> = h.source.sent_to("dst").iter().map(|i| i.id).collect();
    assert_eq!(sent, (1..=10).collect::<Vec<i64>>(), "no id may be emitted twice");
}

#[tokio::test]
async fn test_group_timeout_emits_partial_by_default() {
    let h = harness();
    h.source.seed("src", [ContentItem::text(1, json!({}))]);
    h.source.seed(
        "src",
        (2..=6).map(|id| ContentItem::grouped(id, json!({ "id": id }), "g")),
    );

    let mut config = fast_migration_config();
    config.discovery_batch_size = 3;
    config.group_timeout_seconds = 1;
    assert_eq!(config.group_policy, GroupPolicy::EmitPartial);
    // Each look-ahead fetch takes 700 ms, so the 1 s budget covers one.
    h.source.set_fetch_delay_ms(700);

    let base = job(IdRange::new(1, 6), JobPriority::Normal);
    let (worker, _commands, events) = h.worker(base, config);
    worker.run().await;

    let snapshots = drain_snapshots(events).await;
    let last = snapshots.last().expect("snapshots");
    assert_eq!(last.status, JobStatus::Completed);
    // Every item still arrives; the group was just emitted in two pieces.
    assert_eq!(last.processed_count, 6);
    assert_eq!(last.gap_count, 0);
    let sent: Vec<i64> = h.source.sent_to("dst").iter().map(|i| i.id).collect();
    assert_eq!(sent, (1..=6).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_group_timeout_skip_policy_records_gap() {
    let h = harness();
    h.source.seed("src", [ContentItem::text(1, json!({}))]);
    h.source.seed(
        "src",
        (2..=6).map(|id| ContentItem::grouped(id, json!({ "id": id }), "g")),
    );

    let mut config = fast_migration_config();
    config.discovery_batch_size = 3;
    config.group_timeout_seconds = 1;
    config.group_policy = GroupPolicy::Skip;
    h.source.set_fetch_delay_ms(700);

    let base = job(IdRange::new(1, 6), JobPriority::Normal);
    let job_id = base.id;
    let (worker, _commands, events) = h.worker(base, config);
    worker.run().await;

    let snapshots = drain_snapshots(events).await;
    let last = snapshots.last().expect("snapshots");
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.gap_count, 1);

    // The incomplete group window was skipped; later members that fit a
    // full window still flow.
    let sent: Vec<i64> = h.source.sent_to("dst").iter().map(|i| i.id).collect();
    assert_eq!(sent, vec![1, 5, 6]);

    let checkpoint = h.checkpoints.load(job_id).await.expect("load").expect("present");
    assert_eq!(checkpoint.gaps.len(), 1);
    assert_eq!(checkpoint.gaps[0].start, 2);
}

#[derive(Debug)]
struct FailingPipeline;

#[async_trait]
impl TransformPipeline for FailingPipeline {
    async fn apply(
        &self,
        _item: ContentItem,
        _filter: &serde_json::Value,
    ) -> AppResult<TransformOutcome> {
        Err(AppError::transform("pipeline rejected payload"))
    }
}

#[tokio::test]
async fn test_consecutive_failures_fail_the_job_and_keep_checkpoint() {
    let h = harness();
    h.source.seed_ids("src", 1..=20);

    let config = fast_migration_config(); // consecutive_failure_limit: 3
    let base = job(IdRange::new(1, 20), JobPriority::Normal);
    let job_id = base.id;
    let (worker, _commands, events) =
        h.worker_with_pipeline(base, config, Arc::new(FailingPipeline));
    worker.run().await;

    let snapshots = drain_snapshots(events).await;
    let last = snapshots.last().expect("snapshots");
    assert_eq!(last.status, JobStatus::Failed);
    assert_eq!(last.failed_count, 3);
    assert!(
        last.error_message
            .as_deref()
            .expect("error message")
            .contains("consecutive"),
    );

    let checkpoint = h.checkpoints.load(job_id).await.expect("load").expect("present");
    assert_eq!(checkpoint.status, JobStatus::Failed);
    assert_eq!(checkpoint.failed_count, 3);
}

#[derive(Debug)]
struct EvenDropPipeline;

#[async_trait]
impl TransformPipeline for EvenDropPipeline {
    async fn apply(
        &self,
        item: ContentItem,
        _filter: &serde_json::Value,
    ) -> AppResult<TransformOutcome> {
        if item.id % 2 == 0 {
            Ok(TransformOutcome::Drop("even ids filtered".to_string()))
        } else {
            Ok(TransformOutcome::Keep(item))
        }
    }
}

#[tokio::test]
async fn test_filtered_items_count_as_processed() {
    let h = harness();
    h.source.seed_ids("src", 1..=10);

    let base = job(IdRange::new(1, 10), JobPriority::Normal);
    let (worker, _commands, events) =
        h.worker_with_pipeline(base, fast_migration_config(), Arc::new(EvenDropPipeline));
    worker.run().await;

    let snapshots = drain_snapshots(events).await;
    let last = snapshots.last().expect("snapshots");
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.processed_count, 10);
    assert_eq!(last.failed_count, 0);
    assert!((last.percent_complete() - 100.0).abs() < 1e-9);

    let sent: Vec<i64> = h.source.sent_to("dst").iter().map(|i| i.id).collect();
    assert_eq!(sent, vec![1, 3, 5, 7, 9]);
}
