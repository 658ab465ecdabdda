//! Transform/filter pipeline trait.

use async_trait::async_trait;

use chanport_entity::ContentItem;

use crate::result::AppResult;

/// Outcome of running one item through the pipeline.
#[derive(Debug, Clone)]
pub enum TransformOutcome {
    /// Emit the (possibly rewritten) item.
    Keep(ContentItem),
    /// Drop the item; the reason is logged and the item still counts as
    /// processed.
    Drop(String),
}

/// Trait for the transform/filter pipeline collaborator.
///
/// `filter` is the job's configuration snapshot taken at submission, so a
/// reconfiguration mid-run never changes the behavior of an in-flight job.
#[async_trait]
pub trait TransformPipeline: Send + Sync + std::fmt::Debug + 'static {
    /// Transform one item or signal a drop.
    async fn apply(
        &self,
        item: ContentItem,
        filter: &serde_json::Value,
    ) -> AppResult<TransformOutcome>;
}

/// Pipeline that keeps every item untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughPipeline;

#[async_trait]
impl TransformPipeline for PassthroughPipeline {
    async fn apply(
        &self,
        item: ContentItem,
        _filter: &serde_json::Value,
    ) -> AppResult<TransformOutcome> {
        Ok(TransformOutcome::Keep(item))
    }
}
