//! Content platform trait.

use async_trait::async_trait;

use chanport_entity::ContentItem;

use crate::result::AppResult;

/// Trait for the content platform collaborator.
///
/// Implementations wrap a platform-specific client (and its own call-rate
/// limiting). The id space is sparse: `get_items_by_id` reports absence
/// positionally so callers can distinguish "probed and empty" from
/// "never probed".
#[async_trait]
pub trait ContentSource: Send + Sync + std::fmt::Debug + 'static {
    /// Fetch items by id from a source collection.
    ///
    /// The result is aligned with `ids`: `result[i]` is `None` when
    /// `ids[i]` holds no item. Transient transport failures are returned
    /// as [`crate::error::ErrorKind::TransientFetch`] errors.
    async fn get_items_by_id(
        &self,
        source: &str,
        ids: &[i64],
    ) -> AppResult<Vec<Option<ContentItem>>>;

    /// Send one item to a destination collection, returning the id it was
    /// assigned there.
    async fn send_item(&self, destination: &str, item: &ContentItem) -> AppResult<i64>;
}
