//! Content item entity.

use serde::{Deserialize, Serialize};

/// Coarse content classification, used by transform pipelines and send paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Plain text item.
    Text,
    /// Media item (may be part of a multi-part group).
    Media,
    /// Anything else.
    Other,
}

impl Default for ContentKind {
    fn default() -> Self {
        Self::Other
    }
}

/// One item of content in a source collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// External id in the source's integer id space.
    pub id: i64,
    /// Item payload, opaque to the engine.
    pub payload: serde_json::Value,
    /// Group id for multi-part units that must be assembled together
    /// before any member is emitted.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Content classification.
    #[serde(default)]
    pub kind: ContentKind,
}

impl ContentItem {
    /// Create a standalone text item.
    pub fn text(id: i64, payload: serde_json::Value) -> Self {
        Self {
            id,
            payload,
            group_id: None,
            kind: ContentKind::Text,
        }
    }

    /// Create a grouped media item.
    pub fn grouped(id: i64, payload: serde_json::Value, group_id: impl Into<String>) -> Self {
        Self {
            id,
            payload,
            group_id: Some(group_id.into()),
            kind: ContentKind::Media,
        }
    }
}
