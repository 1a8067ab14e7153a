//! Bookmark document schema
//!
//! One row per (user, use case) pair; the unique compound index makes
//! bookmark creation naturally idempotent. Rows are hard-deleted on
//! unbookmark so a bookmark/unbookmark cycle leaves no residue.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for bookmarks
pub const BOOKMARK_COLLECTION: &str = "bookmarks";

/// Bookmark document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct BookmarkDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Bookmarking user
    pub user_id: String,

    /// Bookmarked use case
    pub use_case_id: String,
}

impl BookmarkDoc {
    /// Create a new bookmark
    pub fn new(user_id: String, use_case_id: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            use_case_id,
        }
    }
}

impl IntoIndexes for BookmarkDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique pair index: the idempotency guarantee
            (
                doc! { "user_id": 1, "use_case_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("user_use_case_unique".to_string())
                        .build(),
                ),
            ),
            // Per-use-case lookups for counter reconciliation
            (doc! { "use_case_id": 1 }, None),
        ]
    }
}

impl MutMetadata for BookmarkDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
