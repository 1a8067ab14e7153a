//! View-event document schema
//!
//! One row per (user, use case) pair recording the last counted view.
//! A repeat view inside the cooldown window does not increment the
//! use case's view counter.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for view events
pub const VIEW_EVENT_COLLECTION: &str = "view_events";

/// View event stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ViewEventDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Viewing user
    pub user_id: String,

    /// Viewed use case
    pub use_case_id: String,

    /// When the last counted view happened
    pub viewed_at: DateTime,
}

impl ViewEventDoc {
    /// Create a new view event timestamped now
    pub fn new(user_id: String, use_case_id: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id,
            use_case_id,
            viewed_at: DateTime::now(),
        }
    }
}

impl IntoIndexes for ViewEventDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1, "use_case_id": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("user_use_case_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for ViewEventDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
