//! Use-case document schema
//!
//! A use case is a submitted case study describing an industrial problem
//! and its solution. Records are never hard-deleted; review state is the
//! `published` flag. Engagement counters and the derived popularity score
//! are maintained incrementally with `$inc`, never recomputed on read.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::search::text;

/// Collection name for use cases
pub const USE_CASE_COLLECTION: &str = "use_cases";

/// Bookmarks signal durable interest; views are transient clicks.
/// popularity = bookmark_count * BOOKMARK_WEIGHT + view_count * VIEW_WEIGHT
pub const BOOKMARK_WEIGHT: i64 = 4;
pub const VIEW_WEIGHT: i64 = 1;

/// Geographic coordinate of the submitting site
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Use-case document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UseCaseDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Stable use-case identifier (UUID)
    pub id: String,

    /// Submitting user
    pub author_id: String,

    /// Title
    pub title: String,

    /// Free-text problem statement
    pub problem_statement: String,

    /// Free-text solution description
    pub solution_description: String,

    /// Industry sector (categorical)
    pub industry: String,

    /// Region (categorical)
    pub region: String,

    /// Cost bracket (categorical)
    pub cost_bracket: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Site coordinate, if the author supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,

    /// Flexible metrics reported by the author (e.g. impact_metrics);
    /// kept as an escape hatch rather than a typed field per metric
    #[serde(default)]
    pub extra_attributes: JsonValue,

    /// Object-store URLs for attachments (references only, never bytes)
    #[serde(default)]
    pub attachments: Vec<String>,

    /// Engagement counters, adjusted atomically at the storage layer
    #[serde(default)]
    pub view_count: i64,
    #[serde(default)]
    pub bookmark_count: i64,

    /// Cached ranking score, updated alongside the counters
    #[serde(default)]
    pub popularity: i64,

    /// Visible to other members once admin review publishes it
    #[serde(default)]
    pub published: bool,

    /// When the record was published
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime>,

    /// Normalized tokens from title + problem + solution, built at write time
    #[serde(default)]
    pub search_tokens: Vec<String>,
}

impl UseCaseDoc {
    /// Create a new unpublished use case from a submission
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        author_id: String,
        title: String,
        problem_statement: String,
        solution_description: String,
        industry: String,
        region: String,
        cost_bracket: String,
        tags: Vec<String>,
        location: Option<GeoPoint>,
        extra_attributes: JsonValue,
        attachments: Vec<String>,
    ) -> Self {
        let search_tokens =
            Self::build_search_tokens(&title, &problem_statement, &solution_description, &tags);

        Self {
            _id: None,
            metadata: Metadata::new(),
            id: Uuid::new_v4().to_string(),
            author_id,
            title,
            problem_statement,
            solution_description,
            industry,
            region,
            cost_bracket,
            tags,
            location,
            extra_attributes,
            attachments,
            view_count: 0,
            bookmark_count: 0,
            popularity: 0,
            published: false,
            published_at: None,
            search_tokens,
        }
    }

    /// Build the normalized token set for text matching
    pub fn build_search_tokens(
        title: &str,
        problem: &str,
        solution: &str,
        tags: &[String],
    ) -> Vec<String> {
        let mut tokens = Vec::new();
        tokens.extend(text::tokenize(title));
        tokens.extend(text::tokenize(problem));
        tokens.extend(text::tokenize(solution));
        for tag in tags {
            tokens.extend(text::tokenize(tag));
        }
        tokens.sort();
        tokens.dedup();
        tokens
    }

    /// Compute the popularity score for the given counters
    pub fn popularity_for(bookmark_count: i64, view_count: i64) -> i64 {
        bookmark_count * BOOKMARK_WEIGHT + view_count * VIEW_WEIGHT
    }
}

impl IntoIndexes for UseCaseDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on the stable id
            (
                doc! { "id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("id_unique".to_string())
                        .build(),
                ),
            ),
            // Categorical filter dimensions
            (doc! { "industry": 1 }, None),
            (doc! { "region": 1 }, None),
            (doc! { "cost_bracket": 1 }, None),
            (doc! { "tags": 1 }, None),
            // Token match for text relevance
            (doc! { "search_tokens": 1 }, None),
            // Compound indexes backing the sort modes
            (doc! { "published": 1, "popularity": -1, "id": 1 }, None),
            (doc! { "published": 1, "published_at": -1, "id": 1 }, None),
            // Author listing
            (doc! { "author_id": 1 }, None),
        ]
    }
}

impl MutMetadata for UseCaseDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_use_case_is_unpublished() {
        let uc = UseCaseDoc::new(
            "user-1".into(),
            "Predictive maintenance for CNC mills".into(),
            "Unplanned spindle failures halt production".into(),
            "Vibration sensors feed a threshold alarm".into(),
            "manufacturing".into(),
            "south".into(),
            "medium".into(),
            vec!["maintenance".into()],
            None,
            serde_json::json!({"downtime_reduction_pct": 30}),
            vec![],
        );

        assert!(!uc.published);
        assert_eq!(uc.bookmark_count, 0);
        assert_eq!(uc.popularity, 0);
        assert!(uc.search_tokens.contains(&"maintenance".to_string()));
        assert!(uc.search_tokens.contains(&"spindle".to_string()));
    }

    #[test]
    fn test_popularity_weights_bookmarks_over_views() {
        // One bookmark outweighs three views
        assert!(UseCaseDoc::popularity_for(1, 0) > UseCaseDoc::popularity_for(0, 3));
        // Monotone in both counters
        assert!(UseCaseDoc::popularity_for(2, 5) > UseCaseDoc::popularity_for(1, 5));
        assert!(UseCaseDoc::popularity_for(2, 6) > UseCaseDoc::popularity_for(2, 5));
    }

    #[test]
    fn test_search_tokens_deduped() {
        let tokens = UseCaseDoc::build_search_tokens(
            "Robot welding",
            "Welding defects in robot cells",
            "Camera inspection of welding seams",
            &[],
        );
        let welding = tokens.iter().filter(|t| *t == "welding").count();
        assert_eq!(welding, 1);
    }
}
