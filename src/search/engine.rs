//! Ranked search over the use-case collection
//!
//! One aggregation round trip produces the total count and the requested
//! page: $match applies the categorical filters, an optional $addFields
//! computes the token-overlap relevance score, $sort orders with an id
//! tie-break for stable pagination, and $facet splits count from page.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::schemas::UseCaseDoc;
use crate::db::{retry_read, MongoCollection};
use crate::search::query::{SearchQuery, SortMode};
use crate::search::text;
use crate::types::Result;

/// Search engine over the use-case collection
#[derive(Clone)]
pub struct SearchEngine {
    use_cases: MongoCollection<UseCaseDoc>,
}

/// One page of ranked results
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub items: Vec<UseCaseSummary>,
}

/// Use-case summary returned by search
#[derive(Debug, Serialize)]
pub struct UseCaseSummary {
    pub id: String,
    pub title: String,
    pub industry: String,
    pub region: String,
    pub cost_bracket: String,
    pub tags: Vec<String>,
    pub view_count: i64,
    pub bookmark_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Whether the requesting user has bookmarked this record;
    /// merged in after the aggregation
    pub bookmarked: bool,
}

impl UseCaseSummary {
    /// Extract a summary from an aggregation result document
    fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            id: doc.get_str("id").ok()?.to_string(),
            title: doc.get_str("title").ok()?.to_string(),
            industry: doc.get_str("industry").unwrap_or_default().to_string(),
            region: doc.get_str("region").unwrap_or_default().to_string(),
            cost_bracket: doc.get_str("cost_bracket").unwrap_or_default().to_string(),
            tags: doc
                .get_array("tags")
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
            view_count: numeric(doc, "view_count"),
            bookmark_count: numeric(doc, "bookmark_count"),
            published_at: doc.get_datetime("published_at").ok().map(|d| d.to_chrono()),
            score: doc.get_f64("score").ok(),
            bookmarked: false,
        })
    }
}

/// Read an integer field that may come back as i32, i64, or double
fn numeric(doc: &Document, key: &str) -> i64 {
    match doc.get(key) {
        Some(bson::Bson::Int32(v)) => *v as i64,
        Some(bson::Bson::Int64(v)) => *v,
        Some(bson::Bson::Double(v)) => *v as i64,
        _ => 0,
    }
}

impl SearchEngine {
    pub fn new(use_cases: MongoCollection<UseCaseDoc>) -> Self {
        Self { use_cases }
    }

    /// Run a validated search query and return the ranked page
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        query.validate()?;

        let pipeline = build_pipeline(query);
        // Aggregations are read-only, so a transient failure is safe to retry
        let mut results =
            retry_read(|| self.use_cases.aggregate(pipeline.clone())).await?;

        let facet = results.pop().unwrap_or_default();

        let total = facet
            .get_array("total")
            .ok()
            .and_then(|arr| arr.first())
            .and_then(|b| b.as_document())
            .map(|d| numeric(d, "count"))
            .unwrap_or(0);

        let items = facet
            .get_array("items")
            .map(|arr| {
                arr.iter()
                    .filter_map(|b| b.as_document())
                    .filter_map(UseCaseSummary::from_document)
                    .collect()
            })
            .unwrap_or_default();

        Ok(SearchResponse {
            total,
            page: query.page,
            page_size: query.page_size,
            items,
        })
    }

    /// Fetch one published use case (or the author's own draft) by id
    pub async fn get(&self, id: &str, requester_id: &str) -> Result<Option<UseCaseDoc>> {
        let filter = doc! {
            "id": id,
            "$or": [
                { "published": true },
                { "author_id": requester_id },
            ],
        };
        self.use_cases.find_one(filter).await
    }
}

/// Build the aggregation pipeline for a query
///
/// Text relevance only constrains the result set under `relevance` sort;
/// under recency/popularity the query terms neither filter nor reorder,
/// matching records are retained unscored.
pub(crate) fn build_pipeline(query: &SearchQuery) -> Vec<Document> {
    let mut match_stage = doc! {
        "published": true,
        "metadata.is_deleted": { "$ne": true },
    };

    if let Some(ref industry) = query.industry {
        match_stage.insert("industry", industry.as_str());
    }
    if let Some(ref region) = query.region {
        match_stage.insert("region", region.as_str());
    }
    if let Some(ref cost) = query.cost {
        match_stage.insert("cost_bracket", cost.as_str());
    }
    if !query.tags.is_empty() {
        match_stage.insert("tags", doc! { "$all": query.tags.clone() });
    }

    let tokens = query
        .search
        .as_deref()
        .map(text::query_tokens)
        .unwrap_or_default();

    let scored = query.sort == SortMode::Relevance && !tokens.is_empty();
    if scored {
        // Zero-match records are excluded in relevance mode
        match_stage.insert("search_tokens", doc! { "$in": tokens.clone() });
    }

    let mut pipeline = vec![doc! { "$match": match_stage }];

    if scored {
        // Distinct-term overlap ratio: matched / total query terms
        pipeline.push(doc! {
            "$addFields": {
                "score": {
                    "$divide": [
                        { "$size": { "$setIntersection": ["$search_tokens", tokens.clone()] } },
                        tokens.len() as i32,
                    ]
                }
            }
        });
    }

    // Id tie-break keeps pagination stable across repeated calls
    let sort = match (query.sort, scored) {
        (SortMode::Relevance, true) => doc! { "score": -1, "published_at": -1, "id": 1 },
        // Relevance without a query degrades to recency ordering
        (SortMode::Relevance, false) | (SortMode::Recency, _) => {
            doc! { "published_at": -1, "id": 1 }
        }
        (SortMode::Popularity, _) => doc! { "popularity": -1, "id": 1 },
    };
    pipeline.push(doc! { "$sort": sort });

    pipeline.push(doc! {
        "$facet": {
            "total": [ { "$count": "count" } ],
            "items": [
                { "$skip": query.skip() },
                { "$limit": query.page_size },
                { "$project": {
                    "id": 1,
                    "title": 1,
                    "industry": 1,
                    "region": 1,
                    "cost_bracket": 1,
                    "tags": 1,
                    "view_count": 1,
                    "bookmark_count": 1,
                    "published_at": 1,
                    "score": 1,
                } },
            ],
        }
    });

    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::query::SearchQuery;

    fn query_with(sort: SortMode, search: Option<&str>) -> SearchQuery {
        SearchQuery {
            search: search.map(|s| s.to_string()),
            sort,
            ..Default::default()
        }
    }

    #[test]
    fn test_filters_are_anded_in_match() {
        let mut q = query_with(SortMode::Recency, None);
        q.industry = Some("manufacturing".into());
        q.region = Some("north".into());
        q.tags = vec!["automation".into()];

        let pipeline = build_pipeline(&q);
        let m = pipeline[0].get_document("$match").unwrap();

        assert_eq!(m.get_str("industry").unwrap(), "manufacturing");
        assert_eq!(m.get_str("region").unwrap(), "north");
        assert!(m.get_document("tags").unwrap().contains_key("$all"));
        assert_eq!(m.get_bool("published").unwrap(), true);
    }

    #[test]
    fn test_relevance_mode_excludes_zero_match() {
        let q = query_with(SortMode::Relevance, Some("soudure robot"));
        let pipeline = build_pipeline(&q);

        let m = pipeline[0].get_document("$match").unwrap();
        assert!(m.get_document("search_tokens").unwrap().contains_key("$in"));
        // Score stage present, sorted by score first
        assert!(pipeline[1].contains_key("$addFields"));
        let sort = pipeline[2].get_document("$sort").unwrap();
        assert_eq!(sort.keys().next().unwrap(), "score");
    }

    #[test]
    fn test_recency_mode_keeps_unmatched_records() {
        let q = query_with(SortMode::Recency, Some("soudure"));
        let pipeline = build_pipeline(&q);

        // No token filter and no score stage under recency
        let m = pipeline[0].get_document("$match").unwrap();
        assert!(!m.contains_key("search_tokens"));
        assert!(pipeline[1].contains_key("$sort"));
    }

    #[test]
    fn test_popularity_sort_breaks_ties_by_id() {
        let q = query_with(SortMode::Popularity, None);
        let pipeline = build_pipeline(&q);

        let sort = pipeline[1].get_document("$sort").unwrap();
        let keys: Vec<_> = sort.keys().collect();
        assert_eq!(keys, vec!["popularity", "id"]);
    }

    #[test]
    fn test_relevance_without_query_degrades_to_recency() {
        let q = query_with(SortMode::Relevance, None);
        let pipeline = build_pipeline(&q);

        let sort = pipeline[1].get_document("$sort").unwrap();
        assert_eq!(sort.keys().next().unwrap(), "published_at");
    }

    #[test]
    fn test_pagination_skip_and_limit() {
        let mut q = query_with(SortMode::Recency, None);
        q.page = 3;
        q.page_size = 25;
        let pipeline = build_pipeline(&q);

        let facet = pipeline.last().unwrap().get_document("$facet").unwrap();
        let items = facet.get_array("items").unwrap();
        let skip = items[0].as_document().unwrap();
        let limit = items[1].as_document().unwrap();
        assert_eq!(skip.get_i64("$skip").unwrap(), 50);
        assert_eq!(limit.get_i64("$limit").unwrap(), 25);
    }
}
