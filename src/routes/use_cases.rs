//! Use-case search, detail, and engagement routes

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::db::schemas::{GeoPoint, UseCaseDoc};
use crate::server::AppState;
use crate::search::SearchQuery;
use crate::types::{CaselineError, Result};

use super::{error_response, json_response, read_json, segment_after};

/// Submission body for a new use case
#[derive(Deserialize)]
struct SubmitRequest {
    title: String,
    problem_statement: String,
    solution_description: String,
    industry: String,
    region: String,
    cost_bracket: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    location: Option<GeoPoint>,
    #[serde(default)]
    extra_attributes: JsonValue,
    #[serde(default)]
    attachments: Vec<String>,
}

impl SubmitRequest {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("title", &self.title),
            ("problem_statement", &self.problem_statement),
            ("solution_description", &self.solution_description),
            ("industry", &self.industry),
            ("region", &self.region),
            ("cost_bracket", &self.cost_bracket),
        ] {
            if value.trim().is_empty() {
                return Err(CaselineError::Validation(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Whether a path is `/api/use-cases/{id}` with no trailing action
pub fn is_detail_path(path: &str) -> bool {
    match path.strip_prefix("/api/use-cases/") {
        Some(rest) => !rest.is_empty() && !rest.contains('/'),
        None => false,
    }
}

/// Full use-case body for the detail endpoint
#[derive(Serialize)]
struct UseCaseDetail {
    id: String,
    author_id: String,
    title: String,
    problem_statement: String,
    solution_description: String,
    industry: String,
    region: String,
    cost_bracket: String,
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<GeoPoint>,
    extra_attributes: JsonValue,
    attachments: Vec<String>,
    view_count: i64,
    bookmark_count: i64,
    published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    published_at: Option<DateTime<Utc>>,
    bookmarked: bool,
}

impl UseCaseDetail {
    fn from_doc(doc: UseCaseDoc, bookmarked: bool) -> Self {
        Self {
            id: doc.id,
            author_id: doc.author_id,
            title: doc.title,
            problem_statement: doc.problem_statement,
            solution_description: doc.solution_description,
            industry: doc.industry,
            region: doc.region,
            cost_bracket: doc.cost_bracket,
            tags: doc.tags,
            location: doc.location,
            extra_attributes: doc.extra_attributes,
            attachments: doc.attachments,
            view_count: doc.view_count,
            bookmark_count: doc.bookmark_count,
            published: doc.published,
            published_at: doc.published_at.map(|d| d.to_chrono()),
            bookmarked,
        }
    }
}

/// GET /api/use-cases
pub async fn search(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match search_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn search_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let query = SearchQuery::parse(req.uri().query())?;

    let mut results = state.search.search(&query).await?;

    // Merge the caller's bookmark state into the page
    let ids: Vec<String> = results.items.iter().map(|i| i.id.clone()).collect();
    let bookmarked = state
        .engagement
        .bookmarked_subset(&user.user_id, &ids)
        .await?;
    for item in &mut results.items {
        item.bookmarked = bookmarked.contains(&item.id);
    }

    Ok(json_response(StatusCode::OK, &results))
}

/// POST /api/use-cases
pub async fn submit(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match submit_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn submit_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let body: SubmitRequest = read_json(req).await?;
    body.validate()?;

    // Submissions land unpublished and stay invisible to other members
    // until review flips the published flag.
    let doc = UseCaseDoc::new(
        user.user_id.clone(),
        body.title,
        body.problem_statement,
        body.solution_description,
        body.industry,
        body.region,
        body.cost_bracket,
        body.tags,
        body.location,
        body.extra_attributes,
        body.attachments,
    );
    state.use_cases.insert_one(doc.clone()).await?;

    Ok(json_response(
        StatusCode::CREATED,
        &UseCaseDetail::from_doc(doc, false),
    ))
}

/// GET /api/use-cases/{id}
pub async fn detail(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match detail_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn detail_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let id = segment_after(req.uri().path(), "/api/use-cases/")
        .ok_or_else(|| CaselineError::Validation("missing use case id".to_string()))?
        .to_string();

    let doc = state
        .search
        .get(&id, &user.user_id)
        .await?
        .ok_or_else(|| CaselineError::NotFound(format!("use case {} not found", id)))?;

    // Opening the detail page is the view signal; drafts are not counted
    if doc.published {
        state.engagement.record_view(&user.user_id, &id).await?;
    }

    let bookmarked = state
        .engagement
        .bookmarked_subset(&user.user_id, std::slice::from_ref(&id))
        .await?
        .contains(&id);

    Ok(json_response(
        StatusCode::OK,
        &UseCaseDetail::from_doc(doc, bookmarked),
    ))
}

/// POST /api/use-cases/{id}/bookmark
pub async fn bookmark(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match toggle_bookmark(state, req, true).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

/// DELETE /api/use-cases/{id}/bookmark
pub async fn unbookmark(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match toggle_bookmark(state, req, false).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn toggle_bookmark(
    state: &Arc<AppState>,
    req: Request<Incoming>,
    add: bool,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let id = segment_after(req.uri().path(), "/api/use-cases/")
        .ok_or_else(|| CaselineError::Validation("missing use case id".to_string()))?;

    let outcome = if add {
        state.engagement.bookmark(&user.user_id, id).await?
    } else {
        state.engagement.unbookmark(&user.user_id, id).await?
    };

    Ok(json_response(
        StatusCode::OK,
        &bookmark_response(add, outcome.bookmark_count),
    ))
}

/// Clients read the updated counter straight from the toggle response
fn bookmark_response(bookmarked: bool, bookmark_count: i64) -> serde_json::Value {
    serde_json::json!({ "bookmarked": bookmarked, "bookmark_count": bookmark_count })
}

/// GET /api/bookmarks
pub async fn list_bookmarks(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    match list_bookmarks_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn list_bookmarks_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let cases = state.engagement.bookmarks_for(&user.user_id).await?;

    let items: Vec<UseCaseDetail> = cases
        .into_iter()
        .map(|doc| UseCaseDetail::from_doc(doc, true))
        .collect();

    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "total": items.len(), "items": items }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_detail_path() {
        assert!(is_detail_path("/api/use-cases/abc-123"));
        assert!(!is_detail_path("/api/use-cases/"));
        assert!(!is_detail_path("/api/use-cases/abc/bookmark"));
        assert!(!is_detail_path("/api/bookmarks"));
    }

    #[test]
    fn test_bookmark_response_carries_count() {
        let body = bookmark_response(true, 12);
        assert_eq!(body["bookmarked"], true);
        assert_eq!(body["bookmark_count"], 12);

        let body = bookmark_response(false, 0);
        assert_eq!(body["bookmarked"], false);
        assert_eq!(body["bookmark_count"], 0);
    }
}
