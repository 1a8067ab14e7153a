//! Notification feed routes

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;

use crate::db::schemas::NotificationKind;
use crate::relay::NotificationPayload;
use crate::server::AppState;
use crate::types::{CaselineError, Result};

use super::{error_response, json_response, query_param, segment_after};

/// GET /api/notifications
pub async fn list(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match list_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn list_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;

    let unread_only = first_param(req.uri().query(), &["unread_only", "unread"])
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    let kind = match first_param(req.uri().query(), &["category", "kind"]) {
        Some(raw) => Some(
            raw.parse::<NotificationKind>()
                .map_err(|_| CaselineError::Validation(format!("invalid category: {}", raw)))?,
        ),
        None => None,
    };
    let limit = match query_param(req.uri().query(), "limit") {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| CaselineError::Validation(format!("invalid limit: {}", raw)))?,
        ),
        None => None,
    };

    let notifications = state
        .notifier
        .list(&user.user_id, unread_only, kind, limit)
        .await?;
    let unread = state.notifier.unread_count(&user.user_id).await?;

    let items: Vec<serde_json::Value> = notifications
        .iter()
        .map(|n| {
            let mut value = serde_json::to_value(NotificationPayload::from(n))
                .unwrap_or(serde_json::Value::Null);
            if let Some(obj) = value.as_object_mut() {
                obj.insert("read".to_string(), serde_json::Value::Bool(n.read));
            }
            value
        })
        .collect();

    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "total": items.len(), "unread": unread, "items": items }),
    ))
}

/// First value among the accepted spellings of a query parameter
fn first_param(query: Option<&str>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| query_param(query, name))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    match unread_count_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn unread_count_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let count = state.notifier.unread_count(&user.user_id).await?;
    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "unread": count }),
    ))
}

/// POST /api/notifications/{id}/read
pub async fn mark_read(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match mark_read_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn mark_read_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let id = segment_after(req.uri().path(), "/api/notifications/")
        .ok_or_else(|| CaselineError::Validation("missing notification id".to_string()))?;

    let found = state.notifier.mark_read(&user.user_id, id).await?;
    if !found {
        return Err(CaselineError::NotFound(format!(
            "notification {} not found",
            id
        )));
    }

    Ok(json_response(StatusCode::OK, &serde_json::json!({ "read": true })))
}

/// POST /api/notifications/read-all
pub async fn mark_all_read(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    match mark_all_read_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn mark_all_read_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let updated = state.notifier.mark_all_read(&user.user_id).await?;
    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "updated": updated }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_param_accepts_either_spelling() {
        let names = &["unread_only", "unread"];
        assert_eq!(
            first_param(Some("unread_only=true"), names),
            Some("true".to_string())
        );
        assert_eq!(first_param(Some("unread=1"), names), Some("1".to_string()));
        assert_eq!(first_param(Some("limit=5"), names), None);

        // The primary spelling wins when both are present
        assert_eq!(
            first_param(Some("kind=reply&category=approval"), &["category", "kind"]),
            Some("approval".to_string())
        );
    }
}
