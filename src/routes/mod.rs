//! HTTP routes for Caseline

pub mod conversations;
pub mod health;
pub mod notifications;
pub mod use_cases;

pub use health::{health_check, readiness_check, version_info};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::types::{CaselineError, Result};

/// Largest accepted request body (1 MiB)
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build a JSON response
pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => {
            error!("response serialization failed: {}", e);
            return error_response(CaselineError::Internal(
                "response serialization failed".to_string(),
            ));
        }
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_default()
}

/// Convert an error into its JSON response
pub(crate) fn error_response(err: CaselineError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    let body = serde_json::json!({ "error": message }).to_string();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_default()
}

/// Collect and deserialize a JSON request body
pub(crate) async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| CaselineError::Validation(format!("failed to read body: {}", e)))?
        .to_bytes();

    if body.len() > MAX_BODY_BYTES {
        return Err(CaselineError::Validation("request body too large".to_string()));
    }

    serde_json::from_slice(&body)
        .map_err(|e| CaselineError::Validation(format!("invalid JSON body: {}", e)))
}

/// Extract the path segment after `prefix` and before the next `/`
///
/// `segment_after("/api/use-cases/abc/bookmark", "/api/use-cases/")` is
/// `Some("abc")`.
pub(crate) fn segment_after<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    let id = rest.split('/').next()?;
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Value of a query parameter, URL-decoded
pub(crate) fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    let query = query?;
    for param in query.split('&') {
        if let Some((k, v)) = param.split_once('=') {
            if k == key && !v.is_empty() {
                return urlencoding::decode(v).ok().map(|v| v.into_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_after() {
        assert_eq!(
            segment_after("/api/use-cases/abc/bookmark", "/api/use-cases/"),
            Some("abc")
        );
        assert_eq!(segment_after("/api/use-cases/abc", "/api/use-cases/"), Some("abc"));
        assert_eq!(segment_after("/api/use-cases/", "/api/use-cases/"), None);
        assert_eq!(segment_after("/other", "/api/use-cases/"), None);
    }

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param(Some("limit=5&unread=true"), "unread"),
            Some("true".to_string())
        );
        assert_eq!(query_param(Some("limit=5"), "unread"), None);
        assert_eq!(query_param(None, "unread"), None);
        assert_eq!(
            query_param(Some("before=a%20b"), "before"),
            Some("a b".to_string())
        );
    }
}
