//! Conversation and message routes

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::schemas::{ConversationDoc, ConversationKind};
use crate::relay::MessagePayload;
use crate::server::AppState;
use crate::types::{CaselineError, Result};

use super::{error_response, json_response, query_param, read_json, segment_after};

#[derive(Deserialize)]
struct CreateConversationRequest {
    kind: ConversationKind,
    participants: Vec<String>,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    content: String,
    #[serde(default)]
    attachments: Vec<String>,
}

#[derive(Deserialize)]
struct EditMessageRequest {
    content: String,
}

/// Conversation as returned to the requesting user
#[derive(Serialize)]
struct ConversationView {
    id: String,
    kind: ConversationKind,
    participants: Vec<String>,
    created_by: String,
    archived: bool,
    last_activity: DateTime<Utc>,
}

impl ConversationView {
    fn for_user(doc: ConversationDoc, user_id: &str) -> Self {
        Self {
            archived: doc.archived_by.iter().any(|u| u == user_id),
            id: doc.id,
            kind: doc.kind,
            participants: doc.participants,
            created_by: doc.created_by,
            last_activity: doc.last_activity.to_chrono(),
        }
    }
}

/// POST /api/conversations
pub async fn create(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match create_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn create_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let body: CreateConversationRequest = read_json(req).await?;

    let conversation = state
        .messaging
        .create_conversation(&user.user_id, body.kind, body.participants)
        .await?;

    Ok(json_response(
        StatusCode::CREATED,
        &ConversationView::for_user(conversation, &user.user_id),
    ))
}

/// GET /api/conversations
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
    let include_archived = query_param(req.uri().query(), "include_archived")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let conversations = state
        .messaging
        .list_conversations(&user.user_id, include_archived)
        .await?;

    let items: Vec<ConversationView> = conversations
        .into_iter()
        .map(|c| ConversationView::for_user(c, &user.user_id))
        .collect();

    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "total": items.len(), "items": items }),
    ))
}

/// GET /api/conversations/{id}/messages
pub async fn list_messages(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    match list_messages_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn list_messages_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let conversation_id = conversation_id_from(req.uri().path())?;

    let before_seq = match query_param(req.uri().query(), "before") {
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
            CaselineError::Validation(format!("invalid before cursor: {}", raw))
        })?),
        None => None,
    };
    let limit = match query_param(req.uri().query(), "limit") {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| CaselineError::Validation(format!("invalid limit: {}", raw)))?,
        ),
        None => None,
    };

    let messages = state
        .messaging
        .list_messages(&user.user_id, &conversation_id, before_seq, limit)
        .await?;

    let items: Vec<MessagePayload> = messages.iter().map(MessagePayload::from).collect();
    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "total": items.len(), "items": items }),
    ))
}

/// POST /api/conversations/{id}/messages
pub async fn send_message(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    match send_message_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn send_message_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let conversation_id = conversation_id_from(req.uri().path())?;
    let body: SendMessageRequest = read_json(req).await?;

    let message = state
        .messaging
        .send_message(&user.user_id, &conversation_id, body.content, body.attachments)
        .await?;

    Ok(json_response(
        StatusCode::CREATED,
        &MessagePayload::from(&message),
    ))
}

/// POST /api/conversations/{id}/read
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
    let conversation_id = conversation_id_from(req.uri().path())?;

    let updated = state
        .messaging
        .mark_read(&user.user_id, &conversation_id)
        .await?;

    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "updated": updated }),
    ))
}

/// POST /api/conversations/{id}/archive
pub async fn archive(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match set_archived(state, req, true).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

/// POST /api/conversations/{id}/unarchive
pub async fn unarchive(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match set_archived(state, req, false).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn set_archived(
    state: &Arc<AppState>,
    req: Request<Incoming>,
    archived: bool,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let conversation_id = conversation_id_from(req.uri().path())?;

    if archived {
        state.messaging.archive(&user.user_id, &conversation_id).await?;
    } else {
        state.messaging.unarchive(&user.user_id, &conversation_id).await?;
    }

    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "archived": archived }),
    ))
}

/// PATCH /api/messages/{id}
pub async fn edit_message(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    match edit_message_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn edit_message_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let message_id = segment_after(req.uri().path(), "/api/messages/")
        .ok_or_else(|| CaselineError::Validation("missing message id".to_string()))?
        .to_string();
    let body: EditMessageRequest = read_json(req).await?;

    let message = state
        .messaging
        .edit_message(&user.user_id, &message_id, body.content)
        .await?;

    Ok(json_response(StatusCode::OK, &MessagePayload::from(&message)))
}

/// DELETE /api/messages/{id}
pub async fn delete_message(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    match delete_message_inner(state, req).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

async fn delete_message_inner(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let user = state.auth.authenticate(&req)?;
    let message_id = segment_after(req.uri().path(), "/api/messages/")
        .ok_or_else(|| CaselineError::Validation("missing message id".to_string()))?;

    state.messaging.delete_message(&user.user_id, message_id).await?;
    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "deleted": true }),
    ))
}

fn conversation_id_from(path: &str) -> Result<String> {
    segment_after(path, "/api/conversations/")
        .map(|id| id.to_string())
        .ok_or_else(|| CaselineError::Validation("missing conversation id".to_string()))
}
