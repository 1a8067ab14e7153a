//! WebSocket upgrade and per-connection frame loop
//!
//! One socket per signed-in client. The token rides the query string
//! because browsers cannot set headers on an upgrade request. Frame
//! handling errors are reported back on the socket as error frames; only
//! transport errors close the connection.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::relay::{ClientFrame, FrameSink, ServerFrame, WsFrameSink, WsSink};
use crate::server::http::AppState;
use crate::types::CaselineError;

/// Handle a WebSocket upgrade request on /ws
pub async fn handle_upgrade(state: Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let user = match state.auth.authenticate(&req) {
        Ok(user) => user,
        Err(e) => {
            debug!("WebSocket upgrade rejected: {}", e);
            return status_response(StatusCode::UNAUTHORIZED, "invalid or missing session token");
        }
    };

    if state.relay.registry().is_at_capacity() {
        warn!("WebSocket upgrade rejected: registry at capacity");
        return status_response(StatusCode::SERVICE_UNAVAILABLE, "connection limit reached");
    }

    match hyper_tungstenite::upgrade(req, None) {
        Ok((response, websocket)) => {
            let user_id = user.user_id;
            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => {
                        if let Err(e) = run_connection(state, user_id.clone(), ws).await {
                            debug!(user_id, "connection ended with error: {}", e);
                        }
                    }
                    Err(e) => error!("WebSocket upgrade failed: {:?}", e),
                }
            });

            let (parts, _) = response.into_parts();
            Response::from_parts(parts, Full::new(Bytes::new()))
        }
        Err(e) => {
            error!("WebSocket upgrade error: {:?}", e);
            status_response(StatusCode::BAD_REQUEST, "WebSocket upgrade failed")
        }
    }
}

/// Register the connection and pump frames until the socket closes
async fn run_connection(
    state: Arc<AppState>,
    user_id: String,
    ws: hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>,
) -> Result<(), CaselineError> {
    let (write, mut read) = ws.split();
    let write: WsSink = Arc::new(Mutex::new(write));
    let sink = Arc::new(WsFrameSink::new(Arc::clone(&write)));

    let registry = Arc::clone(state.relay.registry());
    let conn_id = registry.register(&user_id, sink.clone() as Arc<dyn FrameSink>)?;
    info!(user_id, %conn_id, "WebSocket connected");

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = handle_frame(&state, &user_id, &sink, &text).await {
                    debug!(user_id, "frame rejected: {}", e);
                    let frame = ServerFrame::Error {
                        message: e.to_string(),
                    };
                    if send_frame(&sink, &frame).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                if write.lock().await.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // Binary and pong frames are ignored
            Err(e) => {
                debug!(user_id, "WebSocket read error: {}", e);
                break;
            }
        }
    }

    registry.unregister(&user_id, conn_id);
    info!(user_id, %conn_id, "WebSocket disconnected");
    Ok(())
}

/// Dispatch one parsed client frame
async fn handle_frame(
    state: &Arc<AppState>,
    user_id: &str,
    sink: &Arc<WsFrameSink>,
    text: &str,
) -> Result<(), CaselineError> {
    match ClientFrame::parse(text)? {
        ClientFrame::SendMessage {
            conversation_id,
            content,
            attachments,
        } => {
            let message = state
                .messaging
                .send_message(user_id, &conversation_id, content, attachments)
                .await?;
            // Ack goes back on the sending socket only; other devices of
            // the sender learn about the message from their own frames
            send_frame(
                sink,
                &ServerFrame::Ack {
                    conversation_id,
                    message_id: message.id,
                    seq: message.seq,
                },
            )
            .await
        }
        ClientFrame::Typing { conversation_id } => {
            state.relay.typing_started(&conversation_id, user_id).await
        }
        ClientFrame::TypingStopped { conversation_id } => {
            state.relay.typing_stopped(&conversation_id, user_id).await
        }
        ClientFrame::MarkRead { conversation_id } => {
            state.messaging.mark_read(user_id, &conversation_id).await?;
            Ok(())
        }
        ClientFrame::Ping => send_frame(sink, &ServerFrame::Pong).await,
    }
}

async fn send_frame(sink: &Arc<WsFrameSink>, frame: &ServerFrame) -> Result<(), CaselineError> {
    sink.send(frame.to_message()?).await
}

fn status_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(
            serde_json::json!({ "error": message }).to_string(),
        )))
        .unwrap_or_default()
}
