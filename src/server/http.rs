//! HTTP server implementation
//!
//! hyper http1 with TokioIo; WebSocket upgrades run on the same listener
//! via `with_upgrades`.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::SessionValidator;
use crate::config::Args;
use crate::db::schemas::{
    UseCaseDoc, BOOKMARK_COLLECTION, CONVERSATION_COLLECTION, MESSAGE_COLLECTION,
    NOTIFICATION_COLLECTION, USE_CASE_COLLECTION, VIEW_EVENT_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::engagement::{self, EngagementTracker};
use crate::messaging::{ConversationDirectory, MessagingService};
use crate::nats::{self, NatsClient, NatsFanout};
use crate::notify::{self, NotificationDispatcher};
use crate::relay::{self, ConnectionRegistry, MessageRelay, TypingTracker};
use crate::routes;
use crate::search::SearchEngine;
use crate::server::ws;
use crate::types::CaselineError;

pub(crate) type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: MongoClient,
    pub auth: SessionValidator,
    pub use_cases: MongoCollection<UseCaseDoc>,
    pub search: SearchEngine,
    pub engagement: EngagementTracker,
    pub relay: Arc<MessageRelay>,
    pub messaging: MessagingService,
    pub notifier: Arc<NotificationDispatcher>,
    /// None when no NATS URL is configured (single-instance mode)
    pub fanout: Option<Arc<NatsFanout>>,
}

impl AppState {
    /// Connect to backing services and wire the subsystems together
    pub async fn init(args: Args) -> Result<Arc<Self>, CaselineError> {
        let secret = args.session_secret().map_err(CaselineError::Config)?;
        let auth = SessionValidator::new(&secret, args.dev_mode)?;

        let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
        let use_cases = mongo.collection(USE_CASE_COLLECTION).await?;
        let bookmarks = mongo.collection(BOOKMARK_COLLECTION).await?;
        let views = mongo.collection(VIEW_EVENT_COLLECTION).await?;
        let conversations = mongo.collection(CONVERSATION_COLLECTION).await?;
        let messages = mongo.collection(MESSAGE_COLLECTION).await?;
        let notifications = mongo.collection(NOTIFICATION_COLLECTION).await?;

        let fanout = match args.nats.nats_url {
            Some(_) => {
                let name = format!("caseline-{}", args.node_id);
                match NatsClient::new(&args.nats, &name).await {
                    Ok(client) => Some(Arc::new(NatsFanout::new(client))),
                    Err(e) if args.dev_mode => {
                        warn!("NATS connection failed (dev mode, continuing without): {}", e);
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
            None => {
                warn!("NATS_URL not set, cross-instance fan-out disabled");
                None
            }
        };

        let registry = Arc::new(ConnectionRegistry::new(
            args.max_connections,
            Duration::from_millis(args.presence_grace_ms),
        ));
        let typing = Arc::new(TypingTracker::new(Duration::from_millis(
            args.typing_timeout_ms,
        )));
        let directory = ConversationDirectory::new(conversations.clone());
        let relay = Arc::new(MessageRelay::new(
            Arc::clone(&registry),
            typing,
            directory,
            fanout.clone(),
        ));

        let search = SearchEngine::new(use_cases.clone());
        let engagement = EngagementTracker::new(
            use_cases.clone(),
            bookmarks,
            views,
            args.view_cooldown_hours as i64,
        );
        let notifier = Arc::new(NotificationDispatcher::new(
            notifications,
            Arc::clone(&relay),
            args.notification_ttl_hours,
        ));
        let messaging = MessagingService::new(
            conversations,
            messages,
            Arc::clone(&relay),
            Arc::clone(&notifier),
        );

        Ok(Arc::new(Self {
            args,
            mongo,
            auth,
            use_cases,
            search,
            engagement,
            relay,
            messaging,
            notifier,
            fanout,
        }))
    }
}

/// Start background tasks and the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), CaselineError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Caseline listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - X-User-Id header accepted");
    }

    relay::spawn_presence_task(Arc::clone(&state.relay));
    relay::spawn_typing_sweep(Arc::clone(&state.relay));

    let sweep = Duration::from_secs(state.args.sweep_interval_secs);
    notify::spawn_expiry_sweep(Arc::clone(&state.notifier), sweep);
    engagement::spawn_reconcile_task(state.engagement.clone(), sweep);

    if let Some(ref fanout) = state.fanout {
        nats::spawn_delivery_task(Arc::clone(fanout), Arc::clone(state.relay.registry()));
        info!("Cross-instance fan-out enabled");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(&state))
        }

        // Readiness probe: 200 only when MongoDB answers
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            to_boxed(routes::readiness_check(&state).await)
        }

        (Method::GET, "/version") => to_boxed(routes::version_info()),

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        // Per-user WebSocket connection
        (Method::GET, "/ws") if hyper_tungstenite::is_upgrade_request(&req) => {
            return Ok(to_boxed(ws::handle_upgrade(state, req).await));
        }

        // Use-case search and engagement
        (Method::GET, "/api/use-cases") => {
            to_boxed(routes::use_cases::search(&state, req).await)
        }
        (Method::POST, "/api/use-cases") => {
            to_boxed(routes::use_cases::submit(&state, req).await)
        }
        (Method::GET, p) if routes::use_cases::is_detail_path(p) => {
            to_boxed(routes::use_cases::detail(&state, req).await)
        }
        (Method::POST, p) if p.starts_with("/api/use-cases/") && p.ends_with("/bookmark") => {
            to_boxed(routes::use_cases::bookmark(&state, req).await)
        }
        (Method::DELETE, p) if p.starts_with("/api/use-cases/") && p.ends_with("/bookmark") => {
            to_boxed(routes::use_cases::unbookmark(&state, req).await)
        }
        (Method::GET, "/api/bookmarks") => {
            to_boxed(routes::use_cases::list_bookmarks(&state, req).await)
        }

        // Conversations and messages
        (Method::POST, "/api/conversations") => {
            to_boxed(routes::conversations::create(&state, req).await)
        }
        (Method::GET, "/api/conversations") => {
            to_boxed(routes::conversations::list(&state, req).await)
        }
        (Method::GET, p) if p.starts_with("/api/conversations/") && p.ends_with("/messages") => {
            to_boxed(routes::conversations::list_messages(&state, req).await)
        }
        (Method::POST, p) if p.starts_with("/api/conversations/") && p.ends_with("/messages") => {
            to_boxed(routes::conversations::send_message(&state, req).await)
        }
        (Method::POST, p) if p.starts_with("/api/conversations/") && p.ends_with("/read") => {
            to_boxed(routes::conversations::mark_read(&state, req).await)
        }
        (Method::POST, p) if p.starts_with("/api/conversations/") && p.ends_with("/archive") => {
            to_boxed(routes::conversations::archive(&state, req).await)
        }
        (Method::POST, p) if p.starts_with("/api/conversations/") && p.ends_with("/unarchive") => {
            to_boxed(routes::conversations::unarchive(&state, req).await)
        }
        (Method::PATCH, p) if p.starts_with("/api/messages/") => {
            to_boxed(routes::conversations::edit_message(&state, req).await)
        }
        (Method::DELETE, p) if p.starts_with("/api/messages/") => {
            to_boxed(routes::conversations::delete_message(&state, req).await)
        }

        // Notifications
        (Method::GET, "/api/notifications") => {
            to_boxed(routes::notifications::list(&state, req).await)
        }
        (Method::GET, "/api/notifications/unread-count") => {
            to_boxed(routes::notifications::unread_count(&state, req).await)
        }
        (Method::POST, "/api/notifications/read-all") => {
            to_boxed(routes::notifications::mark_all_read(&state, req).await)
        }
        (Method::POST, p) if p.starts_with("/api/notifications/") && p.ends_with("/read") => {
            to_boxed(routes::notifications::mark_read(&state, req).await)
        }

        (_, p) => to_boxed(not_found_response(p)),
    };

    Ok(response)
}

pub(crate) fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header(
            "Access-Control-Allow-Methods",
            "GET, POST, PATCH, DELETE, OPTIONS",
        )
        .body(Full::new(Bytes::new()))
        .unwrap_or_default()
}

fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default()
}
