//! Caseline - collaboration core for the SME peer-exchange platform
//!
//! Caseline is the systems slice of the platform: ranked use-case search,
//! bookmark and view tracking, a WebSocket messaging relay, and a
//! notification dispatcher. Authentication is delegated to an external
//! identity provider; file bytes live in an external object store. Caseline
//! stores references and serves the ranked, real-time parts.
//!
//! ## Services
//!
//! - **Search**: filtered, scored, paginated use-case queries over MongoDB
//! - **Engagement**: idempotent bookmarks and cooldown-gated view counting
//! - **Relay**: per-user WebSocket connections with message fan-out,
//!   typing indicators, and presence
//! - **Notify**: persisted notifications with best-effort real-time push

pub mod auth;
pub mod config;
pub mod db;
pub mod engagement;
pub mod messaging;
pub mod nats;
pub mod notify;
pub mod relay;
pub mod routes;
pub mod search;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{CaselineError, Result};
