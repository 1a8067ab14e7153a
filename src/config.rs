//! Configuration for Caseline
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Caseline - collaboration core for the SME peer-exchange platform
#[derive(Parser, Debug, Clone)]
#[command(name = "caseline")]
#[command(about = "Use-case search, messaging relay, and notifications")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (relaxed auth, optional NATS)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "caseline")]
    pub mongodb_db: String,

    /// Shared secret for verifying identity-provider session tokens
    /// (required in production)
    #[arg(long, env = "SESSION_SECRET")]
    pub session_secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Grace delay before a user with no remaining connections is
    /// reported offline, in milliseconds (absorbs quick reconnects)
    #[arg(long, env = "PRESENCE_GRACE_MS", default_value = "5000")]
    pub presence_grace_ms: u64,

    /// Typing indicators auto-expire after this many milliseconds
    /// without an explicit stop
    #[arg(long, env = "TYPING_TIMEOUT_MS", default_value = "6000")]
    pub typing_timeout_ms: u64,

    /// A repeat view by the same user only counts once per this window
    #[arg(long, env = "VIEW_COOLDOWN_HOURS", default_value = "24")]
    pub view_cooldown_hours: u64,

    /// Notifications expire after this many hours
    #[arg(long, env = "NOTIFICATION_TTL_HOURS", default_value = "720")]
    pub notification_ttl_hours: u64,

    /// Interval for the expiry and counter-reconciliation sweeps, in seconds
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value = "3600")]
    pub sweep_interval_secs: u64,

    /// Maximum simultaneous WebSocket connections
    #[arg(long, env = "MAX_CONNECTIONS", default_value = "32768")]
    pub max_connections: usize,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL (empty disables cross-instance fan-out)
    #[arg(long, env = "NATS_URL")]
    pub nats_url: Option<String>,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Get effective session secret (uses a default in dev mode)
    pub fn session_secret(&self) -> Result<String, String> {
        match (&self.session_secret, self.dev_mode) {
            (Some(secret), _) => Ok(secret.clone()),
            (None, true) => Ok("dev-only-insecure-secret-do-not-deploy".to_string()),
            (None, false) => Err("SESSION_SECRET is required in production mode".to_string()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.session_secret.is_none() {
            return Err("SESSION_SECRET is required in production mode".to_string());
        }

        if self.sweep_interval_secs == 0 {
            return Err("SWEEP_INTERVAL_SECS must be greater than zero".to_string());
        }

        if self.max_connections == 0 {
            return Err("MAX_CONNECTIONS must be greater than zero".to_string());
        }

        Ok(())
    }
}
