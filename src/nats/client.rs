//! NATS client wrapper
//!
//! Connection management for the cross-instance fan-out bridge. Initial
//! connection fails fast; reconnection after a successful connect is
//! handled by the client itself.

use async_nats::{Client, ConnectOptions};
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::types::CaselineError;

/// Ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// NATS client wrapper
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to NATS
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self, CaselineError> {
        let url = args
            .nats_url
            .as_deref()
            .ok_or_else(|| CaselineError::Config("NATS_URL is not set".to_string()))?;

        info!("Connecting to NATS at {}", url);

        // No retry_on_initial_connect: fail fast when NATS is down at
        // startup, reconnect automatically afterwards
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(url)
            .await
            .map_err(|e| CaselineError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", url);

        Ok(Self { client })
    }

    /// Get the underlying NATS client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Publish a message to a subject
    pub async fn publish(&self, subject: String, payload: Bytes) -> Result<(), CaselineError> {
        self.client
            .publish(subject, payload)
            .await
            .map_err(|e| CaselineError::Nats(format!("Publish failed: {}", e)))
    }

    /// Subscribe to a subject (wildcards allowed)
    pub async fn subscribe(
        &self,
        subject: String,
    ) -> Result<async_nats::Subscriber, CaselineError> {
        self.client
            .subscribe(subject)
            .await
            .map_err(|e| CaselineError::Nats(format!("Subscribe failed: {}", e)))
    }
}
