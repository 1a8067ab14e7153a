//! NATS bridge for multi-instance deployments
//!
//! Optional: without a configured NATS URL the relay delivers only to
//! sockets on this instance, which is correct for a single-instance
//! deployment.

pub mod client;
pub mod fanout;

pub use client::NatsClient;
pub use fanout::{spawn_delivery_task, NatsFanout};
