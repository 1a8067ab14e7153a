//! MongoDB persistence for Caseline

pub mod mongo;
pub mod schemas;

pub use mongo::{retry_read, MongoClient, MongoCollection};
