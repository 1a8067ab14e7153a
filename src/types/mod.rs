//! Shared types for Caseline

mod error;

pub use error::{CaselineError, Result};
