//! tf-core: shared types, IDs, errors, and configuration.
//!
//! This crate is the foundational dependency for all other tf-* crates,
//! providing the typed job identifier, the job lifecycle enums, a unified
//! error type for failures that decide a job's outcome, the best-effort
//! error types for cleanup and callback delivery, and application
//! configuration.

pub mod config;
pub mod error;
pub mod ids;
pub mod job;

// Re-export the most commonly used items at the crate root.
pub use error::{CleanupError, Error, Result, TransportError};
pub use ids::*;
pub use job::*;
