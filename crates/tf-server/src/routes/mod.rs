//! Monitoring route handlers.

pub mod health;
pub mod queue;
