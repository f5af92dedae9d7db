//! Query modules, one per concern.

pub mod jobs;
pub mod stats;
