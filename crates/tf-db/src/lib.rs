//! tf-db: the status store.
//!
//! SQLite-backed persistence with connection pooling, embedded migrations,
//! typed models, and query modules for job records and the queue-wide
//! aggregate collections (pending, active, completed, failed). The
//! [`store::StatusStore`] trait is the interface workers and monitoring code
//! program against.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
pub mod store;

pub use models::{JobRecord, NewJob, QueueStats, StatusFilter, TaskFileStatus, TaskSummary};
pub use store::{SqliteStatusStore, StatusStore};
