//! tf-av: external tool execution and job file handling.
//!
//! - [`ToolCommand`] runs one external command in its own process group,
//!   bounded by an optional timeout with a two-phase kill.
//! - [`ffmpeg`] turns a job descriptor into the ffmpeg argument vector.
//! - [`FileManager`] owns the scoped temp root and the disposal policy for
//!   job inputs and outputs.
//! - [`ToolRegistry`] locates the ffmpeg binary.

pub mod command;
pub mod ffmpeg;
pub mod files;
pub mod tools;

pub use command::{ToolCommand, ToolOutput};
pub use files::FileManager;
pub use tools::{ToolInfo, ToolRegistry};
