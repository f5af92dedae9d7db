use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "transforge")]
#[command(author, version, about = "Durable ffmpeg job queue with supervised workers")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker pool and the monitoring API
    Serve {
        /// Host to bind to, overriding the config file
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on, overriding the config file
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the worker pool without the HTTP API
    Worker {
        /// Number of workers, overriding the config file
        #[arg(long)]
        count: Option<usize>,
    },

    /// Enqueue a job
    Submit {
        /// Job kind: normalize, captionize or custom
        #[arg(long)]
        kind: String,

        /// Input files; copied into the temp root before the job is queued
        #[arg(long = "input", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,

        /// Copy the result here once the job completes; defaults to the
        /// result's file name in the current directory
        #[arg(long, requires = "wait")]
        output: Option<PathBuf>,

        /// ffmpeg parameters replacing the kind's defaults
        #[arg(long, allow_hyphen_values = true)]
        params: Option<String>,

        /// URL that receives the result or failure
        #[arg(long)]
        callback: Option<String>,

        /// Wait for the job to finish and take the result out of the temp root
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, requires = "wait")]
        timeout: Option<u64>,
    },

    /// Print one task as JSON
    Status {
        /// Task id
        id: String,
    },

    /// Print queue counters as JSON
    Stats,

    /// Print a page of tasks as JSON
    Tasks {
        /// Status filter: all, queued, processing, completed or failed
        #[arg(long, default_value = "all")]
        status: String,

        /// Page size (at most 100)
        #[arg(long, default_value = "20")]
        limit: i64,

        /// Entries to skip
        #[arg(long, default_value = "0")]
        offset: i64,
    },

    /// Check that ffmpeg is available
    CheckTools,
}
