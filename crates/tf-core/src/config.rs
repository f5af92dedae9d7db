//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, tool execution, file handling, the worker
//! pool and callback delivery. Every section defaults sensibly so a
//! completely empty `{}` file is valid. Environment variables recognised by
//! [`Config::apply_env`] override file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub execution: ExecutionConfig,
    pub files: FilesConfig,
    pub workers: WorkersConfig,
    pub callback: CallbackConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` to read variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TRANSFORGE_DB") {
            self.server.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FFMPEG_PATH") {
            self.execution.ffmpeg_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FFMPEG_TIMEOUT") {
            match v.trim().parse::<u64>() {
                Ok(secs) => self.execution.timeout_secs = secs,
                Err(_) => tracing::warn!("Ignoring invalid FFMPEG_TIMEOUT '{v}'"),
            }
        }
        if let Some(v) = lookup("FFMPEG_THREADS") {
            self.execution.threads = v.trim().to_string();
        }
        if let Some(v) = lookup("TRANSFORGE_TEMP_DIR") {
            self.files.temp_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("KEEP_OUTPUT_FILES") {
            self.files.keep_output_files = v.trim().eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("TRANSFORGE_WORKERS") {
            match v.trim().parse::<usize>() {
                Ok(n) => self.workers.count = n,
                Err(_) => tracing::warn!("Ignoring invalid TRANSFORGE_WORKERS '{v}'"),
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.workers.count == 0 {
            warnings.push("workers.count is 0; no jobs will be processed".into());
        }

        if self.workers.lease_secs < 3 {
            warnings.push(format!(
                "workers.lease_secs {} is too short for heartbeats; use at least 3",
                self.workers.lease_secs
            ));
        }

        if self.execution.threads != "auto" && self.execution.threads.parse::<u32>().is_err() {
            warnings.push(format!(
                "execution.threads '{}' is neither 'auto' nor a number",
                self.execution.threads
            ));
        }

        if !self.files.temp_dir.is_absolute() {
            warnings.push(format!(
                "files.temp_dir {} is not absolute",
                self.files.temp_dir.display()
            ));
        }

        if self.callback.timeout_secs == 0 {
            warnings.push("callback.timeout_secs is 0; callbacks may block a worker forever".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server and store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            db_path: PathBuf::from("/data/transforge.db"),
        }
    }
}

/// External tool execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Explicit ffmpeg path; discovered on `PATH` when unset.
    pub ffmpeg_path: Option<PathBuf>,
    /// Wall-clock bound per job in seconds. `0` means unbounded.
    pub timeout_secs: u64,
    /// Time between SIGTERM and SIGKILL once a timeout fires.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
    /// ffmpeg thread count, or `auto` to let ffmpeg decide.
    #[serde(default = "default_threads")]
    pub threads: String,
}

fn default_grace_period() -> u64 {
    5
}

fn default_threads() -> String {
    "auto".into()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            timeout_secs: 0,
            grace_period_secs: default_grace_period(),
            threads: default_threads(),
        }
    }
}

impl ExecutionConfig {
    /// The configured timeout, `None` when unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Temp-root and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Scoped directory that holds every job's inputs and outputs.
    pub temp_dir: PathBuf,
    /// Retention flag: keep outputs after delivery.
    pub keep_output_files: bool,
    /// How long a completed job without a callback keeps its output waiting
    /// for the synchronous consumer to release it. Past that the reaper
    /// disposes of it.
    pub handoff_secs: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("ffmpeg_api"),
            keep_output_files: false,
            handoff_secs: 600,
        }
    }
}

impl FilesConfig {
    pub fn handoff(&self) -> Duration {
        Duration::from_secs(self.handoff_secs)
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub count: usize,
    pub poll_interval_ms: u64,
    /// Claim lease; renewed by a heartbeat while the tool runs.
    pub lease_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: 2,
            poll_interval_ms: 500,
            lease_secs: 120,
        }
    }
}

impl WorkersConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

/// Callback delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub timeout_secs: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl CallbackConfig {
    /// Request bound, `None` when set to 0.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}
