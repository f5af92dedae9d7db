//! Discovery of the ffmpeg binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tf_core::config::ExecutionConfig;

/// Tool name used for discovery and error reporting.
pub const FFMPEG: &str = "ffmpeg";

/// Availability information for an external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Resolved location of ffmpeg.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    ffmpeg: Option<PathBuf>,
}

impl ToolRegistry {
    /// Use the configured path when it exists, otherwise search `PATH`.
    pub fn discover(config: &ExecutionConfig) -> Self {
        let ffmpeg = match &config.ffmpeg_path {
            Some(p) if p.exists() => Some(p.clone()),
            Some(p) => {
                tracing::warn!(
                    "Configured ffmpeg path {} does not exist; searching PATH",
                    p.display()
                );
                which::which(FFMPEG).ok()
            }
            None => which::which(FFMPEG).ok(),
        };
        Self { ffmpeg }
    }

    /// Registry pointing at an explicit binary, without checking it exists.
    pub fn with_ffmpeg(path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: Some(path.into()),
        }
    }

    /// The ffmpeg path, or [`tf_core::Error::Spawn`] if it was not found.
    pub fn ffmpeg(&self) -> tf_core::Result<&Path> {
        self.ffmpeg.as_deref().ok_or_else(|| {
            tf_core::Error::spawn(FFMPEG, "ffmpeg not found; is it installed and in PATH?")
        })
    }

    pub fn check(&self) -> ToolInfo {
        match &self.ffmpeg {
            Some(path) => ToolInfo {
                name: FFMPEG.to_string(),
                available: true,
                version: detect_version(path),
                path: Some(path.clone()),
            },
            None => ToolInfo {
                name: FFMPEG.to_string(),
                available: false,
                version: None,
                path: None,
            },
        }
    }
}

/// Run `ffmpeg -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_with_default_config() {
        let registry = ToolRegistry::discover(&ExecutionConfig::default());
        // ffmpeg may not be installed here; the call must not panic.
        let info = registry.check();
        assert_eq!(info.name, "ffmpeg");
        assert_eq!(info.available, registry.ffmpeg().is_ok());
    }

    #[test]
    fn missing_configured_path_falls_back() {
        let cfg = ExecutionConfig {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/ffmpeg_xyz")),
            ..Default::default()
        };
        let registry = ToolRegistry::discover(&cfg);
        if let Ok(path) = registry.ffmpeg() {
            assert_ne!(path, Path::new("/nonexistent/ffmpeg_xyz"));
        }
    }

    #[test]
    fn explicit_path_is_used() {
        let registry = ToolRegistry::with_ffmpeg("/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(
            registry.ffmpeg().unwrap(),
            Path::new("/opt/ffmpeg/bin/ffmpeg")
        );
    }

    #[test]
    fn tool_info_serialization() {
        let info = ToolInfo {
            name: "ffmpeg".into(),
            available: false,
            version: None,
            path: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: ToolInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "ffmpeg");
        assert!(!back.available);
    }
}
