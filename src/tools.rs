//! External tool detection.
//!
//! The [`ToolRegistry`] resolves the locations of the two external programs
//! this service drives (yt-dlp and ffmpeg) and reports their versions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;
use crate::config::ToolsConfig;
use crate::error::{Error, Result};

pub const YTDLP: &str = "yt-dlp";
pub const FFMPEG: &str = "ffmpeg";

const KNOWN_TOOLS: &[&str] = &[YTDLP, FFMPEG];

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of the tool's version output.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool paths.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, PathBuf>,
}

impl ToolRegistry {
    /// Discover tools, preferring configured paths over a `PATH` lookup.
    ///
    /// A configured path that does not exist falls back to `PATH`. Tools that
    /// are not found are left out of the registry.
    pub fn discover(config: &ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                YTDLP => config.ytdlp_path.as_deref(),
                FFMPEG => config.ffmpeg_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                _ => which::which(name).ok(),
            };

            if let Some(path) = resolved {
                tools.insert(name.to_string(), path);
            }
        }

        Self { tools }
    }

    /// Return the resolved path for `name`, or [`Error::Tool`] if it was not found.
    pub fn require(&self, name: &str) -> Result<&Path> {
        self.tools
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::tool(name, format!("{name} not found; is it installed and in PATH?")))
    }

    /// Path for `name`, falling back to the bare program name so the OS
    /// lookup runs at spawn time.
    pub fn path_or_name(&self, name: &str) -> PathBuf {
        match self.require(name) {
            Ok(path) => path.to_path_buf(),
            Err(e) => {
                tracing::debug!("{}; deferring lookup to spawn time", e);
                PathBuf::from(name)
            }
        }
    }

    /// Check all known tools and return availability information.
    pub async fn check_all(&self) -> Vec<ToolInfo> {
        let mut infos = Vec::with_capacity(KNOWN_TOOLS.len());

        for &name in KNOWN_TOOLS {
            infos.push(match self.tools.get(name) {
                Some(path) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(name, path).await,
                    path: Some(path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            });
        }

        infos
    }
}

/// Run `<tool> --version` (`-version` for ffmpeg) and return the first line of stdout.
async fn detect_version(name: &str, path: &Path) -> Option<String> {
    let version_arg = match name {
        FFMPEG => "-version",
        _ => "--version",
    };

    let output = ToolCommand::new(path.to_path_buf())
        .arg(version_arg)
        .timeout(VERSION_TIMEOUT)
        .output()
        .await
        .map_err(|e| tracing::debug!("Version check failed: {}", e))
        .ok()?;

    if !output.status.success() {
        return None;
    }

    output.stdout.lines().next().map(|s| s.trim().to_string())
}
