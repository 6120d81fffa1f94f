//! Source download through yt-dlp.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::ToolCommand;
use crate::error::{Error, Result};

/// Format preference: best mp4 video with m4a audio, else the best single
/// mp4 file, else whatever is best.
pub const FORMAT_SELECTOR: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// How the on-disk path of a download was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSource {
    /// `<prefix>.<ext>` with the extension reported by the downloader.
    Template,
    /// The final file path the downloader reported after moving the file.
    ToolReported,
}

/// A downloaded source file that exists on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub path: PathBuf,
    pub resolved_by: PathSource,
}

/// Invokes yt-dlp for a single source URL.
#[derive(Debug, Clone)]
pub struct Fetcher {
    program: PathBuf,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    /// Download `url` to `<prefix>.<ext>`.
    ///
    /// # Errors
    ///
    /// - [`Error::Download`] if yt-dlp fails, times out or cannot be started.
    /// - [`Error::DownloadMissing`] if it succeeds but no file can be found.
    pub async fn fetch(&self, url: &str, prefix: &Path) -> Result<FetchedMedia> {
        let mut cmd = ToolCommand::new(self.program.clone());
        cmd.args(build_args(url, prefix)).timeout(self.timeout);

        tracing::info!("Downloading {}", url);

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::Download(e.to_string()))?;

        for line in output.stderr.lines() {
            tracing::debug!(target: "webmforge::fetcher::ytdlp", "{}", line);
        }

        if !output.status.success() {
            let message = error_message(&output.stderr)
                .unwrap_or_else(|| format!("yt-dlp exited with status {}", output.status));
            tracing::warn!("yt-dlp failed for {}: {}", url, message);
            return Err(Error::Download(message));
        }

        let report = DownloadReport::parse(&output.stdout);
        let fetched = resolve_path(prefix, &report).await?;

        tracing::info!("Downloaded {} to {:?}", url, fetched.path);
        Ok(fetched)
    }
}

/// Arguments for a yt-dlp invocation.
pub fn build_args(url: &str, prefix: &Path) -> Vec<String> {
    vec![
        "-f".to_string(),
        FORMAT_SELECTOR.to_string(),
        "-o".to_string(),
        output_template(prefix),
        "--no-playlist".to_string(),
        // Finished parts keep the current time, not the upload date.
        "--no-mtime".to_string(),
        "--verbose".to_string(),
        "--print".to_string(),
        "after_move:ext".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        // Keeps a URL starting with '-' from being read as an option.
        "--".to_string(),
        url.to_string(),
    ]
}

/// `<prefix>.%(ext)s`, with any `%` in the prefix escaped for yt-dlp.
fn output_template(prefix: &Path) -> String {
    format!("{}.%(ext)s", prefix.display().to_string().replace('%', "%%"))
}

/// What yt-dlp printed on stdout after moving the file into place.
#[derive(Debug, Default, PartialEq, Eq)]
struct DownloadReport {
    ext: Option<String>,
    filepath: Option<PathBuf>,
}

impl DownloadReport {
    /// The last two non-empty stdout lines are the extension and the final path.
    fn parse(stdout: &str) -> Self {
        let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).rev();
        let filepath = lines.next().map(PathBuf::from);
        let ext = lines.next().map(str::to_string);
        Self { ext, filepath }
    }
}

async fn resolve_path(prefix: &Path, report: &DownloadReport) -> Result<FetchedMedia> {
    if let Some(ext) = &report.ext {
        let candidate = PathBuf::from(format!("{}.{}", prefix.display(), ext));
        if is_file(&candidate).await {
            return Ok(FetchedMedia {
                path: candidate,
                resolved_by: PathSource::Template,
            });
        }
    }

    if let Some(reported) = &report.filepath {
        if is_file(reported).await {
            return Ok(FetchedMedia {
                path: reported.clone(),
                resolved_by: PathSource::ToolReported,
            });
        }
    }

    Err(Error::DownloadMissing)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Pull the `ERROR:` lines out of yt-dlp's stderr, falling back to the last
/// few lines when there are none.
fn error_message(stderr: &str) -> Option<String> {
    let errors: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:"))
        .collect();
    if !errors.is_empty() {
        return Some(errors.join("\n"));
    }

    let tail: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if tail.is_empty() {
        return None;
    }
    Some(tail[tail.len().saturating_sub(5)..].join("\n"))
}
