//! Unified error type for webmforge.
//!
//! Every failure during a conversion or a delivery ends up as an [`Error`].
//! The `Display` text is what the caller sees in the JSON `error` field, and
//! [`Error::http_status`] picks the status code.

/// Failure taxonomy for conversion and delivery.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request itself is unusable (missing URL, malformed body).
    #[error("{0}")]
    Validation(String),

    /// The downloader reported a failure (network, extraction, unavailable video).
    #[error("Failed to download video: {0}")]
    Download(String),

    /// The downloader exited cleanly but left no file at either candidate path.
    #[error("Failed to download video file")]
    DownloadMissing,

    /// The encoder exited with a non-zero status.
    #[error("Video conversion failed: {0}")]
    Transcode(String),

    /// A download was requested for a file that does not exist.
    #[error("File not found")]
    NotFound,

    /// An external tool could not be found, spawned, or finished in time.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("An unexpected error occurred: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Anything else.
    #[error("An unexpected error occurred: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound => 404,
            Error::Download(_)
            | Error::DownloadMissing
            | Error::Transcode(_)
            | Error::Tool { .. }
            | Error::Io { .. }
            | Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
