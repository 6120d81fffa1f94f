//! WebM encoding through ffmpeg.
//!
//! Video is always VP9 and audio always Opus; the caller can only add the
//! optional quality knobs in [`QualityOptions`]. Each knob that is absent is
//! left out of the command line entirely so the encoder's own default applies.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::ToolCommand;
use crate::error::{Error, Result};

pub const VIDEO_CODEC: &str = "libvpx-vp9";
pub const AUDIO_CODEC: &str = "libopus";

/// Caller-supplied encoding parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityOptions {
    /// `WIDTHxHEIGHT`; only the width is applied, the height follows the
    /// source aspect ratio.
    #[serde(default)]
    pub resolution: Option<String>,

    /// Target video bitrate, e.g. `1M` or `800k`.
    #[serde(default)]
    pub bitrate: Option<String>,

    /// Constant rate factor; passed through as-is for the encoder to validate.
    #[serde(default)]
    pub crf: Option<i64>,

    #[serde(default)]
    pub framerate: Option<u32>,
}

impl QualityOptions {
    fn resolution(&self) -> Option<&str> {
        non_empty(self.resolution.as_deref())
    }

    fn bitrate(&self) -> Option<&str> {
        non_empty(self.bitrate.as_deref())
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Build the `scale` filter for a resolution string: `1280x720` → `scale=1280:-1`.
pub fn scale_filter(resolution: &str) -> String {
    let width = resolution
        .split(['x', 'X', ':'])
        .next()
        .unwrap_or(resolution)
        .trim();
    format!("scale={width}:-1")
}

/// Arguments for an ffmpeg invocation.
pub fn build_args(input: &Path, quality: &QualityOptions, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-c:v".to_string(),
        VIDEO_CODEC.to_string(),
        "-c:a".to_string(),
        AUDIO_CODEC.to_string(),
    ];

    if let Some(resolution) = quality.resolution() {
        args.push("-vf".to_string());
        args.push(scale_filter(resolution));
    }
    if let Some(bitrate) = quality.bitrate() {
        args.push("-b:v".to_string());
        args.push(bitrate.to_string());
    }
    if let Some(crf) = quality.crf {
        args.push("-crf".to_string());
        args.push(crf.to_string());
    }
    if let Some(framerate) = quality.framerate {
        args.push("-r".to_string());
        args.push(framerate.to_string());
    }

    args.push(output.to_string_lossy().to_string());
    args
}

/// Invokes ffmpeg to produce a WebM file.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    /// Encode `input` into `output`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transcode`] carrying ffmpeg's stderr on a non-zero
    /// exit, or the failure description if ffmpeg could not run to completion.
    pub async fn transcode(
        &self,
        input: &Path,
        quality: &QualityOptions,
        output: &Path,
    ) -> Result<()> {
        let mut cmd = ToolCommand::new(self.program.clone());
        cmd.args(build_args(input, quality, output))
            .timeout(self.timeout);

        tracing::info!("FFmpeg command: {}", cmd.display());

        let result = cmd
            .output()
            .await
            .map_err(|e| Error::Transcode(e.to_string()))?;

        if !result.status.success() {
            let stderr = result.stderr.trim().to_string();
            tracing::warn!("FFmpeg exited with {}: {}", result.status, stderr);
            return Err(Error::Transcode(stderr));
        }

        tracing::info!("Encoded {:?}", output);
        Ok(())
    }
}
