//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which wires an [`AppContext`] to stand-in
//! `yt-dlp` and `ffmpeg` shell scripts and a scratch working directory. The
//! scripts log their invocations to a `log/` directory next to `work/`:
//!
//! - yt-dlp appends each URL to `log/ytdlp.calls`, writes
//!   `source:<url>` to `<prefix>.mp4` and prints the extension and path. URLs
//!   containing `fail`, `merged` or `vanish` trigger an extraction error, an
//!   `.mkv` file at the reported path, or no file at all. A `slow` URL leaves
//!   a `.part` file, sleeps for three seconds and then touches
//!   `log/slow.finished` before completing normally.
//! - ffmpeg writes its argument list to `log/<output name>.args` and then
//!   `webm:` followed by the input bytes to the output; an argument of `999`
//!   makes it fail after writing a partial output.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use axum::Router;
use tempfile::TempDir;

use webmforge::config::Config;
use webmforge::server::{create_router, AppContext};
use webmforge::tools::ToolRegistry;

const FAKE_YTDLP: &str = r#"#!/bin/sh
out=""
prev=""
url=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
  url="$a"
done
log="$(dirname "$out")/../log"
echo "$url" >> "$log/ytdlp.calls"
prefix=$(printf '%s' "$out" | sed 's/\.%(ext)s$//')
echo "[debug] Command-line config: $*" >&2
case "$url" in
  *slow*)
    printf 'partial' > "$prefix.mp4.part"
    sleep 3
    touch "$log/slow.finished"
    ;;
  *fail*)
    printf 'partial' > "$prefix.mp4.part"
    echo "ERROR: [generic] fail: Video unavailable" >&2
    exit 1
    ;;
  *vanish*)
    echo mp4
    echo "$prefix.mp4"
    exit 0
    ;;
  *merged*)
    printf 'source:%s' "$url" > "$prefix.mkv"
    echo mp4
    echo "$prefix.mkv"
    exit 0
    ;;
esac
printf 'source:%s' "$url" > "$prefix.mp4"
echo mp4
echo "$prefix.mp4"
"#;

const FAKE_FFMPEG: &str = r#"#!/bin/sh
in=""
out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-i" ]; then in="$a"; fi
  prev="$a"
  out="$a"
done
log="$(dirname "$out")/../log"
printf '%s\n' "$@" > "$log/$(basename "$out").args"
for a in "$@"; do
  if [ "$a" = "999" ]; then
    printf 'partial' > "$out"
    echo "[libvpx-vp9 @ 0x5581] crf 999 out of range [0 - 63]" >&2
    exit 1
  fi
done
{ printf 'webm:'; cat "$in"; } > "$out"
"#;

/// Directory holding the stand-in tools.
///
/// Written once per test binary, before any test spawns a process, so no
/// script is still open for writing when another thread executes it.
fn fake_bin_dir() -> &'static Path {
    static BIN: OnceLock<TempDir> = OnceLock::new();
    BIN.get_or_init(|| {
        let dir = tempfile::tempdir().expect("failed to create bin dir");
        for (name, script) in [("yt-dlp", FAKE_YTDLP), ("ffmpeg", FAKE_FFMPEG)] {
            let path = dir.path().join(name);
            std::fs::write(&path, script).expect("failed to write fake tool");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("failed to chmod fake tool");
        }
        dir
    })
    .path()
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub work_dir: PathBuf,
    pub log_dir: PathBuf,
    _scratch: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Like [`TestHarness::new`], letting the caller adjust the config first.
    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let bin = fake_bin_dir();
        let scratch = tempfile::tempdir().expect("failed to create scratch dir");
        let work_dir = scratch.path().join("work");
        let log_dir = scratch.path().join("log");
        std::fs::create_dir_all(&log_dir).expect("failed to create log dir");

        let mut config = Config::default();
        config.storage.work_dir = work_dir.clone();
        config.tools.ytdlp_path = Some(bin.join("yt-dlp"));
        config.tools.ffmpeg_path = Some(bin.join("ffmpeg"));
        config.tools.download_timeout_secs = 30;
        config.tools.transcode_timeout_secs = 30;
        adjust(&mut config);

        let tools = ToolRegistry::discover(&config.tools);
        let ctx = AppContext::new(&config, &tools).expect("failed to build context");

        Self {
            ctx,
            work_dir,
            log_dir,
            _scratch: scratch,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone())
    }

    /// Start Axum on a random port and return the harness with the bound address.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let app = harness.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Sorted names of every file in the working directory.
    pub fn work_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.work_dir)
            .expect("failed to list work dir")
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    /// Work dir files that belong to an intermediate download.
    pub fn intermediate_files(&self) -> Vec<String> {
        self.work_files()
            .into_iter()
            .filter(|n| n.contains("_download"))
            .collect()
    }

    /// Whether a `slow` download ran to completion.
    pub fn slow_download_finished(&self) -> bool {
        self.log_dir.join("slow.finished").exists()
    }

    /// Poll until the working directory is empty, up to `timeout`.
    pub async fn wait_for_empty_work_dir(&self, timeout: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.work_files().is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    /// URLs passed to yt-dlp so far.
    pub fn ytdlp_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.log_dir.join("ytdlp.calls"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Number of ffmpeg invocations so far.
    pub fn ffmpeg_calls(&self) -> usize {
        std::fs::read_dir(&self.log_dir)
            .expect("failed to list log dir")
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".args"))
            .count()
    }

    /// Arguments ffmpeg received when producing `output_name`.
    pub fn ffmpeg_args(&self, output_name: &str) -> Vec<String> {
        std::fs::read_to_string(self.log_dir.join(format!("{output_name}.args")))
            .expect("ffmpeg was not invoked for this output")
            .lines()
            .map(str::to_string)
            .collect()
    }
}
