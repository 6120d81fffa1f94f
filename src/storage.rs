//! Working-directory management.
//!
//! All intermediate downloads and finished outputs live in one flat directory.
//! Each conversion gets a [`WorkItem`] keyed by a fresh UUID, so concurrent
//! requests never touch each other's files and the file name is the only
//! index needed to find an output again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashSet;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Extension (and container) of every finished output.
pub const OUTPUT_EXTENSION: &str = "webm";

/// Suffix appended to the work item id for the downloader's output template.
const DOWNLOAD_SUFFIX: &str = "_download";

/// Handle on the working directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    /// Ids of work items still alive; their files are never swept.
    active: Arc<DashSet<Uuid>>,
}

impl Storage {
    /// Open the working directory, creating it if absent.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        tracing::debug!("Working directory ready at {:?}", root);
        Ok(Self {
            root,
            active: Arc::new(DashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate paths for a new conversion.
    pub fn new_work_item(&self) -> WorkItem {
        let id = Uuid::new_v4();
        self.active.insert(id);
        WorkItem {
            id,
            root: self.root.clone(),
            download_prefix: self.root.join(format!("{id}{DOWNLOAD_SUFFIX}")),
            output_path: self.root.join(format!("{id}.{OUTPUT_EXTENSION}")),
            keep_output: false,
            released: false,
            active: Arc::clone(&self.active),
        }
    }

    /// Resolve a client-supplied output file name to a path in the working
    /// directory.
    ///
    /// Only names of the form `<uuid>.webm` are accepted, so intermediate
    /// downloads and anything outside the directory can never be served.
    pub async fn resolve_output(&self, filename: &str) -> Result<PathBuf> {
        if !is_output_filename(filename) {
            return Err(Error::NotFound);
        }

        let path = self.root.join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(Error::NotFound),
        }
    }

    /// Delete files in the working directory not modified within `max_age`.
    ///
    /// Files belonging to a live [`WorkItem`] are skipped whatever their
    /// mtime. Returns the number of files removed.
    pub async fn sweep(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if owning_item(&entry.file_name().to_string_lossy())
                .is_some_and(|id| self.active.contains(&id))
            {
                continue;
            }

            let meta = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };

            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age <= max_age {
                continue;
            }

            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::info!("Swept orphaned file {:?} (age {}s)", path, age.as_secs());
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to sweep {:?}: {}", path, e),
            }
        }

        Ok(removed)
    }
}

/// Id of the work item a file in the working directory belongs to.
fn owning_item(filename: &str) -> Option<Uuid> {
    filename.get(..36).and_then(|stem| Uuid::try_parse(stem).ok())
}

fn is_output_filename(filename: &str) -> bool {
    let Some(stem) = filename
        .strip_suffix(OUTPUT_EXTENSION)
        .and_then(|s| s.strip_suffix('.'))
    else {
        return false;
    };

    // Hyphenated form only; the braced and urn forms are not names we hand out.
    stem.len() == 36 && Uuid::try_parse(stem).is_ok()
}

/// Periodically sweep orphaned files until `cancel` fires.
pub fn spawn_sweeper(
    storage: Storage,
    interval: Duration,
    max_age: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match storage.sweep(max_age).await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!("Orphan sweep removed {} file(s)", n),
                        Err(e) => tracing::warn!("Orphan sweep failed: {}", e),
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        tracing::debug!("Orphan sweeper stopped");
    })
}

/// Paths owned by a single conversion request.
///
/// Releasing a `WorkItem` removes every intermediate download it produced
/// (including partial files the downloader left behind) and, unless
/// [`WorkItem::keep_output`] was called, the output file too. A work item
/// dropped without [`WorkItem::release`] (the request future was cancelled)
/// runs the same cleanup on the blocking pool.
#[derive(Debug)]
pub struct WorkItem {
    id: Uuid,
    root: PathBuf,
    download_prefix: PathBuf,
    output_path: PathBuf,
    keep_output: bool,
    released: bool,
    active: Arc<DashSet<Uuid>>,
}

impl WorkItem {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Path prefix for the downloaded file; the extension is chosen by the downloader.
    pub fn download_prefix(&self) -> &Path {
        &self.download_prefix
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn output_filename(&self) -> String {
        format!("{}.{}", self.id, OUTPUT_EXTENSION)
    }

    /// Relative reference the client uses to fetch the output.
    pub fn download_url(&self) -> String {
        format!("/download/{}", self.output_filename())
    }

    /// Mark the output as finished so it survives this work item.
    pub fn keep_output(&mut self) {
        self.keep_output = true;
    }

    /// Remove this item's files, waiting for the removal to finish.
    pub async fn release(mut self) {
        let cleanup = self.take_cleanup();
        if let Err(e) = tokio::task::spawn_blocking(move || cleanup.run()).await {
            tracing::warn!("Cleanup task for work item {} failed: {}", self.id, e);
        }
    }

    fn take_cleanup(&mut self) -> Cleanup {
        self.released = true;
        Cleanup {
            root: self.root.clone(),
            download_prefix: format!("{}{}", self.id, DOWNLOAD_SUFFIX),
            unfinished_output: (!self.keep_output).then(|| self.output_path.clone()),
        }
    }
}

impl Drop for WorkItem {
    fn drop(&mut self) {
        if !self.released {
            let cleanup = self.take_cleanup();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(move || cleanup.run());
                }
                Err(_) => cleanup.run(),
            }
        }
        self.active.remove(&self.id);
    }
}

/// Files a finished or abandoned work item leaves behind.
#[derive(Debug)]
struct Cleanup {
    root: PathBuf,
    download_prefix: String,
    unfinished_output: Option<PathBuf>,
}

impl Cleanup {
    fn run(&self) {
        self.discard_downloads();

        if let Some(output) = &self.unfinished_output {
            match std::fs::remove_file(output) {
                Ok(()) => tracing::debug!("Removed unfinished output {:?}", output),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove unfinished output {:?}: {}", output, e),
            }
        }
    }

    /// Remove every file whose name starts with the download prefix.
    fn discard_downloads(&self) {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Could not list {:?} for cleanup: {}", self.root, e);
                return;
            }
        };

        for entry in entries.flatten() {
            if !entry
                .file_name()
                .to_string_lossy()
                .starts_with(&self.download_prefix)
            {
                continue;
            }
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Removed intermediate file {:?}", path),
                Err(e) => tracing::warn!("Failed to remove intermediate file {:?}: {}", path, e),
            }
        }
    }
}
