//! `GET /download/:filename`: one-time delivery of a finished output.

use std::path::PathBuf;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use super::error::AppError;
use super::AppContext;
use crate::error::Error;

/// Bytes read from disk per body chunk.
pub const CHUNK_SIZE: usize = 1024 * 1024;

const CONTENT_TYPE: &str = "video/webm";

pub async fn download(
    State(ctx): State<AppContext>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let path = ctx.storage.resolve_output(&filename).await?;

    let file = File::open(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound,
        _ => Error::from(e),
    })?;
    let len = file.metadata().await.map_err(Error::from)?.len();

    tracing::info!("Delivering {} ({} bytes)", filename, len);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, len.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(deliver_once(file, path)))
        .map_err(|e| Error::Internal(e.to_string()))?;

    Ok(response)
}

/// Stream `file` in [`CHUNK_SIZE`] chunks and delete it once fully read.
///
/// The deletion happens before the final chunk is handed on, because the
/// HTTP layer stops polling the body as soon as `Content-Length` bytes have
/// been written. If the client goes away earlier the stream is dropped and
/// the file stays for the orphan sweep.
fn deliver_once(file: File, path: PathBuf) -> impl Stream<Item = std::io::Result<Bytes>> {
    async_stream::try_stream! {
        let mut chunks = ReaderStream::with_capacity(file, CHUNK_SIZE);
        let mut pending: Option<Bytes> = None;

        while let Some(chunk) = chunks.next().await {
            if let Some(previous) = pending.replace(chunk?) {
                yield previous;
            }
        }
        drop(chunks);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::info!("Delivered and removed {:?}", path),
            Err(e) => tracing::warn!("Failed to remove delivered file {:?}: {}", path, e),
        }

        if let Some(last) = pending {
            yield last;
        }
    }
}
