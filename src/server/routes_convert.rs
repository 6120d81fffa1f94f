//! `POST /convert`: download a source video and encode it to WebM.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::AppError;
use super::AppContext;
use crate::error::{Error, Result};
use crate::storage::WorkItem;
use crate::transcoder::QualityOptions;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConvertRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub quality: Option<QualityOptions>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConvertResponse {
    pub download_url: String,
}

pub async fn convert(
    State(ctx): State<AppContext>,
    payload: std::result::Result<Json<ConvertRequest>, JsonRejection>,
) -> std::result::Result<Json<ConvertResponse>, AppError> {
    let Json(request) = payload.map_err(|e| Error::Validation(e.body_text()))?;

    let url = request
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::Validation("URL is required".to_string()))?;
    let quality = request.quality.unwrap_or_default();

    let download_url = run_conversion(&ctx, url, &quality).await?;
    Ok(Json(ConvertResponse { download_url }))
}

/// Fetch, then transcode, in one pass with no retries.
///
/// The [`WorkItem`] is released on every return from this function, which
/// removes the intermediate download whether or not the conversion
/// succeeded. If the future is dropped instead (client disconnect), the
/// running tool is killed and the item's `Drop` does the same cleanup.
pub async fn run_conversion(ctx: &AppContext, url: &str, quality: &QualityOptions) -> Result<String> {
    let mut item = ctx.storage.new_work_item();
    tracing::info!(work_item = %item.id(), "Converting {}", url);

    let result = fetch_and_transcode(ctx, &mut item, url, quality).await;
    item.release().await;
    result
}

async fn fetch_and_transcode(
    ctx: &AppContext,
    item: &mut WorkItem,
    url: &str,
    quality: &QualityOptions,
) -> Result<String> {
    let fetched = ctx.fetcher.fetch(url, item.download_prefix()).await?;
    tracing::debug!(
        work_item = %item.id(),
        "Fetched source at {:?} ({:?})",
        fetched.path,
        fetched.resolved_by
    );

    ctx.transcoder
        .transcode(&fetched.path, quality, item.output_path())
        .await?;

    item.keep_output();
    let download_url = item.download_url();
    tracing::info!(work_item = %item.id(), "Conversion ready at {}", download_url);
    Ok(download_url)
}
