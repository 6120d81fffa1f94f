use crate::config::Config;
use crate::fetcher::Fetcher;
use crate::storage::{spawn_sweeper, Storage};
use crate::tools::{ToolRegistry, FFMPEG, YTDLP};
use crate::transcoder::Transcoder;
use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod request_id;
pub mod routes_convert;
pub mod routes_download;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    /// Working directory for downloads and outputs
    pub storage: Storage,
    pub fetcher: Arc<Fetcher>,
    pub transcoder: Arc<Transcoder>,
}

impl AppContext {
    /// Build the context, creating the working directory if needed.
    pub fn new(config: &Config, tools: &ToolRegistry) -> crate::Result<Self> {
        let storage = Storage::open(&config.storage.work_dir)?;
        let fetcher = Fetcher::new(tools.path_or_name(YTDLP), config.tools.download_timeout());
        let transcoder =
            Transcoder::new(tools.path_or_name(FFMPEG), config.tools.transcode_timeout());

        Ok(Self {
            storage,
            fetcher: Arc::new(fetcher),
            transcoder: Arc::new(transcoder),
        })
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/convert", post(routes_convert::convert))
        .route("/download/:filename", get(routes_download::download))
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    "ok"
}

/// Start the HTTP server and the orphan sweeper; returns after shutdown.
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let tools = ToolRegistry::discover(&config.tools);
    for info in tools.check_all().await {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}; conversions will fail until it is installed", info.name);
        }
    }

    let ctx = AppContext::new(&config, &tools).context("Failed to prepare working directory")?;
    tracing::info!("Working directory: {:?}", ctx.storage.root());

    let cancel = CancellationToken::new();
    let sweeper = config.storage.orphan_max_age().map(|max_age| {
        tracing::info!(
            "Sweeping files older than {}s every {}s",
            max_age.as_secs(),
            config.storage.sweep_interval().as_secs()
        );
        spawn_sweeper(
            ctx.storage.clone(),
            config.storage.sweep_interval(),
            max_age,
            cancel.clone(),
        )
    });

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
