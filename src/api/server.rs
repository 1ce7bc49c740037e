use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::services;
use super::state::AppState;
use super::stream;
use crate::channel::UnconfiguredConnector;
use crate::config::Config;
use crate::extract::YtDlpExtractor;
use crate::notify::TracingSink;
use crate::store::RecordStore;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build the full route table for an [`AppState`]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(services::create_job))
        .route("/jobs/active", get(services::active_jobs))
        .route("/jobs/status", post(services::bulk_status))
        .route("/jobs/start-batch", post(services::start_batch))
        .route("/jobs/convert", post(services::convert_batch))
        .route("/jobs/repair-audio", post(services::repair_audio_batch))
        .route(
            "/jobs/{job_id}",
            get(services::get_job).delete(services::delete_job),
        )
        .route("/jobs/{job_id}/probe", post(services::probe_job))
        .route("/jobs/{job_id}/start", post(services::start_job))
        .route("/jobs/{job_id}/cancel", post(services::cancel_job))
        .route("/jobs/{job_id}/reset", post(services::reset_job))
        .route("/jobs/{job_id}/retry", post(services::retry_job))
        .route("/stream/{job_id}", get(stream::stream_job))
        .route("/media", post(services::upload_media))
        .route("/channels", post(services::create_scan))
        .route("/channels/{scan_id}", get(services::scan_status))
        .route("/channels/{scan_id}/scan", post(services::run_scan))
        .route("/channels/{scan_id}/items", get(services::scan_items))
        .route("/channels/{scan_id}/download-all", post(services::download_all))
        .route("/dashboard", get(services::dashboard))
        .route("/maintenance/reclaim", post(services::reclaim))
        .route("/health", get(services::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(address: SocketAddr) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;

    info!(path = %config.server.store_path.display(), "Opening record store");
    let store = RecordStore::open(&config.server.store_path)
        .map_err(|e| format!("Failed to open record store: {}", e))?;

    let extractor = Arc::new(YtDlpExtractor::new(config.extractor.clone()));
    let state = AppState::new(
        config,
        store,
        extractor,
        Arc::new(UnconfiguredConnector),
        Arc::new(TracingSink::new()),
    );
    let engine = state.engine.clone();
    let store = state.store.clone();

    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "Mediabox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain in-flight downloads/transcodes, then flush the store
    info!("Draining in-flight work");
    engine.shutdown().await;
    store.persist()?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
