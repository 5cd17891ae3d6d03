//! HTTP query surface
//!
//! | Route      | Body                                  |
//! |------------|---------------------------------------|
//! | `/`        | meter page, polls `/data`             |
//! | `/grafica` | history chart page, polls `/history`  |
//! | `/data`    | current measurement as JSON           |
//! | `/history` | up to 60 `{time, val}` points as JSON |
//!
//! Store calls may block (manager socket round-trip), so handlers run them on
//! the blocking pool.

use std::future::Future;
use std::io;
use std::sync::Arc;

use alco_core::query::{CurrentRecord, HistoryRecord, QuerySurface};
use alco_core::store::{MeasurementStore, StoreError};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use log::{info, warn};
use tokio::net::TcpListener;

const INDEX_HTML: &str = include_str!("../assets/index.html");
const CHART_HTML: &str = include_str!("../assets/grafica.html");

/// Store handle the query surface reads through, whatever the strategy
pub type DynStore = Arc<dyn MeasurementStore + Send + Sync>;

type Surface = Arc<QuerySurface<DynStore>>;
type ApiError = (StatusCode, String);

pub fn router(store: DynStore) -> Router {
    let surface: Surface = Arc::new(QuerySurface::new(store));
    Router::new()
        .route("/", get(index_handler))
        .route("/grafica", get(chart_handler))
        .route("/data", get(data_handler))
        .route("/history", get(history_handler))
        .with_state(surface)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn chart_handler() -> Html<&'static str> {
    Html(CHART_HTML)
}

fn store_error(e: StoreError) -> ApiError {
    warn!("Query failed: {}", e);
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

async fn data_handler(State(surface): State<Surface>) -> Result<Json<CurrentRecord>, ApiError> {
    tokio::task::spawn_blocking(move || surface.get_current())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map(Json)
        .map_err(store_error)
}

async fn history_handler(
    State(surface): State<Surface>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    tokio::task::spawn_blocking(move || surface.get_history())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map(Json)
        .map_err(store_error)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, store: DynStore, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Query surface listening on http://{}", addr);
    }
    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Query surface stopped");
    Ok(())
}

/// Resolves on Ctrl-C. A failed signal registration resolves immediately.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {}", e);
    }
}
