use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{
    error::AppError,
    models::{AppState, ArcEdge, GlobalStats, HistogramEntry, Marker, NodeDetail},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(get_stats))
        .route("/api/stats/node/:host", get(get_node))
        .route("/api/stats/arcs/:host", get(get_arcs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Full snapshot view; arcs and per-node detail are only reachable
/// through the keyed endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsOverview {
    markers: Vec<Marker>,
    region_histogram: Vec<HistogramEntry>,
    country_histogram: Vec<HistogramEntry>,
    global: GlobalStats,
}

async fn get_stats(State(state): State<AppState>) -> Json<StatsOverview> {
    let snapshot = state.snapshot.read().clone();
    Json(StatsOverview {
        markers: snapshot.markers.clone(),
        region_histogram: snapshot.region_histogram.clone(),
        country_histogram: snapshot.country_histogram.clone(),
        global: snapshot.global,
    })
}

/// Get a single node's raw merged state by host
async fn get_node(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> Result<Json<NodeDetail>, AppError> {
    let snapshot = state.snapshot.read().clone();
    snapshot
        .nodes
        .get(&host)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no tracked node for host {}", host)))
}

/// Get a single host's arc list
async fn get_arcs(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> Result<Json<Vec<ArcEdge>>, AppError> {
    let snapshot = state.snapshot.read().clone();
    snapshot
        .arcs
        .get(&host)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no arcs recorded for host {}", host)))
}
