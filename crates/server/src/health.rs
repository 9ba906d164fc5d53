//! Health and match-status handlers
//!
//! Read-only views over the registry for operators:
//!
//! - `GET /health` - liveness plus lifecycle counts
//! - `GET /matches` - every tracked match, sorted by address
//! - `GET /matches/:address` - one tracked match, 404 if unknown

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use common::MatchAddress;
use registry::{Match, MatchRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

/// Shared state for the status handlers
#[derive(Clone)]
pub struct StatusState {
    pub service_name: String,
    pub start_time: Instant,
    pub registry: Arc<MatchRegistry>,
}

impl StatusState {
    pub fn new(service_name: impl Into<String>, registry: Arc<MatchRegistry>) -> Self {
        Self {
            service_name: service_name.into(),
            start_time: Instant::now(),
            registry,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<StatusState>>) -> Json<Value> {
    let counts = state.registry.counts();

    Json(json!({
        "status": "ok",
        "service": state.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "matches": counts,
        "tracked": counts.total(),
    }))
}

pub async fn list_matches_handler(State(state): State<Arc<StatusState>>) -> Json<Vec<Match>> {
    Json(state.registry.snapshot_all())
}

pub async fn get_match_handler(
    State(state): State<Arc<StatusState>>,
    Path(raw): Path<String>,
) -> Result<Json<Match>, (StatusCode, Json<Value>)> {
    let address = MatchAddress::parse(&raw).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
    })?;

    state.registry.get(&address).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("match {address} is not tracked") })),
        )
    })
}

/// Create the status router
pub fn status_routes(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/matches", get(list_matches_handler))
        .route("/matches/:address", get(get_match_handler))
        .with_state(state)
}
