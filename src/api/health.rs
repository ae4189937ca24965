//! Health check endpoints

use std::collections::BTreeMap;

use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub ready: bool,
    pub database: bool,
    /// Open subscriptions per channel
    pub subscribers: BTreeMap<String, usize>,
    pub live_queries: usize,
}

/// Health check - always returns OK if the server is running
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - verifies the store and reports real-time load
async fn readyz(State(state): State<AppState>) -> Json<ReadyResponse> {
    let db_ok = sqlx::query("SELECT 1")
        .fetch_one(state.db.pool())
        .await
        .is_ok();

    let subscribers = state
        .hub
        .channel_names()
        .into_iter()
        .map(|name| {
            let count = state.hub.subscriber_count(&name);
            (name, count)
        })
        .collect();

    Json(ReadyResponse {
        ready: db_ok,
        database: db_ok,
        subscribers,
        live_queries: state.live_queries.registration_count(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
