pub mod accounts;
pub mod services;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::models::service::ServiceStatus;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(accounts::router())
        .merge(services::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    accounts: usize,
    open_services: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let accounts = state.store.accounts().map(|a| a.len()).unwrap_or(0);
    let open_services = state
        .store
        .services_by_status(&[
            ServiceStatus::Pending,
            ServiceStatus::Negotiating,
            ServiceStatus::Accepted,
            ServiceStatus::InProgress,
        ])
        .map(|s| s.len())
        .unwrap_or(0);

    Json(HealthResponse {
        status: "ok",
        accounts,
        open_services,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
