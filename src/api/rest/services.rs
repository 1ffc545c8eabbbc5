use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::service::{GeoPoint, Location, Service, ServiceStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/services", post(create_request).get(list_services))
        .route("/services/:id", get(get_service))
        .route("/services/:id/propose", post(propose_service))
        .route("/services/:id/accept", post(accept_proposal))
        .route("/services/:id/reject", post(reject_proposal))
        .route("/services/:id/start", post(start_service))
        .route("/services/:id/complete/driver", post(driver_complete))
        .route("/services/:id/complete/client", post(client_complete))
        .route("/services/:id/cancel", post(cancel_service))
        .route("/services/:id/expire", post(expire_service))
}

#[derive(Deserialize)]
pub struct CreateServiceRequest {
    pub client_id: Uuid,
    pub origin: Location,
    pub destination: Location,
}

#[derive(Deserialize)]
pub struct ProposeRequest {
    pub driver_id: Uuid,
    pub driver_location: GeoPoint,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct ClientCompleteRequest {
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct ListServicesQuery {
    /// Comma-separated status filter, e.g. `status=pending,negotiating`.
    pub status: Option<String>,
    /// Trip history for one account instead of a status filter.
    pub party: Option<Uuid>,
    pub role: Option<String>,
}

async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateServiceRequest>,
) -> Result<Json<Service>, AppError> {
    let service =
        state
            .engine
            .create_request(payload.client_id, payload.origin, payload.destination)?;
    Ok(Json(service))
}

async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Service>, AppError> {
    let service = state
        .store
        .service(id)?
        .ok_or_else(|| AppError::NotFound(format!("service {id} not found")))?;

    Ok(Json(service))
}

async fn list_services(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListServicesQuery>,
) -> Result<Json<Vec<Service>>, AppError> {
    if let Some(party) = query.party {
        let as_driver = match query.role.as_deref() {
            Some("driver") => true,
            Some("client") | None => false,
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "unknown role: {other}, expected client or driver"
                )))
            }
        };
        return Ok(Json(state.store.services_for_party(party, as_driver)?));
    }

    let statuses = match query.status.as_deref() {
        Some(raw) => parse_statuses(raw)?,
        None => vec![ServiceStatus::Pending, ServiceStatus::Negotiating],
    };

    Ok(Json(state.store.services_by_status(&statuses)?))
}

async fn propose_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProposeRequest>,
) -> Result<Json<Service>, AppError> {
    let service = state
        .engine
        .propose_service(id, payload.driver_id, payload.driver_location)?;
    Ok(Json(service))
}

async fn accept_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Service>, AppError> {
    Ok(Json(state.engine.accept_proposal(id)?))
}

async fn reject_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<Service>, AppError> {
    Ok(Json(state.engine.reject_proposal(id, payload.driver_id)?))
}

async fn start_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Service>, AppError> {
    Ok(Json(state.engine.start_service(id)?))
}

async fn driver_complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Service>, AppError> {
    Ok(Json(state.engine.driver_complete_service(id)?))
}

async fn client_complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClientCompleteRequest>,
) -> Result<Json<Service>, AppError> {
    let service = state
        .engine
        .client_complete_service(id, payload.rating, payload.comment)?;
    Ok(Json(service))
}

async fn cancel_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Service>, AppError> {
    Ok(Json(state.engine.cancel_service(id)?))
}

async fn expire_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state.engine.expire_service(id)?;
    Ok(Json(json!({ "expired": true })))
}

fn parse_statuses(raw: &str) -> Result<Vec<ServiceStatus>, AppError> {
    raw.split(',')
        .map(|s| match s.trim() {
            "pending" => Ok(ServiceStatus::Pending),
            "negotiating" => Ok(ServiceStatus::Negotiating),
            "accepted" => Ok(ServiceStatus::Accepted),
            "in_progress" => Ok(ServiceStatus::InProgress),
            "completed" => Ok(ServiceStatus::Completed),
            "cancelled" => Ok(ServiceStatus::Cancelled),
            "expired" => Ok(ServiceStatus::Expired),
            other => Err(AppError::Validation(format!("unknown status: {other}"))),
        })
        .collect()
}
