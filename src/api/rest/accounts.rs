use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::account::{Account, AccountRole};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/:id", get(get_account))
}

#[derive(Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    pub role: AccountRole,
}

async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<Json<Account>, AppError> {
    let account = state.engine.create_account(payload.name, payload.role)?;
    Ok(Json(account))
}

async fn list_accounts(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Account>>, AppError> {
    Ok(Json(state.store.accounts()?))
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Account>, AppError> {
    let account = state
        .store
        .account(id)?
        .ok_or_else(|| AppError::NotFound(format!("account {id} not found")))?;

    Ok(Json(account))
}
