use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::service::ServiceStatus;
use crate::notify::{Notification, Perspective, ServiceWatcher};
use crate::state::AppState;
use crate::store::StoreEvent;

/// One WebSocket connection carries exactly one subscription, selected by
/// query parameters: a single service (optionally with a role for
/// notifications), a status-filtered list, or a single account.
#[derive(Deserialize)]
pub struct WsQuery {
    pub service_id: Option<Uuid>,
    pub role: Option<Perspective>,
    pub statuses: Option<String>,
    pub account_id: Option<Uuid>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, query: WsQuery) {
    let (sender, mut receiver) = socket.split();

    info!("subscription client connected");
    state.metrics.subscriptions_active.inc();

    let send_state = state.clone();
    let send_task = tokio::spawn(async move {
        let result = if let Some(service_id) = query.service_id {
            stream_service(sender, send_state, service_id, query.role).await
        } else if let Some(account_id) = query.account_id {
            stream_account(sender, send_state, account_id).await
        } else {
            let statuses = parse_statuses(query.statuses.as_deref());
            stream_service_lists(sender, send_state, statuses).await
        };

        if let Err(err) = result {
            warn!(error = %err, "subscription stream ended with error");
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.metrics.subscriptions_active.dec();
    info!("subscription client disconnected");
}

type WsSender = SplitSink<WebSocket, Message>;

async fn send_json(sender: &mut WsSender, value: serde_json::Value) -> Result<(), String> {
    let text = value.to_string();
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|err| format!("socket send failed: {err}"))
}

async fn send_notifications(
    sender: &mut WsSender,
    notifications: Vec<Notification>,
) -> Result<(), String> {
    for notification in notifications {
        send_json(sender, json!({ "type": "notification", "data": notification })).await?;
    }
    Ok(())
}

/// Full current record on every committed change to one service, plus the
/// relay's typed events when the subscriber declared a role.
async fn stream_service(
    mut sender: WsSender,
    state: Arc<AppState>,
    service_id: Uuid,
    role: Option<Perspective>,
) -> Result<(), String> {
    let mut rx = state.store.subscribe();
    let mut watcher = role.map(ServiceWatcher::new);

    if let Ok(Some(service)) = state.store.service(service_id) {
        send_json(&mut sender, json!({ "type": "service", "data": service })).await?;
        if let Some(watcher) = watcher.as_mut() {
            send_notifications(&mut sender, watcher.observe(&service)).await?;
        }
    }

    loop {
        match rx.recv().await {
            Ok(StoreEvent::ServiceUpserted(service)) if service.id == service_id => {
                send_json(&mut sender, json!({ "type": "service", "data": service })).await?;
                if let Some(watcher) = watcher.as_mut() {
                    send_notifications(&mut sender, watcher.observe(&service)).await?;
                }
            }
            Ok(StoreEvent::ServiceDeleted(id)) if id == service_id => {
                send_json(&mut sender, json!({ "type": "deleted", "id": id })).await?;
                if let Some(watcher) = watcher.as_mut() {
                    if let Some(notification) = watcher.observe_deleted(id) {
                        send_notifications(&mut sender, vec![notification]).await?;
                    }
                }
            }
            Ok(_) => {}
            // Missed events are fine; the next matching change carries the
            // full record again.
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "subscription lagged behind the change feed");
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

/// Re-sends the filtered list on every service change, the way the driver's
/// available-requests screen watches pending and negotiating services.
async fn stream_service_lists(
    mut sender: WsSender,
    state: Arc<AppState>,
    statuses: Vec<ServiceStatus>,
) -> Result<(), String> {
    let mut rx = state.store.subscribe();

    let list = state
        .store
        .services_by_status(&statuses)
        .map_err(|err| err.to_string())?;
    send_json(&mut sender, json!({ "type": "services", "data": list })).await?;

    loop {
        match rx.recv().await {
            Ok(StoreEvent::ServiceUpserted(_)) | Ok(StoreEvent::ServiceDeleted(_)) => {
                let list = state
                    .store
                    .services_by_status(&statuses)
                    .map_err(|err| err.to_string())?;
                send_json(&mut sender, json!({ "type": "services", "data": list })).await?;
            }
            Ok(StoreEvent::AccountUpserted(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "subscription lagged behind the change feed");
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

async fn stream_account(
    mut sender: WsSender,
    state: Arc<AppState>,
    account_id: Uuid,
) -> Result<(), String> {
    let mut rx = state.store.subscribe();

    if let Ok(Some(account)) = state.store.account(account_id) {
        send_json(&mut sender, json!({ "type": "account", "data": account })).await?;
    }

    loop {
        match rx.recv().await {
            Ok(StoreEvent::AccountUpserted(account)) if account.id == account_id => {
                send_json(&mut sender, json!({ "type": "account", "data": account })).await?;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "subscription lagged behind the change feed");
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

fn parse_statuses(raw: Option<&str>) -> Vec<ServiceStatus> {
    let Some(raw) = raw else {
        return vec![ServiceStatus::Pending, ServiceStatus::Negotiating];
    };

    let statuses: Vec<ServiceStatus> = raw
        .split(',')
        .filter_map(|s| match s.trim() {
            "pending" => Some(ServiceStatus::Pending),
            "negotiating" => Some(ServiceStatus::Negotiating),
            "accepted" => Some(ServiceStatus::Accepted),
            "in_progress" => Some(ServiceStatus::InProgress),
            "completed" => Some(ServiceStatus::Completed),
            "cancelled" => Some(ServiceStatus::Cancelled),
            "expired" => Some(ServiceStatus::Expired),
            _ => None,
        })
        .collect();

    if statuses.is_empty() {
        vec![ServiceStatus::Pending, ServiceStatus::Negotiating]
    } else {
        statuses
    }
}
