//! Operation polling and websocket side channels.

use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use serde::Deserialize;
use uuid::Uuid;

use crate::daemon::AppState;
use crate::error::{ApiError, Result};
use crate::ops::sync_response;

fn parse_operation_id(id: &str) -> Result<Uuid> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("bad operation id {id}")))
}

/// `GET /operations/{id}` — poll an operation.
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let id = parse_operation_id(&id)?;
    let operation = state
        .daemon
        .operations
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("operation {id}")))?;
    let rendered = operation.lock().render();
    Ok(sync_response(rendered))
}

/// Query parameters of the websocket side endpoint.
#[derive(Debug, Deserialize)]
pub struct WebsocketQuery {
    /// Per-slot secret published in the operation metadata.
    pub secret: String,
}

/// `GET /operations/{id}/websocket?secret=` — redeem a slot secret and bind
/// the upgraded socket to it. A wrong secret is an auth failure, not a
/// missing resource: the operation exists.
pub async fn operation_websocket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WebsocketQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response> {
    let id = parse_operation_id(&id)?;
    let operation = state
        .daemon
        .operations
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("operation {id}")))?;

    let channels = operation
        .lock()
        .websockets
        .clone()
        .ok_or_else(|| ApiError::BadRequest(format!("operation {id} has no websockets")))?;

    let slot = channels
        .slot_for_secret(&query.secret)
        .ok_or_else(|| ApiError::Forbidden("bad websocket secret".to_string()))?;

    Ok(upgrade.on_upgrade(move |socket| async move {
        channels.bind(slot, socket).await;
    }))
}
