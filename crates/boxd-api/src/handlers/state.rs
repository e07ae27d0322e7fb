//! Container state handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value;

use boxd_container::Action;

use crate::daemon::AppState;
use crate::error::{ApiError, Result};
use crate::ops::sync_response;

/// `GET /containers/{name}/state` — the status subobject.
pub async fn get_state(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    let handle = state.daemon.materializer.materialize(&name)?;
    let status = serde_json::to_value(handle.render_status())
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(sync_response(status))
}

/// Body of `PUT /containers/{name}/state`.
#[derive(Debug, Deserialize)]
pub struct StateRequest {
    /// Lifecycle action to perform.
    pub action: String,
    /// Stop timeout in seconds; -1 (the default) means no timeout.
    #[serde(default = "default_timeout")]
    pub timeout: i64,
    /// Force an immediate stop.
    #[serde(default)]
    pub force: bool,
}

fn default_timeout() -> i64 {
    -1
}

/// `PUT /containers/{name}/state` — perform a lifecycle action
/// asynchronously.
pub async fn put_state(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<StateRequest>,
) -> Result<Response> {
    let action: Action = req.action.parse()?;
    let handle = state.daemon.materializer.materialize(&name)?;

    let body = async move {
        handle.perform(action, req.timeout, req.force).await?;
        Ok(Value::Null)
    };

    let op = state.daemon.operations.spawn(vec![name], None, body);
    Ok(state.daemon.operations.async_response(op))
}
