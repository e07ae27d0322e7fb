//! Snapshot handlers.
//!
//! A snapshot is `parent/leaf` in the store and
//! `<var>/lxc/<parent>/snapshots/<leaf>/` on disk, holding a rootfs copy and
//! optionally a checkpoint under `state/`.

use std::os::unix::fs::DirBuilderExt;
use std::path::Path as FsPath;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value, json};

use boxd_container::SnapshotName;
use boxd_store::ContainerKind;

use crate::daemon::AppState;
use crate::error::{ApiError, Result};
use crate::ops::{API_VERSION, sync_response};

/// `GET /containers/{name}/snapshots` — list snapshot URLs.
pub async fn list_snapshots(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    state.daemon.store.container_id_by_name(&name)?;
    let snapshots = state.daemon.store.snapshots_of(&name)?;
    let urls: Vec<String> = snapshots
        .iter()
        .map(|(leaf, _)| format!("/{API_VERSION}/containers/{name}/snapshots/{leaf}"))
        .collect();
    Ok(sync_response(json!(urls)))
}

/// Body of `POST /containers/{name}/snapshots`.
#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    /// Leaf name; `snap<n>` is generated when absent.
    pub name: Option<String>,
    /// Capture process state via checkpoint.
    #[serde(default)]
    pub stateful: bool,
}

/// `POST /containers/{name}/snapshots` — create a snapshot.
pub async fn create_snapshot(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SnapshotRequest>,
) -> Result<Response> {
    let daemon = &state.daemon;
    let handle = daemon.materializer.materialize(&name)?;

    let leaf = match req.name {
        Some(leaf) if !leaf.is_empty() => leaf,
        _ => format!("snap{}", daemon.store.next_snapshot_index(&name)?),
    };
    // Snapshots of snapshots are not supported: exactly one separator.
    let full_name = SnapshotName::parse(&format!("{name}/{leaf}"))?.full();

    let snap_dir = daemon.layout().snapshot_dir(&name, &leaf);
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(&snap_dir)?;

    let state_dir = daemon.layout().snapshot_state_dir(&name, &leaf);
    let parent_rootfs = daemon.layout().rootfs_dir(&name);
    let snap_rootfs = daemon.layout().snapshot_rootfs_dir(&name, &leaf);
    let store = daemon.store.clone();
    let container = name.clone();

    let body = async move {
        if state_dir.exists() {
            return Err(ApiError::Internal("snapshot directory exists".to_string()));
        }

        // state/ exists iff the snapshot captured process state; describe
        // reports statefulness from its presence.
        if req.stateful {
            if !handle.running() {
                return Err(ApiError::BadRequest(format!(
                    "container {container} is not running"
                )));
            }
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&state_dir)?;
            handle.checkpoint(&state_dir, true, true).await?;
        }

        store.create_container(&full_name, ContainerKind::Snapshot, &handle.config)?;

        copy_rootfs(&parent_rootfs, &snap_rootfs).await?;
        Ok(Value::Null)
    };

    let op = daemon.operations.spawn(vec![name], None, body);
    Ok(daemon.operations.async_response(op))
}

/// Mirrors the parent rootfs into the snapshot, preserving device nodes.
async fn copy_rootfs(src: &FsPath, dst: &FsPath) -> Result<()> {
    let mut source = src.display().to_string();
    if !source.ends_with('/') {
        source.push('/');
    }

    let output = tokio::process::Command::new("rsync")
        .arg("-a")
        .arg("--devices")
        .arg(&source)
        .arg(dst)
        .output()
        .await?;
    if !output.status.success() {
        return Err(ApiError::Internal(format!(
            "rsync of {source}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

fn snapshot_dir_or_404(state: &AppState, name: &str, leaf: &str) -> Result<std::path::PathBuf> {
    let dir = state.daemon.layout().snapshot_dir(name, leaf);
    if !dir.exists() {
        return Err(ApiError::NotFound(format!("snapshot {name}/{leaf}")));
    }
    Ok(dir)
}

/// `GET /containers/{name}/snapshots/{leaf}` — describe a snapshot.
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path((name, leaf)): Path<(String, String)>,
) -> Result<Response> {
    snapshot_dir_or_404(&state, &name, &leaf)?;
    let stateful = state
        .daemon
        .layout()
        .snapshot_state_dir(&name, &leaf)
        .exists();
    Ok(sync_response(json!({"name": leaf, "stateful": stateful})))
}

/// Body of `POST /containers/{name}/snapshots/{leaf}`.
#[derive(Debug, Deserialize)]
pub struct SnapshotRenameRequest {
    /// New leaf name.
    pub name: String,
}

/// `POST /containers/{name}/snapshots/{leaf}` — rename a snapshot.
pub async fn rename_snapshot(
    State(state): State<AppState>,
    Path((name, leaf)): Path<(String, String)>,
    Json(req): Json<SnapshotRenameRequest>,
) -> Result<Response> {
    let old_dir = snapshot_dir_or_404(&state, &name, &leaf)?;
    SnapshotName::parse(&format!("{name}/{}", req.name))?;
    let new_dir = state.daemon.layout().snapshot_dir(&name, &req.name);
    if new_dir.exists() {
        return Err(ApiError::Conflict(format!(
            "snapshot {name}/{} exists",
            req.name
        )));
    }

    let store = state.daemon.store.clone();
    let container = name.clone();
    let body = async move {
        tokio::fs::rename(&old_dir, &new_dir).await?;
        store.rename_snapshot(&container, &leaf, &req.name)?;
        Ok(Value::Null)
    };

    let op = state.daemon.operations.spawn(vec![name], None, body);
    Ok(state.daemon.operations.async_response(op))
}

/// `DELETE /containers/{name}/snapshots/{leaf}` — delete a snapshot.
pub async fn delete_snapshot(
    State(state): State<AppState>,
    Path((name, leaf)): Path<(String, String)>,
) -> Result<Response> {
    let dir = snapshot_dir_or_404(&state, &name, &leaf)?;
    state.daemon.store.delete_snapshot(&name, &leaf)?;

    let body = async move {
        tokio::fs::remove_dir_all(&dir).await?;
        Ok(Value::Null)
    };

    let op = state.daemon.operations.spawn(vec![name], None, body);
    Ok(state.daemon.operations.async_response(op))
}
