//! Container collection and item handlers.

use std::collections::{BTreeMap, HashMap};
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value, json};

use boxd_migration::{CHANNELS, MigrationSink, run_source, tls_connector};
use boxd_store::{ContainerKind, Devices};

use crate::daemon::{AppState, Daemon};
use crate::error::{ApiError, Result};
use crate::ops::{API_VERSION, WsChannels, sync_response};

/// Creation request body.
#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    /// Container name; generated when absent.
    pub name: Option<String>,
    /// Creation source.
    pub source: CreateSource,
    /// Initial config map.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Creation source: image, none, or migration.
#[derive(Debug, Deserialize)]
pub struct CreateSource {
    /// One of `image`, `none`, `migration`.
    #[serde(rename = "type")]
    pub source_type: String,
    /// Image alias, for `image` sources.
    pub alias: Option<String>,
    /// Image fingerprint, for `image` sources.
    pub fingerprint: Option<String>,
    /// Transfer mode, for `migration` sources; only `pull` is accepted.
    pub mode: Option<String>,
    /// Source operation URL, for `migration` sources.
    pub operation: Option<String>,
    /// Channel secrets, for `migration` sources.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// `GET /containers` — list container URLs.
pub async fn list_containers(State(state): State<AppState>) -> Result<Response> {
    let names = state.daemon.store.list_containers(ContainerKind::Regular)?;
    let urls: Vec<String> = names
        .iter()
        .map(|name| format!("/{API_VERSION}/containers/{name}"))
        .collect();
    Ok(sync_response(json!(urls)))
}

/// `POST /containers` — create a container from one of the three sources.
pub async fn create_container(
    State(state): State<AppState>,
    Json(req): Json<CreateRequest>,
) -> Result<Response> {
    let daemon = &state.daemon;
    if daemon.config.id_map.is_none() {
        return Err(ApiError::BadRequest(
            "daemon has no subuid allocation".to_string(),
        ));
    }

    let name = req.name.clone().unwrap_or_else(|| {
        let generated = format!(
            "container_{}",
            &uuid::Uuid::new_v4().to_string().replace('-', "")[..12]
        );
        tracing::debug!(container = %generated, "no name provided");
        generated
    });
    if name.contains('/') {
        return Err(ApiError::BadRequest(format!("invalid container name {name}")));
    }

    match req.source.source_type.as_str() {
        "image" => create_from_image(daemon, name, req).await,
        "none" => create_from_none(daemon, name, req),
        "migration" => create_from_migration(daemon, name, req),
        other => Err(ApiError::BadRequest(format!("unknown source type {other}"))),
    }
}

async fn create_from_image(
    daemon: &Arc<Daemon>,
    name: String,
    req: CreateRequest,
) -> Result<Response> {
    let uuid = boxd_image::resolve_image(
        &daemon.store,
        req.source.alias.as_deref(),
        req.source.fingerprint.as_deref(),
    )?;

    let container_dir = daemon.layout().container_dir(&name);
    if container_dir.exists() {
        return Err(ApiError::Conflict(format!("container {name} exists")));
    }

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(daemon.layout().rootfs_dir(&name))
        .map_err(|_| ApiError::Internal("error creating rootfs directory".to_string()))?;

    if let Err(err) = daemon
        .store
        .create_container(&name, ContainerKind::Regular, &req.config)
    {
        let _ = std::fs::remove_dir_all(&container_dir);
        return Err(err.into());
    }

    let id_map = daemon
        .config
        .id_map
        .ok_or_else(|| ApiError::BadRequest("daemon has no subuid allocation".to_string()))?;
    let image_path = daemon.layout().image_path(&uuid);
    let body_daemon = daemon.clone();
    let body_name = name.clone();

    let body = async move {
        let result = boxd_image::populate_rootfs(
            &image_path,
            &container_dir,
            id_map.uid_min,
            id_map.gid_min,
        )
        .await;
        if let Err(err) = result {
            remove_container(&body_daemon, &body_name).await;
            return Err(err.into());
        }
        Ok(Value::Null)
    };

    let id = daemon.operations.spawn(vec![name], None, body);
    Ok(daemon.operations.async_response(id))
}

fn create_from_none(daemon: &Arc<Daemon>, name: String, req: CreateRequest) -> Result<Response> {
    daemon
        .store
        .create_container(&name, ContainerKind::Regular, &req.config)?;

    // The rootfs is expected to be pre-provisioned by the caller.
    let id = daemon
        .operations
        .spawn(vec![name], None, async { Ok(Value::Null) });
    Ok(daemon.operations.async_response(id))
}

fn create_from_migration(
    daemon: &Arc<Daemon>,
    name: String,
    req: CreateRequest,
) -> Result<Response> {
    if req.source.mode.as_deref() != Some("pull") {
        return Err(ApiError::NotImplemented(
            "only pull mode migration is supported".to_string(),
        ));
    }
    let operation = req
        .source
        .operation
        .clone()
        .ok_or_else(|| ApiError::BadRequest("missing source operation URL".to_string()))?;

    daemon
        .store
        .create_container(&name, ContainerKind::Regular, &req.config)?;

    // Validate the record materializes before committing to the transfer.
    if let Err(err) = daemon.materializer.materialize(&name) {
        daemon.store.delete_container(&name).ok();
        return Err(err.into());
    }

    let connector = match tls_connector(&daemon.config.cert_path, &daemon.config.key_path) {
        Ok(connector) => connector,
        Err(err) => {
            daemon.store.delete_container(&name).ok();
            return Err(err.into());
        }
    };

    let sink = match MigrationSink::new(operation, req.source.secrets, connector) {
        Ok(sink) => sink,
        Err(err) => {
            daemon.store.delete_container(&name).ok();
            return Err(err.into());
        }
    };

    let container_dir = daemon.layout().container_dir(&name);
    let body_daemon = daemon.clone();
    let body_name = name.clone();
    let body = async move {
        if let Err(err) = sink.run(&container_dir).await {
            remove_container(&body_daemon, &body_name).await;
            return Err(err.into());
        }
        Ok(Value::Null)
    };

    let id = daemon.operations.spawn(vec![name], None, body);
    Ok(daemon.operations.async_response(id))
}

/// `GET /containers/{name}` — rendered container state.
pub async fn get_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    let handle = state.daemon.materializer.materialize(&name)?;
    let rendered = serde_json::to_value(handle.render_state())
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(sync_response(rendered))
}

/// Replace request body for `PUT /containers/{name}`.
#[derive(Debug, Deserialize)]
pub struct PutRequest {
    /// New profile bindings, in apply order.
    #[serde(default)]
    pub profiles: Vec<String>,
    /// New config map.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// New device map.
    #[serde(default)]
    pub devices: Devices,
    /// Reserved snapshot-restore field.
    pub restore: Option<String>,
}

/// `PUT /containers/{name}` — replace config, profiles and devices
/// atomically.
pub async fn update_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PutRequest>,
) -> Result<Response> {
    if req.restore.is_some() {
        return Err(ApiError::NotImplemented(
            "snapshot restore is not implemented".to_string(),
        ));
    }

    let id = state.daemon.store.container_id_by_name(&name)?;
    let store = state.daemon.store.clone();
    let body = async move {
        store.replace_container_config(id, &req.config, &req.profiles, &req.devices)?;
        Ok(Value::Null)
    };

    let op = state.daemon.operations.spawn(vec![name], None, body);
    Ok(state.daemon.operations.async_response(op))
}

/// Body of `POST /containers/{name}`: rename, or migrate when a host is set.
#[derive(Debug, Deserialize)]
pub struct PostRequest {
    /// Migration target host.
    pub host: Option<String>,
    /// New container name.
    pub name: Option<String>,
}

/// `POST /containers/{name}` — rename, or become a live migration source.
pub async fn post_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PostRequest>,
) -> Result<Response> {
    let daemon = &state.daemon;
    let handle = daemon.materializer.materialize(&name)?;

    if req.host.is_some() {
        if !handle.running() {
            return Err(ApiError::BadRequest(
                "only live migrations are supported right now".to_string(),
            ));
        }

        let channels = Arc::new(WsChannels::new(&CHANNELS));
        let rootfs_dir = daemon.layout().rootfs_dir(&name);
        let state_dir = daemon.layout().container_dir(&name).join("migration-state");

        let body_channels = channels.clone();
        let body = async move {
            let mut conns = body_channels.wait_all().await.into_iter();
            let (Some(control), Some(criu), Some(fs)) =
                (conns.next(), conns.next(), conns.next())
            else {
                return Err(ApiError::Internal("migration channels missing".to_string()));
            };
            run_source(handle, rootfs_dir, state_dir, control, criu, fs).await?;
            Ok(Value::Null)
        };

        let op = daemon.operations.spawn(vec![name], Some(channels), body);
        return Ok(daemon.operations.async_response(op));
    }

    let Some(new_name) = req.name else {
        return Err(ApiError::BadRequest(
            "missing name or host in request body".to_string(),
        ));
    };

    let store = daemon.store.clone();
    let old_name = name.clone();
    let body = async move {
        handle.rename(&new_name).await?;
        store.rename_container(&old_name, &new_name)?;
        Ok(Value::Null)
    };

    let op = daemon.operations.spawn(vec![name], None, body);
    Ok(daemon.operations.async_response(op))
}

/// `DELETE /containers/{name}` — delete the container, its snapshots and
/// every on-disk directory. Partial states (row without directory or the
/// reverse) are tolerated and cleaned.
pub async fn delete_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response> {
    let daemon = &state.daemon;
    if daemon.store.container_id_by_name(&name).is_err() {
        tracing::debug!(container = %name, "delete of unknown container; cleaning directories anyway");
    }

    let snapshots = daemon.store.snapshots_of(&name).unwrap_or_default();
    let mut dirs: Vec<PathBuf> = snapshots
        .iter()
        .map(|(leaf, _)| daemon.layout().snapshot_dir(&name, leaf))
        .collect();
    for (leaf, _) in &snapshots {
        let _ = daemon.store.delete_snapshot(&name, leaf);
    }

    daemon.store.delete_container(&name)?;
    dirs.push(daemon.layout().container_dir(&name));

    let body = async move {
        for dir in dirs {
            if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(dir = %dir.display(), error = %err, "error cleaning up");
                }
            }
        }
        Ok(Value::Null)
    };

    let op = daemon.operations.spawn(vec![name], None, body);
    Ok(daemon.operations.async_response(op))
}

/// Removes a container's row and directory after a failed creation.
pub(crate) async fn remove_container(daemon: &Daemon, name: &str) {
    let dir = daemon.layout().container_dir(name);
    if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(dir = %dir.display(), error = %err, "error cleaning up");
        }
    }
    let _ = daemon.store.delete_container(name);
}
