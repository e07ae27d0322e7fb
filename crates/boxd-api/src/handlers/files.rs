//! Single-file transfer in and out of a container's rootfs.
//!
//! Both directions take a `path` query parameter. The effective rootfs is
//! the running container's `/proc/<pid>/root` or the on-disk tree, and the
//! requested path is confined lexically before any filesystem call.

use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Component, Path as FsPath, PathBuf};

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use futures::StreamExt;
use nix::unistd::{Gid, Uid, chown};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::daemon::AppState;
use crate::error::{ApiError, Result};
use crate::ops::sync_response;

/// Query parameters for both file directions.
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    /// Path inside the container's rootfs.
    pub path: String,
}

/// Lexically normalizes a path: `.` dropped, `..` resolved against the
/// stack, no filesystem access.
fn clean_path(path: &FsPath) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

/// Joins a request path onto the rootfs and confines it: the cleaned result
/// must stay inside the cleaned rootfs.
fn confine(rootfs: &FsPath, target: &str) -> Result<PathBuf> {
    let rootfs = clean_path(rootfs);
    let joined = clean_path(&rootfs.join(target.trim_start_matches('/')));
    if joined.starts_with(&rootfs) {
        Ok(joined)
    } else {
        Err(ApiError::BadRequest(format!(
            "{target} is not in the container's rootfs"
        )))
    }
}

fn effective_rootfs(state: &AppState, name: &str) -> Result<PathBuf> {
    let handle = state.daemon.materializer.materialize(name)?;
    let rootfs = match handle.init_pid() {
        Some(pid) if handle.running() => PathBuf::from(format!("/proc/{pid}/root")),
        _ => state.daemon.layout().rootfs_dir(name),
    };
    Ok(rootfs)
}

/// `GET /containers/{name}/files?path=` — stream a file out, with ownership
/// and mode metadata in `X-LXD-*` headers.
pub async fn get_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Response> {
    let rootfs = effective_rootfs(&state, &name)?;
    let full = confine(&rootfs, &query.path)?;

    let file = tokio::fs::File::open(&full)
        .await
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ApiError::NotFound(query.path.clone()),
            _ => ApiError::Internal(err.to_string()),
        })?;
    let meta = file.metadata().await?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header("X-LXD-uid", meta.uid().to_string())
        .header("X-LXD-gid", meta.gid().to_string())
        .header("X-LXD-mode", format!("{:04o}", meta.mode() & 0o777))
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(response)
}

fn parse_file_headers(headers: &HeaderMap) -> Result<(u32, u32, u32)> {
    let field = |key: &str| -> Result<&str> {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest(format!("missing {key} header")))
    };

    let uid = field("X-LXD-uid")?
        .parse()
        .map_err(|_| ApiError::BadRequest("bad X-LXD-uid header".to_string()))?;
    let gid = field("X-LXD-gid")?
        .parse()
        .map_err(|_| ApiError::BadRequest("bad X-LXD-gid header".to_string()))?;
    let mode = u32::from_str_radix(field("X-LXD-mode")?, 8)
        .map_err(|_| ApiError::BadRequest("bad X-LXD-mode header".to_string()))?;

    Ok((uid, gid, mode))
}

/// `POST /containers/{name}/files?path=` — stream a file in, creating
/// parent directories and applying the requested ownership and mode.
pub async fn put_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let (uid, gid, mode) = parse_file_headers(&headers)?;
    let rootfs = effective_rootfs(&state, &name)?;
    let full = confine(&rootfs, &query.path)?;

    if let Some(parent) = full.parent() {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(parent)
            .or_else(|err| {
                if err.kind() == std::io::ErrorKind::AlreadyExists {
                    Ok(())
                } else {
                    Err(err)
                }
            })?;
    }

    let mut file = tokio::fs::File::create(&full).await?;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| ApiError::Internal(err.to_string()))?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    std::fs::set_permissions(&full, std::fs::Permissions::from_mode(mode))?;
    chown(&full, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
        .map_err(|err| ApiError::Internal(format!("chown {}: {err}", full.display())))?;

    Ok(sync_response(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confinement_allows_inside_paths() {
        let rootfs = FsPath::new("/var/lib/boxd/lxc/web/rootfs");
        assert_eq!(
            confine(rootfs, "/etc/hostname").unwrap(),
            PathBuf::from("/var/lib/boxd/lxc/web/rootfs/etc/hostname")
        );
        assert_eq!(
            confine(rootfs, "etc/../etc/hosts").unwrap(),
            PathBuf::from("/var/lib/boxd/lxc/web/rootfs/etc/hosts")
        );
    }

    #[test]
    fn confinement_rejects_escapes() {
        let rootfs = FsPath::new("/var/lib/boxd/lxc/web/rootfs");
        for escape in [
            "../../../etc/shadow",
            "/../../etc/shadow",
            "a/../../../../etc/passwd",
        ] {
            assert!(confine(rootfs, escape).is_err(), "{escape} should be rejected");
        }
    }

    #[test]
    fn file_headers_round_trip() {
        let mut headers = HeaderMap::new();
        headers.insert("X-LXD-uid", "1000".parse().unwrap());
        headers.insert("X-LXD-gid", "1000".parse().unwrap());
        headers.insert("X-LXD-mode", "0644".parse().unwrap());

        let (uid, gid, mode) = parse_file_headers(&headers).unwrap();
        assert_eq!((uid, gid, mode), (1000, 1000, 0o644));
    }

    #[test]
    fn missing_header_is_bad_request() {
        let headers = HeaderMap::new();
        assert!(matches!(
            parse_file_headers(&headers),
            Err(ApiError::BadRequest(_))
        ));
    }
}
