//! Migration source.
//!
//! The source side of a live migration runs inside an operation whose three
//! websocket slots (control, criu, fs) the peer redeems with per-channel
//! secrets. Once all channels are bound the source checkpoints the container,
//! streams the checkpoint images and the rootfs as tar streams, and reports
//! the outcome on the control channel.

use std::path::{Path, PathBuf};

use axum::extract::ws::{Message, WebSocket};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use boxd_container::ContainerHandle;

use crate::error::{MigrationError, Result};
use crate::proto::{MigrationControl, MigrationHeader};

/// Streams a directory as an uncompressed tar over a websocket, closing the
/// socket at end of stream.
async fn stream_tar(ws: &mut WebSocket, dir: &Path) -> Result<()> {
    let mut child = Command::new("tar")
        .arg("-cf")
        .arg("-")
        .arg("-C")
        .arg(dir)
        .arg(".")
        .stdout(std::process::Stdio::piped())
        .spawn()?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| MigrationError::Protocol("tar stdout unavailable".to_string()))?;

    let mut buf = vec![0u8; 32 * 1024];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        ws.send(Message::Binary(buf[..n].to_vec()))
            .await
            .map_err(|err| MigrationError::Websocket(err.to_string()))?;
    }

    let status = child.wait().await?;
    if !status.success() {
        return Err(MigrationError::Protocol(format!(
            "tar of {} exited with {status}",
            dir.display()
        )));
    }

    ws.send(Message::Close(None))
        .await
        .map_err(|err| MigrationError::Websocket(err.to_string()))?;
    Ok(())
}

/// Drives the source side of a migration over bound websocket channels,
/// in channel order: control, criu, fs. The checkpoint is written into
/// `state_dir` (created here, removed afterwards).
///
/// # Errors
///
/// Returns the first checkpoint, stream or websocket failure; the failure is
/// also reported to the peer on the control channel when possible.
pub async fn run_source(
    handle: ContainerHandle,
    rootfs_dir: PathBuf,
    state_dir: PathBuf,
    mut control: WebSocket,
    mut criu: WebSocket,
    mut fs: WebSocket,
) -> Result<()> {
    let header = MigrationHeader::default();
    control
        .send(Message::Text(serde_json::to_string(&header).map_err(
            |err| MigrationError::Protocol(err.to_string()),
        )?))
        .await
        .map_err(|err| MigrationError::Websocket(err.to_string()))?;

    let result = async {
        tokio::fs::create_dir_all(&state_dir).await?;
        handle.checkpoint(&state_dir, true, true).await?;

        stream_tar(&mut criu, &state_dir).await?;
        stream_tar(&mut fs, &rootfs_dir).await?;
        Ok::<(), MigrationError>(())
    }
    .await;

    let _ = tokio::fs::remove_dir_all(&state_dir).await;

    let control_msg = MigrationControl {
        success: result.is_ok(),
        message: result.as_ref().err().map(ToString::to_string),
    };
    let _ = control
        .send(Message::Text(
            serde_json::to_string(&control_msg)
                .map_err(|err| MigrationError::Protocol(err.to_string()))?,
        ))
        .await;
    let _ = control.send(Message::Close(None)).await;

    tracing::info!(container = %handle.name, success = result.is_ok(), "migration source finished");
    result
}
