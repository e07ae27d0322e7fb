//! Interactive and non-interactive command execution.
//!
//! Without websockets the command runs against `/dev/null` and the exit
//! status becomes the operation metadata. With websockets the operation
//! publishes one secret per stdio slot, a rendezvous barrier waits for every
//! slot to be redeemed, and only then does the command start: a PTY mirrored
//! over the single socket in interactive mode, or three pipes pumped to the
//! three sockets otherwise.

use std::collections::BTreeMap;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use axum::Json;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use boxd_container::ContainerHandle;
use boxd_container::exec::{Pty, attach_options, pipe_pair};

use crate::daemon::AppState;
use crate::error::{ApiError, Result};
use crate::fdstream::FdStream;
use crate::ops::WsChannels;

/// Body of `POST /containers/{name}/exec`.
#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    /// Command and arguments.
    pub command: Vec<String>,
    /// Publish websocket slots and wait for them before running.
    #[serde(default, rename = "wait-for-websocket")]
    pub wait_for_websocket: bool,
    /// Allocate a PTY instead of pipes.
    #[serde(default)]
    pub interactive: bool,
    /// Environment for the command; replaces the container environment
    /// entirely, and `HOME` also seeds the working directory.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// `POST /containers/{name}/exec` — run a command in a running container.
pub async fn exec_container(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ExecRequest>,
) -> Result<Response> {
    let daemon = &state.daemon;
    let handle = daemon.materializer.materialize(&name)?;
    if !handle.running() {
        return Err(ApiError::BadRequest("container is not running".to_string()));
    }

    if req.wait_for_websocket {
        let slots: &[&str] = if req.interactive {
            &["0"]
        } else {
            &["0", "1", "2"]
        };
        let channels = Arc::new(WsChannels::new(slots));

        let body_channels = channels.clone();
        let interactive = req.interactive;
        let command = req.command;
        let environment = req.environment;
        let body = async move {
            // Rendezvous: nothing runs until every secret is redeemed.
            let conns = body_channels.wait_all().await;
            if interactive {
                run_interactive(handle, &command, &environment, conns).await
            } else {
                run_piped(handle, &command, &environment, conns).await
            }
        };

        let op = daemon.operations.spawn(vec![name], Some(channels), body);
        return Ok(daemon.operations.async_response(op));
    }

    let body = async move {
        let null = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/null")?;
        let stdin: OwnedFd = null.try_clone()?.into();
        let stdout: OwnedFd = null.try_clone()?.into();
        let stderr: OwnedFd = null.into();

        let options = attach_options(&req.environment, stdin, stdout, stderr);
        let status = handle.attach(&req.command, options).await?;
        Ok(json!({ "return": status }))
    };

    let op = daemon.operations.spawn(vec![name], None, body);
    Ok(daemon.operations.async_response(op))
}

async fn run_interactive(
    handle: ContainerHandle,
    command: &[String],
    environment: &BTreeMap<String, String>,
    mut conns: Vec<WebSocket>,
) -> Result<Value> {
    let socket = conns
        .pop()
        .ok_or_else(|| ApiError::Internal("exec websocket missing".to_string()))?;

    let pty = Pty::open()?;
    let stdin = pty.slave.try_clone()?;
    let stdout = pty.slave.try_clone()?;
    let stderr = pty.slave;
    let master = FdStream::from_owned(pty.master)?;

    let mirror = tokio::spawn(mirror_websocket(socket, master));

    let options = attach_options(environment, stdin, stdout, stderr);
    let status = handle.attach(command, options).await?;

    // The subordinate fds moved into the command; once it exits the master
    // sees EOF and the mirror drains.
    let _ = mirror.await;
    Ok(json!({ "return": status }))
}

async fn run_piped(
    handle: ContainerHandle,
    command: &[String],
    environment: &BTreeMap<String, String>,
    conns: Vec<WebSocket>,
) -> Result<Value> {
    let mut conns = conns.into_iter();
    let (Some(ws_stdin), Some(ws_stdout), Some(ws_stderr)) =
        (conns.next(), conns.next(), conns.next())
    else {
        return Err(ApiError::Internal("exec websockets missing".to_string()));
    };

    let (stdin_read, stdin_write) = pipe_pair()?;
    let (stdout_read, stdout_write) = pipe_pair()?;
    let (stderr_read, stderr_write) = pipe_pair()?;

    let stdin_pump = tokio::spawn(recv_into_fd(ws_stdin, FdStream::from_owned(stdin_write)?));
    let stdout_pump = tokio::spawn(send_from_fd(ws_stdout, FdStream::from_owned(stdout_read)?));
    let stderr_pump = tokio::spawn(send_from_fd(ws_stderr, FdStream::from_owned(stderr_read)?));

    let options = attach_options(environment, stdin_read, stdout_write, stderr_write);
    let status = handle.attach(command, options).await?;

    // Output pipes hit EOF when the command's ends close; the stdin pump
    // only ends with the client, so cut it loose.
    let _ = stdout_pump.await;
    let _ = stderr_pump.await;
    stdin_pump.abort();

    Ok(json!({ "return": status }))
}

/// Pumps websocket frames into a descriptor; dropping the descriptor on
/// return delivers EOF to the reader.
async fn recv_into_fd(mut socket: WebSocket, mut fd: FdStream) {
    while let Some(Ok(msg)) = socket.recv().await {
        let written = match msg {
            Message::Binary(bytes) => fd.write_all(&bytes).await,
            Message::Text(text) => fd.write_all(text.as_bytes()).await,
            Message::Close(_) => break,
            _ => Ok(()),
        };
        if written.is_err() {
            break;
        }
    }
}

/// Pumps a descriptor into a websocket until EOF, then closes the socket.
async fn send_from_fd(mut socket: WebSocket, mut fd: FdStream) {
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        match fd.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if socket.send(Message::Binary(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Bidirectional copy between a websocket and a PTY master: two concurrent
/// loops, terminating when either side closes.
async fn mirror_websocket(socket: WebSocket, stream: FdStream) {
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (mut sender, mut receiver) = socket.split();

    let to_socket = async {
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if sender.send(Message::Binary(buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    };

    let from_socket = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let written = match msg {
                Message::Binary(bytes) => write_half.write_all(&bytes).await,
                Message::Text(text) => write_half.write_all(text.as_bytes()).await,
                Message::Close(_) => break,
                _ => Ok(()),
            };
            if written.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        () = to_socket => {}
        () = from_socket => {}
    }
}
