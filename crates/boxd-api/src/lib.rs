//! HTTP control plane for the container daemon.
//!
//! Handlers translate requests into store preconditions, materialized
//! runtime handles and operation-runner work: synchronous responses carry
//! JSON inline, asynchronous ones return an operation reference the client
//! polls, optionally with websocket side channels for exec and migration.

pub mod api;
pub mod daemon;
pub mod handlers;
pub mod ops;
pub mod server;

mod error;
mod fdstream;

pub use api::create_router;
pub use daemon::{AppState, Daemon, DaemonConfig};
pub use error::{ApiError, Result};
pub use ops::{API_VERSION, Operation, OperationStatus, Operations, WsChannels};
pub use server::{ApiServer, ServerConfig};
