//! Container migration over websocket channels.
//!
//! A migration source runs inside an operation exposing three websocket
//! slots (control, criu, fs); the pull sink dials those slots on the remote
//! daemon with per-channel secrets and unpacks the streams locally.

mod error;
mod proto;
mod sink;
mod source;

pub use error::{MigrationError, Result};
pub use proto::{CHANNELS, MigrationControl, MigrationHeader};
pub use sink::{MigrationSink, tls_connector};
pub use source::run_source;
