//! Wire messages exchanged on the control channel.

use serde::{Deserialize, Serialize};

/// Channel names, in slot order.
pub const CHANNELS: [&str; 3] = ["control", "criu", "fs"];

/// Header sent by the source when the control channel binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationHeader {
    /// Transfer encoding of the fs/criu channels.
    pub fs: String,
}

impl Default for MigrationHeader {
    fn default() -> Self {
        Self {
            fs: "tar".to_string(),
        }
    }
}

/// Terminal control message from the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationControl {
    /// Whether the transfer succeeded.
    pub success: bool,
    /// Failure detail, when unsuccessful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
