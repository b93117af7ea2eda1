use crate::constants::{ACTIVE_LIST_LIMIT, ENDED_LIST_LIMIT, SNAPSHOT_CHANNEL_SIZE};
use serde::{Deserialize, Serialize};

/// Per-client tunables. Missing fields fall back to the defaults.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Rows in the active listing.
    pub active_limit: usize,
    /// Rows in the ended listing.
    pub ended_limit: usize,
    pub snapshot_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            active_limit: ACTIVE_LIST_LIMIT,
            ended_limit: ENDED_LIST_LIMIT,
            snapshot_buffer: SNAPSHOT_CHANNEL_SIZE,
        }
    }
}
