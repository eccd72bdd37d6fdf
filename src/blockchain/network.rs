use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::LedgerConfig;

/// Node status as reported by `/info`.
///
/// A projection of the chain manager's state; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NetworkStatus {
    pub network: String,
    pub version: u32,
    pub release: u32,
    /// -1 before genesis
    pub height: i64,
    /// Id of the chain tip
    pub current: Option<String>,
    pub blocks: u64,
    pub peers: u32,
    pub queue_length: usize,
    pub node_state_latency: u32,
}

impl NetworkStatus {
    pub fn project(
        height: Option<u64>,
        current: Option<String>,
        queue_length: usize,
        config: &LedgerConfig,
    ) -> Self {
        NetworkStatus {
            network: config.network.clone(),
            version: config.version,
            release: config.release,
            height: height.map_or(-1, |h| h as i64),
            current,
            blocks: height.map_or(0, |h| h + 1),
            peers: 0,
            queue_length,
            node_state_latency: 0,
        }
    }
}
