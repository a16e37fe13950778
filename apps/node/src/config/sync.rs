use serde::Deserialize;

use crate::config::P2pConfig;

/// Default number of recent blocks the node syncs squeaks for.
const DEFAULT_BLOCK_RANGE_WINDOW: u32 = 2016;

#[derive(Deserialize, Clone)]
pub struct SyncConfig {
    /// Number of recent blocks squeaks are synced and accepted for.
    #[serde(default = "default_block_range_window")]
    pub block_range_window: u32,

    /// Listen address of the peer sync RPC server. Defaults to the p2p
    /// listen host one port above the p2p port.
    #[serde(default)]
    pub listen: Option<String>,
}

fn default_block_range_window() -> u32 {
    DEFAULT_BLOCK_RANGE_WINDOW
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            block_range_window: default_block_range_window(),
            listen: None,
        }
    }
}

impl SyncConfig {
    pub fn listen_address(&self, p2p: &P2pConfig) -> String {
        match &self.listen {
            Some(listen) => listen.clone(),
            None => format!(
                "{}:{}",
                p2p.listen_host(),
                sqk_sync::sync_port(p2p.listen_port())
            ),
        }
    }
}
