use config::Config;
use serde::Deserialize;
use sqk_types::network::Network;

use std::path::PathBuf;

mod p2p;
pub use p2p::P2pConfig;

mod rpc;
pub use rpc::RpcConfig;

mod storage;
pub use storage::StorageConfig;

mod lightning;
pub use lightning::LightningConfig;

mod sync;
pub use sync::SyncConfig;

mod sqk;
pub use sqk::SqkConfig;

mod logger;
pub use logger::LoggerConfig;

#[derive(Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_network")]
    pub network: Network,

    pub p2p: P2pConfig,
    pub rpc: RpcConfig,
    pub lightning: LightningConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub sqk: SqkConfig,

    #[serde(default)]
    pub shutdown_timeout: Option<u64>,

    #[serde(default)]
    pub logger: LoggerConfig,
}

fn default_network() -> Network {
    Network::Mainnet
}

impl NodeConfig {
    pub fn from_path(path: PathBuf) -> eyre::Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
