use eyre::{Context, OptionExt};
use serde::Deserialize;
use sqk_p2p::client;
use sqk_types::network::Network;
use sqk_types::SqueakPeer;
use std::net::{SocketAddr, ToSocketAddrs};

/// Default lower bound of outbound connections.
pub const DEFAULT_MIN_PEERS: usize = 5;

/// Default upper bound of peer connections.
pub const DEFAULT_MAX_PEERS: usize = 10;

/// Default interval between connection-maintenance runs, seconds.
pub const DEFAULT_UPDATE_INTERVAL_S: u64 = 10;

/// Default per-RPC timeout when syncing against peers, seconds.
pub const DEFAULT_PEER_TIMEOUT_S: u64 = 10;

#[derive(Deserialize, Clone)]
pub struct P2pConfig {
    /// Address to listen on for incoming peer connections.
    pub address: String,
    /// Externally reachable `host:port`, published in offers. Never resolved
    /// at startup.
    pub external_address: String,
    /// Lower bound of outbound connections the autoconnect loop maintains.
    #[serde(default = "default_min_peers")]
    pub min_peers: usize,
    /// Upper bound of peer connections.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Interval between connection-maintenance runs, seconds.
    #[serde(default = "default_update_interval_s")]
    pub update_interval_s: u64,
    /// Per-RPC timeout when syncing against peers, seconds.
    #[serde(default = "default_peer_timeout_s")]
    pub peer_timeout_s: u64,
    /// Peers to always stay connected to.
    #[serde(default)]
    pub connect: Vec<String>,
}

fn default_min_peers() -> usize {
    DEFAULT_MIN_PEERS
}

fn default_max_peers() -> usize {
    DEFAULT_MAX_PEERS
}

fn default_update_interval_s() -> u64 {
    DEFAULT_UPDATE_INTERVAL_S
}

fn default_peer_timeout_s() -> u64 {
    DEFAULT_PEER_TIMEOUT_S
}

impl P2pConfig {
    pub fn to_client_config(
        &self,
        network: Network,
        autoconnect: &[SqueakPeer],
    ) -> eyre::Result<client::P2PConfig> {
        let mut connect: Vec<SocketAddr> = self
            .connect
            .iter()
            .map(|x| {
                x.to_socket_addrs()
                    .wrap_err("Failed to resolve configured peer address")
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();

        for peer in autoconnect {
            match peer.address.to_socket_addr() {
                Ok(addr) => connect.push(addr),
                Err(err) => {
                    tracing::warn!("Skipping unresolvable autoconnect peer {}: {}", peer.name, err)
                }
            }
        }

        let address = self
            .address
            .to_socket_addrs()
            .wrap_err("Failed to resolve listen address")?
            .next()
            .ok_or_eyre("No address found in listen address")?;

        Ok(client::P2PConfig::new(
            network,
            address,
            connect,
            self.min_peers,
            self.max_peers,
            sqk_p2p::net::LocalDuration::from_secs(self.update_interval_s),
        ))
    }

    /// The external `(host, port)` published in offers.
    pub fn external_address(&self) -> (String, u16) {
        match self.external_address.rsplit_once(':') {
            Some((host, port)) => (
                host.to_owned(),
                port.parse().unwrap_or_else(|_| {
                    tracing::warn!("Invalid external port, using network default");
                    0
                }),
            ),
            None => (self.external_address.clone(), 0),
        }
    }

    /// The configured p2p listen port.
    pub fn listen_port(&self) -> u16 {
        self.address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(0)
    }

    /// The configured p2p listen host.
    pub fn listen_host(&self) -> String {
        self.address
            .rsplit_once(':')
            .map(|(host, _)| host.to_owned())
            .unwrap_or_else(|| self.address.clone())
    }
}
