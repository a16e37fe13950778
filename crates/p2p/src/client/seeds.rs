use std::net::SocketAddr;

use sqk_types::network::Network;

/// Long-lived community nodes, dialable before any addresses are learned.
const MAINNET: &[&str] = &[];
const TESTNET: &[&str] = &[];
const SIMNET: &[&str] = &[];

/// The hard-coded seed nodes for the given [`Network`].
pub(crate) fn seed_nodes(network: Network) -> Vec<SocketAddr> {
    let seeds = match network {
        Network::Mainnet => MAINNET,
        Network::Testnet => TESTNET,
        Network::Simnet => SIMNET,
    };

    tracing::debug!("Adding {} {} seed node(s)", seeds.len(), network);

    seeds
        .iter()
        .map(|seed| seed.parse().expect("seed addresses are valid"))
        .collect()
}
