use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::network::Network;

/// Network location of a peer.
///
/// Equality and hashing are structural with a case-insensitive host, so two
/// addresses naming the same peer with different host casing collapse to one
/// connection-map entry. Port `0` stands for the network's default port.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerAddress {
    pub network: Network,
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(network: Network, host: impl Into<String>, port: u16) -> Self {
        Self {
            network,
            host: host.into(),
            port,
        }
    }

    /// The port to actually dial: the explicit port, or the network default.
    pub fn resolved_port(&self) -> u16 {
        if self.port == 0 {
            self.network.default_port()
        } else {
            self.port
        }
    }

    /// Resolve to a socket address for dialing.
    pub fn to_socket_addr(&self) -> io::Result<SocketAddr> {
        (self.host.as_str(), self.resolved_port())
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address found for host {}", self.host),
                )
            })
    }

    /// The address as a peer observed on an established socket.
    pub fn from_socket_addr(network: Network, addr: SocketAddr) -> Self {
        Self {
            network,
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl PartialEq for PeerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.network == other.network
            && self.port == other.port
            && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl Eq for PeerAddress {}

impl Hash for PeerAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.network.hash(state);
        self.host.to_ascii_lowercase().hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.resolved_port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_comparison_ignores_case() {
        let a = PeerAddress::new(Network::Mainnet, "Node.Example.Com", 8555);
        let b = PeerAddress::new(Network::Mainnet, "node.example.com", 8555);

        assert_eq!(a, b);
    }

    #[test]
    fn zero_port_uses_network_default() {
        let addr = PeerAddress::new(Network::Testnet, "127.0.0.1", 0);
        assert_eq!(addr.resolved_port(), Network::Testnet.default_port());
    }

    #[test]
    fn differing_networks_differ() {
        let a = PeerAddress::new(Network::Mainnet, "host", 8555);
        let b = PeerAddress::new(Network::Simnet, "host", 8555);

        assert_ne!(a, b);
    }
}
