//! Shared peer-address types.
use std::net::SocketAddr;

use bitcoin::network::{address::Address, constants::ServiceFlags};

use crate::net::time::LocalTime;

/// Where an address was learned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Source {
    /// Shared by another peer in an `addr` message.
    Peer(SocketAddr),
    /// Resolved from a DNS seed.
    Dns,
    /// Configured or saved locally (autoconnect peers, seed nodes, admin
    /// imports).
    Imported,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Peer(addr) => write!(f, "{}", addr),
            Self::Dns => write!(f, "DNS"),
            Self::Imported => write!(f, "Imported"),
        }
    }
}

/// A peer address and what we know about it.
///
/// Squeak peers don't advertise meaningful service bits, but the wire `addr`
/// format carries them, so they are kept for round-tripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownAddress {
    pub addr: SocketAddr,
    pub services: ServiceFlags,
    pub source: Source,
    /// Last time this address was used to successfully connect.
    pub last_success: Option<LocalTime>,
    /// Last time this address was handed to the dialer.
    pub last_sampled: Option<LocalTime>,
    /// Last time a connection to this address was attempted.
    pub last_attempt: Option<LocalTime>,
    /// Last time this peer was seen alive.
    pub last_active: Option<LocalTime>,
}

impl KnownAddress {
    pub fn new(addr: SocketAddr, services: ServiceFlags, source: Source) -> Self {
        Self {
            addr,
            services,
            source,
            last_success: None,
            last_sampled: None,
            last_attempt: None,
            last_active: None,
        }
    }

    /// The `(timestamp, address)` pair the wire `addr` message carries.
    pub fn to_wire(&self) -> (u32, Address) {
        (
            self.last_active
                .map(|t| t.as_secs() as u32)
                .unwrap_or_default(),
            Address::new(&self.addr, self.services),
        )
    }
}

/// What the connection maintainer needs from the address book.
pub trait AddressSource {
    /// Hand out an address to dial. `None` when nothing usable is left.
    fn sample(&mut self) -> Option<(SocketAddr, Source)>;

    /// Add addresses learned outside the `addr` message flow.
    fn insert(&mut self, addrs: &[SocketAddr], source: Source);

    /// Record an address of ours as seen by a remote peer.
    fn record_local_address(&mut self, addr: SocketAddr);
}
