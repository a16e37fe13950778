//!
//! The peer-to-peer address manager: the book of every peer address this
//! node has learned, and the sampling policy the dialer draws from.
//!
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use tracing::trace;

use bitcoin::network::address::Address;
use bitcoin::network::constants::ServiceFlags;

use crate::{
    common::peer::{AddressSource, KnownAddress, Source},
    common::time::Clock,
    net::{LocalDuration, LocalTime},
};

use super::output::Wire;

/// Time to wait until a `getaddr` request times out.
pub const REQUEST_TIMEOUT: LocalDuration = LocalDuration::from_mins(1);

/// Idle timeout. Used to run periodic functions.
pub const IDLE_TIMEOUT: LocalDuration = LocalDuration::from_mins(1);

/// Sample timeout. How long before a sampled address can be handed out again.
pub const SAMPLE_TIMEOUT: LocalDuration = LocalDuration::from_mins(3);

/// Maximum number of addresses in a `addr` message, sent or accepted.
const MAX_ADDR_ADDRESSES: usize = 1000;
/// Maximum number of addresses kept per address range.
const MAX_RANGE_SIZE: usize = 256;

/// An event emitted by the address manager.
#[derive(Debug, Clone)]
pub enum Event {
    /// Peer addresses have been received.
    AddressesReceived {
        /// Number of addresses received.
        count: usize,
        /// Source of addresses received.
        source: Source,
    },
    /// Address book exhausted.
    AddressBookExhausted,
}

impl std::fmt::Display for Event {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::AddressesReceived { count, source } => {
                write!(fmt, "received {} address(es) from source `{}`", count, source)
            }
            Event::AddressBookExhausted => {
                write!(fmt, "address book exhausted, fetching new addresses from peers")
            }
        }
    }
}

/// Manages peer network addresses.
pub struct AddressManager<U, C> {
    /// Everything we know, by address.
    book: HashMap<SocketAddr, KnownAddress>,
    /// Book keys bucketed by network range, for diverse sampling.
    address_ranges: HashMap<u8, HashSet<SocketAddr>>,
    connected: HashSet<SocketAddr>,
    /// Negotiated peers we can ask for more addresses.
    sources: HashSet<SocketAddr>,
    local_addrs: HashSet<SocketAddr>,
    /// The last time we asked our peers for new addresses.
    last_request: Option<LocalTime>,
    /// The last time we idled.
    last_idle: Option<LocalTime>,
    wire: U,
    rng: fastrand::Rng,
    clock: C,
}

impl<U: Wire<Event>, C: Clock> AddressManager<U, C> {
    /// Create a new address manager.
    pub fn new(rng: fastrand::Rng, wire: U, clock: C) -> Self {
        Self {
            book: HashMap::new(),
            address_ranges: HashMap::new(),
            connected: HashSet::new(),
            sources: HashSet::new(),
            local_addrs: HashSet::new(),
            last_request: None,
            last_idle: None,
            wire,
            rng,
            clock,
        }
    }

    /// Initialize the address manager. Must be called once.
    pub fn initialize(&mut self) {
        self.idle();
    }

    /// The number of addresses known.
    pub fn len(&self) -> usize {
        self.book.len()
    }

    pub fn is_empty(&self) -> bool {
        self.book.is_empty()
    }

    /// Called when we receive a `getaddr` message. Replies with up to
    /// [`MAX_ADDR_ADDRESSES`], at most one per address range for diversity.
    pub fn received_getaddr(&mut self, from: &SocketAddr) {
        let mut addrs = Vec::new();

        for range in self.address_ranges.values() {
            let ix = self.rng.usize(..range.len());
            let addr = range.iter().nth(ix).expect("index must be present");
            let ka = self.book.get(addr).expect("address must exist");

            addrs.push(ka.to_wire());

            if addrs.len() == MAX_ADDR_ADDRESSES {
                break;
            }
        }
        self.wire.addr(*from, addrs);
    }

    /// Called when an `addr` message was received.
    pub fn received_addr(&mut self, peer: SocketAddr, addrs: Vec<(u32, Address)>) {
        if addrs.is_empty() || addrs.len() > MAX_ADDR_ADDRESSES {
            // Peer misbehaving, got empty or too many addresses.
            return;
        }

        let now = self.clock.local_time();
        let count = addrs.len();
        let source = Source::Peer(peer);

        for (last_active, wire_addr) in addrs {
            let Ok(socket_addr) = wire_addr.socket_addr() else {
                continue;
            };

            let mut ka = KnownAddress::new(socket_addr, wire_addr.services, source);
            if last_active != 0 {
                ka.last_active = Some(LocalTime::from_secs(u64::from(last_active)).min(now));
            }
            self.insert_known(ka);
        }

        self.wire.event(Event::AddressesReceived { count, source });
    }

    /// Called when a tick is received.
    pub fn received_wake(&mut self) {
        let local_time = self.clock.local_time();

        trace!("Received wake");

        // If we're already using all the addresses we have available, fetch more.
        if local_time - self.last_request.unwrap_or_default() >= REQUEST_TIMEOUT
            && self.is_exhausted()
        {
            self.wire.event(Event::AddressBookExhausted);
            self.get_addresses();
            self.last_request = Some(local_time);
        }

        if local_time - self.last_idle.unwrap_or_default() >= IDLE_TIMEOUT {
            self.idle();
        }
    }

    /// Ask our peer sources for new addresses.
    fn get_addresses(&mut self) {
        for peer in &self.sources {
            self.wire.get_addr(*peer);
        }
    }

    fn idle(&mut self) {
        self.last_idle = Some(self.clock.local_time());
        self.wire.set_timer(IDLE_TIMEOUT);
    }

    /// Check whether we have unused addresses.
    fn is_exhausted(&self) -> bool {
        let time = self.clock.local_time();

        for (addr, ka) in &self.book {
            // Unsuccessful attempt to connect.
            if ka.last_attempt.is_some() && ka.last_success.is_none() {
                continue;
            }
            if time - ka.last_sampled.unwrap_or_default() < SAMPLE_TIMEOUT {
                continue;
            }
            if !self.connected.contains(addr) {
                return false;
            }
        }
        true
    }

    /// Called when a peer connection was attempted.
    pub fn peer_attempted(&mut self, addr: &SocketAddr) {
        let time = self.clock.local_time();

        if let Some(ka) = self.book.get_mut(addr) {
            ka.last_attempt = Some(time);
        }
    }

    /// Called when a peer connected.
    pub fn peer_connected(&mut self, addr: &SocketAddr) {
        self.connected.insert(*addr);

        let time = self.clock.local_time();
        if let Some(ka) = self.book.get_mut(addr) {
            ka.last_success = Some(time);
            ka.last_active = Some(time);
        }
    }

    /// Called when a peer completed its handshake; it becomes a source for
    /// new addresses.
    pub fn peer_negotiated(&mut self, addr: &SocketAddr) {
        if self.connected.contains(addr) {
            self.sources.insert(*addr);
        }
    }

    /// Called when a message was received from a peer.
    pub fn peer_active(&mut self, addr: SocketAddr) {
        if let Some(ka) = self.book.get_mut(&addr) {
            ka.last_active = Some(self.clock.local_time());
        }
    }

    /// Called when a peer disconnected.
    pub fn peer_disconnected(&mut self, addr: &SocketAddr) {
        self.connected.remove(addr);
        self.sources.remove(addr);
    }

    /// Whether a peer is currently connected.
    pub fn is_connected(&self, addr: SocketAddr) -> bool {
        self.connected.contains(&addr)
    }

    /// Put a new address in the book. Known addresses are left untouched.
    fn insert_known(&mut self, ka: KnownAddress) -> bool {
        let addr = ka.addr;

        if self.local_addrs.contains(&addr) || self.book.contains_key(&addr) {
            return false;
        }

        let range = self.address_ranges.entry(address_range(&addr)).or_default();

        // If the address range is already full, evict a random entry to make
        // room.
        if range.len() == MAX_RANGE_SIZE {
            let ix = self.rng.usize(..range.len());

            if let Some(evicted) = range.iter().cloned().nth(ix) {
                range.remove(&evicted);
                self.book.remove(&evicted);
            }
        }
        range.insert(addr);
        self.book.insert(addr, ka);

        true
    }
}

impl<U: Wire<Event>, C: Clock> AddressSource for AddressManager<U, C> {
    fn sample(&mut self) -> Option<(SocketAddr, Source)> {
        if self.address_ranges.is_empty() {
            return None;
        }
        let time = self.clock.local_time();

        // Try a bounded number of times to find a usable address.
        for _ in 0..self.book.len().max(1) {
            let ix = self.rng.usize(..self.address_ranges.len());
            let range = self.address_ranges.values().nth(ix)?;

            let ix = self.rng.usize(..range.len());
            let addr = range.iter().nth(ix)?;

            let Some(ka) = self.book.get_mut(addr) else {
                continue;
            };

            if self.connected.contains(addr) {
                continue;
            }
            if ka.last_attempt.is_some() && ka.last_success.is_none() {
                continue;
            }
            if time - ka.last_sampled.unwrap_or_default() < SAMPLE_TIMEOUT {
                continue;
            }

            ka.last_sampled = Some(time);

            return Some((ka.addr, ka.source));
        }

        None
    }

    fn insert(&mut self, addrs: &[SocketAddr], source: Source) {
        for addr in addrs {
            self.insert_known(KnownAddress::new(*addr, ServiceFlags::NONE, source));
        }
    }

    fn record_local_address(&mut self, addr: SocketAddr) {
        self.local_addrs.insert(addr);
    }
}

/// Key of the range an address belongs to. Diversifying over ranges avoids
/// over-sampling one operator's netblock.
fn address_range(addr: &SocketAddr) -> u8 {
    match addr.ip() {
        std::net::IpAddr::V4(ip) => ip.octets()[1],
        std::net::IpAddr::V6(ip) => ip.octets()[1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::output::Outbox;
    use sqk_types::network::Network;

    fn manager() -> AddressManager<Outbox, LocalTime> {
        AddressManager::new(
            fastrand::Rng::with_seed(7),
            Outbox::new(Network::Simnet),
            LocalTime::from_secs(1_600_000_000),
        )
    }

    #[test]
    fn sampled_addresses_are_not_handed_out_twice_in_a_row() {
        let mut addrmgr = manager();
        let addr: SocketAddr = "8.8.8.8:18666".parse().unwrap();

        addrmgr.insert(&[addr], Source::Imported);
        assert_eq!(addrmgr.sample(), Some((addr, Source::Imported)));
        assert_eq!(addrmgr.sample(), None);
    }

    #[test]
    fn own_addresses_are_never_booked() {
        let mut addrmgr = manager();
        let local: SocketAddr = "1.2.3.4:18666".parse().unwrap();

        addrmgr.record_local_address(local);
        addrmgr.insert(&[local], Source::Dns);

        assert!(addrmgr.is_empty());
    }

    #[test]
    fn wire_addresses_round_trip_through_the_book() {
        let mut addrmgr = manager();
        let addr: SocketAddr = "8.8.8.8:18666".parse().unwrap();
        let from: SocketAddr = "9.9.9.9:18666".parse().unwrap();

        addrmgr.received_addr(
            from,
            vec![(1_599_999_000, Address::new(&addr, ServiceFlags::NONE))],
        );

        assert_eq!(addrmgr.len(), 1);
        let (sampled, source) = addrmgr.sample().unwrap();
        assert_eq!(sampled, addr);
        assert_eq!(source, Source::Peer(from));
    }
}
