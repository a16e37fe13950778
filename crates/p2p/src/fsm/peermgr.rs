//! Peer connection manager: keeps the set of inbound and outbound
//! connections inside its configured bounds and runs the `version`/`verack`
//! handshake with every new peer.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, error};

use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};

use bitcoin::network::address::Address;
use bitcoin::network::constants::ServiceFlags;
use bitcoin::network::message_network::VersionMessage;
use sqk_types::network::Network;

use crate::{
    common::peer::{AddressSource, Source},
    common::time::Clock,
    fsm::handler::DisconnectReason,
    fsm::handler::PeerId,
    net::{Disconnect as NetDisconnect, Link, LocalDuration, LocalTime},
};

use super::output::Wire;

/// How long the remote gets to finish the handshake before we hang up.
pub const HANDSHAKE_TIMEOUT: LocalDuration = LocalDuration::from_secs(30);
/// How long a dial may sit unanswered.
pub const CONNECTION_TIMEOUT: LocalDuration = LocalDuration::from_secs(10);
/// Default lower bound of outbound peer connections.
pub const DEFAULT_MIN_PEERS: usize = 5;
/// Default upper bound of peer connections.
pub const DEFAULT_MAX_PEERS: usize = 10;
/// Default interval between connection-maintenance runs.
pub const DEFAULT_UPDATE_INTERVAL: LocalDuration = LocalDuration::from_secs(10);

/// An event originating in the peer manager.
#[derive(Debug, Clone)]
pub enum Event {
    /// A peer sent us its `version`.
    VersionReceived {
        addr: PeerId,
        msg: VersionMessage,
    },
    /// A peer finished the handshake and is ready for squeak traffic.
    Negotiated {
        addr: PeerId,
        link: Link,
        user_agent: String,
        version: u32,
    },
    /// The maintenance run is dialing an address it picked.
    Connecting(PeerId, Source),
    /// A dial went nowhere.
    ConnectionFailed(PeerId, Arc<std::io::Error>),
    /// A socket to the peer exists; the handshake hasn't started yet.
    Connected(PeerId, Link),
    /// The peer is gone.
    Disconnected(PeerId, NetDisconnect<DisconnectReason>),
}

impl std::fmt::Display for Event {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionReceived { addr, msg } => write!(
                fmt,
                "{}: version = {}, agent = {}, timestamp = {}, nonce = {}",
                addr, msg.version, msg.user_agent, msg.timestamp, msg.nonce,
            ),
            Self::Negotiated {
                addr, user_agent, ..
            } => {
                write!(fmt, "{}: handshake complete ({})", addr, user_agent)
            }
            Self::Connecting(addr, source) => {
                write!(fmt, "dialing {} (address from {})", addr, source)
            }
            Self::Connected(addr, link) => write!(fmt, "{}: connected ({:?})", addr, link),
            Self::ConnectionFailed(addr, err) => {
                write!(fmt, "{}: dial failed: {}", addr, err)
            }
            Self::Disconnected(addr, reason) => {
                write!(fmt, "{}: disconnected ({})", addr, reason)
            }
        }
    }
}

/// Peer manager configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Protocol version.
    pub protocol_version: u32,
    /// Peers we reconnect to with backoff whenever they drop.
    pub persistent: Vec<SocketAddr>,
    /// The maintenance run dials until this many outbound peers are up.
    pub min_peers: usize,
    /// Above this many connections, the newest outbound ones are dropped.
    pub max_peers: usize,
    /// Interval between connection-maintenance runs.
    pub update_interval: LocalDuration,
    /// Longest wait between reconnection attempts to a persistent peer.
    pub retry_max_wait: LocalDuration,
    /// Shortest wait between reconnection attempts to a persistent peer.
    pub retry_min_wait: LocalDuration,
    /// Our user agent.
    pub user_agent: &'static str,
}

/// Where a peer is in the handshake.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq)]
enum HandshakeState {
    /// Both `version`s exchanged; their `verack` is still outstanding.
    AwaitingVerack { since: LocalTime },
    /// Their `verack` arrived; the peer is fully negotiated.
    Negotiated { since: LocalTime },
}

/// An established connection, before and after its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub addr: SocketAddr,
    pub local_addr: SocketAddr,
    /// Who dialed whom.
    pub link: Link,
    /// When the socket came up.
    pub since: LocalTime,
}

/// Everything we track about one peer slot.
#[derive(Debug, Clone)]
pub enum Peer {
    /// A dial is in flight.
    Connecting { time: LocalTime },
    /// A socket exists. `peer` stays empty until their `version` arrives.
    Connected {
        conn: Connection,
        peer: Option<PeerInfo>,
    },
}

/// Protocol-level facts a peer told us about itself.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub services: ServiceFlags,
    pub user_agent: String,
    /// Highest protocol version both sides speak.
    pub version: u32,
    /// Whether this peer is on the persistent list.
    pub persistent: bool,
    /// The nonce from their `version`; equal nonces on two links means we
    /// dialed ourselves.
    nonce: u64,
    state: HandshakeState,
}

impl PeerInfo {
    /// Whether the handshake has completed.
    pub fn is_negotiated(&self) -> bool {
        matches!(self.state, HandshakeState::Negotiated { .. })
    }
}

/// Manages peer connections and handshake.
#[derive(Debug)]
pub struct PeerManager<U, C> {
    /// Peer manager configuration.
    pub config: Config,
    /// Monotonically increasing count of connection-map changes.
    sequence: u64,
    /// Last time the maintenance run executed.
    last_idle: Option<LocalTime>,
    /// One entry per peer slot, keyed by remote address.
    connections: HashMap<SocketAddr, Peer>,
    /// Persistent peers waiting for their reconnect backoff to elapse.
    disconnected: HashMap<SocketAddr, (Option<LocalTime>, usize)>,
    /// Squeak network type.
    network: Network,
    wire: U,
    rng: fastrand::Rng,
    clock: C,
}

impl<U: Wire<Event>, C: Clock> PeerManager<U, C> {
    /// Create a new peer manager.
    pub fn new(config: Config, rng: fastrand::Rng, wire: U, clock: C, network: Network) -> Self {
        Self {
            config,
            sequence: 0,
            last_idle: None,
            connections: HashMap::new(),
            disconnected: HashMap::new(),
            wire,
            rng,
            clock,
            network,
        }
    }

    /// Initialize the peer manager. Must be called once.
    pub async fn initialize<A: AddressSource>(&mut self, addrs: &mut A) {
        for addr in self.config.persistent.clone() {
            if !self.connect(&addr) {
                debug!("{}: unable to connect to persistent peer", addr);
            }
        }
        self.wire.set_timer(self.config.update_interval);
        self.maintain_connections(addrs).await;
    }

    /// The connection-map change sequence number. Bumped whenever a peer
    /// completes its handshake or a connection is dropped.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Schedule a reconnect to a persistent peer that just dropped, doubling
    /// the wait on every failure.
    fn persistent_disconnected(&mut self, addr: &SocketAddr, now: LocalTime) {
        let (retry_at, attempts) = self.disconnected.entry(*addr).or_default();
        let delay = LocalDuration::from_secs(2u64.saturating_pow(*attempts as u32))
            .clamp(self.config.retry_min_wait, self.config.retry_max_wait);

        *retry_at = Some(now + delay);
        *attempts += 1;

        self.wire.set_timer(delay);
    }

    /// Redial persistent peers whose backoff has elapsed.
    fn maintain_persistent(&mut self) {
        let now = self.clock.local_time();
        let mut due = Vec::new();

        for (addr, (retry_at, _)) in &mut self.disconnected {
            if retry_at.map_or(false, |t| t <= now) {
                *retry_at = None;
                due.push(*addr);
            }
        }

        for addr in due {
            if !self.connect(&addr) {
                error!(target: "p2p", "Couldn't establish connection with {addr}");
            }
        }
    }

    /// Called when a peer connected. Returns `true` if the peer was already connected.
    pub fn peer_connected(&mut self, addr: SocketAddr, local_addr: SocketAddr, link: Link) -> bool {
        if self.is_connected(&addr) {
            return true;
        }

        let conn = Connection {
            addr,
            local_addr,
            link,
            since: self.clock.local_time(),
        };
        self.connections
            .insert(addr, Peer::Connected { conn, peer: None });
        self.disconnected.remove(&addr);

        match link {
            Link::Inbound => {
                let inbound = self.connected().filter(|c| c.link.is_inbound()).count();
                if inbound > self.config.max_peers {
                    self.drop_peer(addr, DisconnectReason::ConnectionLimit);
                }
                // Otherwise, their `version` opens the handshake.
            }
            Link::Outbound => {
                let nonce = self.rng.u64(..);
                self.wire
                    .version(addr, self.version(addr, local_addr, nonce));
            }
        }
        // Their `version` has to arrive within the handshake window.
        self.wire.set_timer(HANDSHAKE_TIMEOUT);
        self.wire.event(Event::Connected(addr, link));
        false
    }

    /// Called when a peer disconnected.
    pub async fn peer_disconnected<A: AddressSource>(
        &mut self,
        addr: &SocketAddr,
        addrs: &mut A,
        reason: NetDisconnect<DisconnectReason>,
    ) {
        let now = self.clock.local_time();

        if self.is_connected(addr) {
            self.sequence += 1;
            self.wire.event(Event::Disconnected(*addr, reason));
        } else if self.is_connecting(addr) {
            // A slot still in `Connecting` can only die from a failed dial.
            if let NetDisconnect::ConnectionError(err) = reason {
                self.wire.event(Event::ConnectionFailed(*addr, err));
            }
        }
        self.connections.remove(addr);

        if self.config.persistent.contains(addr) {
            self.persistent_disconnected(addr, now);
        } else {
            // Backfill the outbound slot this peer freed up.
            self.maintain_connections(addrs).await;
        }
    }

    /// Called when a `version` message was received.
    pub fn received_version<A: AddressSource>(
        &mut self,
        addr: &PeerId,
        msg: VersionMessage,
        addrs: &mut A,
    ) {
        if let Err(reason) = self.handle_version(addr, msg, addrs) {
            self.drop_peer(*addr, reason);
        }
    }

    fn handle_version<A: AddressSource>(
        &mut self,
        addr: &PeerId,
        msg: VersionMessage,
        addrs: &mut A,
    ) -> Result<(), DisconnectReason> {
        let now = self.clock.local_time();

        if let Some(Peer::Connected { conn, .. }) = self.connections.get(addr) {
            self.wire.event(Event::VersionReceived {
                addr: *addr,
                msg: msg.clone(),
            });

            let VersionMessage {
                version,
                services,
                user_agent,
                nonce,
                receiver,
                ..
            } = msg;

            if version < self.config.protocol_version {
                return Err(DisconnectReason::PeerProtocolVersion(version));
            }

            // A nonce we've seen on an outbound link coming back at us means
            // the "remote" is this very node.
            if self
                .peers()
                .any(|(peer, conn)| conn.link.is_outbound() && peer.nonce == nonce)
            {
                return Err(DisconnectReason::SelfConnection);
            }

            // The remote tells us what our address looks like from outside.
            if let Ok(addr) = receiver.socket_addr() {
                addrs.record_local_address(addr);
            }

            match conn.link {
                Link::Inbound => {
                    // They opened; we answer with our own version, then ack.
                    let our_nonce = self.rng.u64(..);
                    self.wire
                        .version(conn.addr, self.version(conn.addr, conn.local_addr, our_nonce));
                    self.wire.verack(conn.addr);
                }
                Link::Outbound => {
                    // Our version is already out; ack theirs.
                    self.wire.verack(conn.addr);
                }
            }
            self.wire.set_timer(HANDSHAKE_TIMEOUT);

            let conn = conn.clone();
            let persistent = self.config.persistent.contains(&conn.addr);

            self.connections.insert(
                conn.addr,
                Peer::Connected {
                    peer: Some(PeerInfo {
                        nonce,
                        services,
                        persistent,
                        user_agent,
                        state: HandshakeState::AwaitingVerack { since: now },
                        version: u32::min(self.config.protocol_version, version),
                    }),
                    conn,
                },
            );
        }

        Ok(())
    }

    /// Called when a `verack` message was received. The handshake is complete
    /// once both sides have acknowledged each other's `version`.
    pub fn received_verack(
        &mut self,
        addr: &PeerId,
        now: LocalTime,
    ) -> Option<(PeerInfo, Connection)> {
        if let Some(Peer::Connected {
            peer: Some(peer),
            conn,
        }) = self.connections.get_mut(addr)
        {
            if let HandshakeState::AwaitingVerack { .. } = peer.state {
                peer.state = HandshakeState::Negotiated { since: now };

                let (peer, conn) = (peer.clone(), conn.clone());

                self.sequence += 1;
                self.wire.event(Event::Negotiated {
                    addr: *addr,
                    link: conn.link,
                    user_agent: peer.user_agent.clone(),
                    version: peer.version,
                });

                return Some((peer, conn));
            } else {
                self.drop_peer(
                    *addr,
                    DisconnectReason::PeerMisbehaving("unexpected `verack` message received"),
                );
            }
        }
        None
    }

    /// Called when a tick was received: expire stalled dials and handshakes,
    /// trim past the upper bound, backfill towards the lower bound.
    pub async fn received_wake<A: AddressSource>(&mut self, addrs: &mut A) {
        let now = self.clock.local_time();
        let mut expired = Vec::new();

        for (addr, slot) in &self.connections {
            match slot {
                Peer::Connecting { time } if now - *time >= CONNECTION_TIMEOUT => {
                    expired.push((*addr, "connection"));
                }
                Peer::Connected { conn, peer: None }
                    if now - conn.since >= HANDSHAKE_TIMEOUT =>
                {
                    expired.push((*addr, "handshake"));
                }
                Peer::Connected {
                    peer: Some(peer), ..
                } => {
                    if let HandshakeState::AwaitingVerack { since } = peer.state {
                        if now - since >= HANDSHAKE_TIMEOUT {
                            expired.push((*addr, "handshake"));
                        }
                    }
                }
                _ => {}
            }
        }
        for (addr, reason) in expired {
            self.drop_peer(addr, DisconnectReason::PeerTimeout(reason));
        }

        self.enforce_max_peers();

        if now - self.last_idle.unwrap_or_default() >= self.config.update_interval {
            self.maintain_connections(addrs).await;
            self.wire.set_timer(self.config.update_interval);
            self.last_idle = Some(now);
        }

        self.maintain_persistent();
    }

    /// The `version` message we announce ourselves with.
    pub fn version(
        &self,
        addr: SocketAddr,
        local_addr: SocketAddr,
        nonce: u64,
    ) -> VersionMessage {
        VersionMessage {
            version: self.config.protocol_version,
            // Squeak peers don't advertise service bits.
            services: ServiceFlags::NONE,
            timestamp: self.clock.local_time().as_secs() as i64,
            receiver: Address::new(&addr, ServiceFlags::NONE),
            // Our listen address; the remote knows better than we do.
            sender: Address::new(&local_addr, ServiceFlags::NONE),
            nonce,
            user_agent: self.config.user_agent.to_owned(),
            // The squeak handshake carries no chain height.
            start_height: 0,
            relay: true,
        }
    }
}

/// Connection management functions.
impl<U: Wire<Event>, C: Clock> PeerManager<U, C> {
    /// Called when a peer is being connected to.
    pub fn peer_attempted(&mut self, addr: &SocketAddr) {
        // Every dial starts here, so the slot must already exist; unless the
        // remote dialed us first while our own dial was in flight.
        debug_assert!(self.is_connecting(addr) || self.is_inbound(addr));
    }

    /// Whether the given peer is connected via an inbound link.
    pub fn is_inbound(&self, addr: &PeerId) -> bool {
        matches!(
            self.connections.get(addr),
            Some(Peer::Connected { conn, .. }) if conn.link.is_inbound()
        )
    }

    /// Whether a dial to the given peer is in flight.
    pub fn is_connecting(&self, addr: &PeerId) -> bool {
        matches!(self.connections.get(addr), Some(Peer::Connecting { .. }))
    }

    /// Whether a socket to the given peer exists.
    pub fn is_connected(&self, addr: &PeerId) -> bool {
        matches!(self.connections.get(addr), Some(Peer::Connected { .. }))
    }

    /// Whether nothing at all is going on with the given peer.
    pub fn is_disconnected(&self, addr: &PeerId) -> bool {
        !self.is_connected(addr) && !self.is_connecting(addr)
    }

    /// Peers that have at least sent their `version`.
    pub fn peers(&self) -> impl Iterator<Item = (&PeerInfo, &Connection)> + Clone {
        self.connections.values().filter_map(|slot| match slot {
            Peer::Connected {
                conn,
                peer: Some(peer),
            } => Some((peer, conn)),
            _ => None,
        })
    }

    /// Peers with a dial in flight.
    pub fn connecting(&self) -> impl Iterator<Item = &SocketAddr> {
        self.connections
            .iter()
            .filter(|(_, slot)| matches!(slot, Peer::Connecting { .. }))
            .map(|(addr, _)| addr)
    }

    /// Peers with an established socket, negotiated or not.
    pub fn connected(&self) -> impl Iterator<Item = &Connection> + Clone {
        self.connections.values().filter_map(|slot| match slot {
            Peer::Connected { conn, .. } => Some(conn),
            _ => None,
        })
    }

    /// Fully negotiated peers on the given link.
    pub fn negotiated(&self, link: Link) -> impl Iterator<Item = (&PeerInfo, &Connection)> + Clone {
        self.peers()
            .filter(move |(p, c)| p.is_negotiated() && c.link == link)
    }

    /// Connect to a peer. Connecting to an already-connected address is a no-op.
    pub fn connect(&mut self, addr: &PeerId) -> bool {
        if self.is_connected(addr) || self.is_connecting(addr) {
            return true;
        }

        self.connections.insert(
            *addr,
            Peer::Connecting {
                time: self.clock.local_time(),
            },
        );
        self.wire.connect(*addr, CONNECTION_TIMEOUT);

        true
    }

    /// Disconnect from a peer.
    pub fn disconnect(&mut self, addr: PeerId, reason: DisconnectReason) {
        if self.is_connected(&addr) {
            self.drop_peer(addr, reason);
        }
    }

    /// Hand the disconnect over to the reactor.
    fn drop_peer(&mut self, addr: PeerId, reason: DisconnectReason) {
        self.wire.disconnect(addr, reason);
    }

    /// Disconnect the newest outbound peers until we are back at the upper
    /// bound.
    fn enforce_max_peers(&mut self) {
        let outbound = self.negotiated(Link::Outbound).count();
        if outbound <= self.config.max_peers {
            return;
        }

        let mut newest: Vec<(LocalTime, SocketAddr)> = self
            .negotiated(Link::Outbound)
            .map(|(_, c)| (c.since, c.addr))
            .collect();
        newest.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, addr) in newest.into_iter().take(outbound - self.config.max_peers) {
            self.drop_peer(addr, DisconnectReason::ConnectionLimit);
        }
    }

    /// How many new outbound connections we should attempt.
    fn delta(&self) -> usize {
        let negotiated = self.negotiated(Link::Outbound).count();
        let connecting = self.connecting().count();
        let pending = self
            .connections
            .values()
            .filter(|slot| {
                matches!(slot, Peer::Connected { conn, peer } if conn.link.is_outbound() && peer.is_none())
            })
            .count();

        self.config
            .min_peers
            .saturating_sub(negotiated + connecting + pending)
    }

    /// Attempt to maintain a certain number of outbound peers.
    async fn maintain_connections<A: AddressSource>(&mut self, addrs: &mut A) {
        let mut delta = self.delta();

        // Prefer addresses from the known-address book; if it runs dry, fall
        // back to the network's DNS seeds.
        while delta > 0 {
            let Some((sockaddr, source)) = addrs.sample() else {
                self.seed_from_dns(addrs).await;
                break;
            };

            if self.is_connected(&sockaddr) || self.is_connecting(&sockaddr) {
                continue;
            }
            if self.connect(&sockaddr) {
                self.wire.event(Event::Connecting(sockaddr, source));
                delta -= 1;
            }
        }
    }

    /// Resolve the network's DNS seeds and feed the results into the address
    /// book for the next maintenance run.
    async fn seed_from_dns<A: AddressSource>(&mut self, addrs: &mut A) {
        let seeds = dns_seeds(self.network);
        if seeds.is_empty() {
            debug!(target: "p2p", "Address book exhausted and no DNS seeds for {}", self.network);
            return;
        }

        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

        let seed_ind = self.rng.usize(0..seeds.len());
        let dns_seed = seeds[seed_ind];
        let port = self.network.default_port();

        match resolver.lookup_ip(dns_seed).await {
            Ok(response) => {
                let ips: Vec<SocketAddr> = response
                    .iter()
                    .map(|ip| SocketAddr::new(ip, port))
                    .collect();

                addrs.insert(&ips, Source::Dns);
            }
            Err(e) => error!("Failed to get addresses from DNS seed {dns_seed}: {e}"),
        }
    }
}

/// DNS seeds for the given network.
fn dns_seeds(network: Network) -> &'static [&'static str] {
    match network {
        Network::Mainnet => &["seed.squeaknode.org", "dnsseed.squeak.network"],
        Network::Testnet => &["testnet-seed.squeaknode.org"],
        Network::Simnet => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::output::{Io, Outbox};

    struct NoAddrs;

    impl AddressSource for NoAddrs {
        fn sample(&mut self) -> Option<(SocketAddr, Source)> {
            None
        }
        fn insert(&mut self, _addrs: &[SocketAddr], _source: Source) {}
        fn record_local_address(&mut self, _addr: SocketAddr) {}
    }

    fn manager() -> (PeerManager<Outbox, LocalTime>, Outbox) {
        let outbox = Outbox::new(Network::Simnet);
        let config = Config {
            protocol_version: crate::fsm::handler::PROTOCOL_VERSION,
            persistent: vec![],
            min_peers: 2,
            max_peers: 3,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            retry_max_wait: LocalDuration::from_mins(60),
            retry_min_wait: LocalDuration::from_secs(1),
            user_agent: "/test:0.1.0/",
        };
        let clock = LocalTime::from_secs(1_600_000_000);
        let mgr = PeerManager::new(
            config,
            fastrand::Rng::with_seed(42),
            outbox.clone(),
            clock,
            Network::Simnet,
        );

        (mgr, outbox)
    }

    /// Drain the outbox and return the commands of written messages.
    fn sent(outbox: &mut Outbox) -> Vec<&'static str> {
        let mut cmds = Vec::new();
        for io in outbox.by_ref() {
            if let Io::Write(_, raw) = io {
                cmds.push(raw.payload.cmd());
            }
        }
        cmds
    }

    fn remote_version(mgr: &PeerManager<Outbox, LocalTime>, nonce: u64) -> VersionMessage {
        let addr: SocketAddr = "127.0.0.1:18666".parse().unwrap();
        let mut msg = mgr.version(addr, addr, nonce);
        msg.user_agent = "/remote:0.1.0/".to_owned();
        msg
    }

    #[test]
    fn outbound_handshake_completes_on_verack() {
        let (mut mgr, mut outbox) = manager();
        let addr: SocketAddr = "8.8.8.8:18666".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:18666".parse().unwrap();

        assert!(mgr.connect(&addr));
        assert!(mgr.is_connecting(&addr));

        assert!(!mgr.peer_connected(addr, local, Link::Outbound));
        assert_eq!(sent(&mut outbox), vec!["version"]);

        mgr.received_version(&addr, remote_version(&mgr, 7), &mut NoAddrs);
        assert_eq!(sent(&mut outbox), vec!["verack"]);

        let negotiated = mgr.received_verack(&addr, LocalTime::from_secs(1_600_000_001));
        assert!(negotiated.is_some());
        assert_eq!(mgr.sequence(), 1);
        assert_eq!(mgr.negotiated(Link::Outbound).count(), 1);
    }

    #[test]
    fn inbound_handshake_replies_with_version_and_verack() {
        let (mut mgr, mut outbox) = manager();
        let addr: SocketAddr = "8.8.8.8:44551".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:18666".parse().unwrap();

        assert!(!mgr.peer_connected(addr, local, Link::Inbound));
        assert_eq!(sent(&mut outbox), Vec::<&str>::new());

        mgr.received_version(&addr, remote_version(&mgr, 7), &mut NoAddrs);
        assert_eq!(sent(&mut outbox), vec!["version", "verack"]);
    }

    #[test]
    fn connect_is_idempotent() {
        let (mut mgr, _outbox) = manager();
        let addr: SocketAddr = "8.8.8.8:18666".parse().unwrap();

        assert!(mgr.connect(&addr));
        assert!(mgr.connect(&addr));
        assert_eq!(mgr.connecting().count(), 1);
    }

    #[test]
    fn old_protocol_version_is_rejected() {
        let (mut mgr, mut outbox) = manager();
        let addr: SocketAddr = "8.8.8.8:18666".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:18666".parse().unwrap();

        mgr.peer_connected(addr, local, Link::Outbound);
        sent(&mut outbox);

        let mut version = remote_version(&mgr, 7);
        version.version = 1;
        mgr.received_version(&addr, version, &mut NoAddrs);

        let disconnects = outbox
            .by_ref()
            .filter(|io| matches!(io, Io::Disconnect(_, DisconnectReason::PeerProtocolVersion(_))))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[test]
    fn unsolicited_verack_disconnects() {
        let (mut mgr, mut outbox) = manager();
        let addr: SocketAddr = "8.8.8.8:18666".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:18666".parse().unwrap();

        mgr.peer_connected(addr, local, Link::Outbound);
        mgr.received_version(&addr, remote_version(&mgr, 7), &mut NoAddrs);
        mgr.received_verack(&addr, LocalTime::from_secs(1_600_000_001));
        sent(&mut outbox);

        // A second verack is a protocol violation.
        mgr.received_verack(&addr, LocalTime::from_secs(1_600_000_002));

        let disconnects = outbox
            .by_ref()
            .filter(|io| matches!(io, Io::Disconnect(_, DisconnectReason::PeerMisbehaving(_))))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn handshake_times_out() {
        let (mut mgr, mut outbox) = manager();
        let addr: SocketAddr = "8.8.8.8:18666".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:18666".parse().unwrap();

        mgr.peer_connected(addr, local, Link::Outbound);
        sent(&mut outbox);

        mgr.clock = LocalTime::from_secs(1_600_000_000) + HANDSHAKE_TIMEOUT;
        mgr.received_wake(&mut NoAddrs).await;

        let timeouts = outbox
            .by_ref()
            .filter(|io| matches!(io, Io::Disconnect(_, DisconnectReason::PeerTimeout(_))))
            .count();
        assert_eq!(timeouts, 1);
    }

    #[tokio::test]
    async fn excess_outbound_peers_are_trimmed_newest_first() {
        let (mut mgr, mut outbox) = manager();
        let local: SocketAddr = "127.0.0.1:18666".parse().unwrap();

        let mut newest = None;
        for i in 0..4u8 {
            let addr: SocketAddr = format!("8.8.8.{}:18666", i + 1).parse().unwrap();

            mgr.clock = LocalTime::from_secs(1_600_000_000 + u64::from(i));
            mgr.peer_connected(addr, local, Link::Outbound);
            mgr.received_version(&addr, remote_version(&mgr, u64::from(i) + 100), &mut NoAddrs);
            mgr.received_verack(&addr, mgr.clock);
            newest = Some(addr);
        }
        sent(&mut outbox);
        assert_eq!(mgr.negotiated(Link::Outbound).count(), 4);

        mgr.received_wake(&mut NoAddrs).await;

        let dropped: Vec<_> = outbox
            .by_ref()
            .filter_map(|io| match io {
                Io::Disconnect(addr, DisconnectReason::ConnectionLimit) => Some(addr),
                _ => None,
            })
            .collect();
        assert_eq!(dropped, vec![newest.unwrap()]);
    }
}
