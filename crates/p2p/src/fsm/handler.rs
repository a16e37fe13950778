//! Squeak protocol state machine.
use std::{borrow::Cow, fmt, net, net::SocketAddr};

use async_trait::async_trait;
use bitcoin::network::Magic;
use flume as chan;
use tracing::{debug, warn};

use event_bus::{typeid, EventBus};
use sqk_types::network::Network;
use sqk_types::{
    ControllerMessage, ControllerP2PMessage, InterestFilter, Inventory, NetworkMessage, Offer,
    PeerSummary, RawNetworkMessage, SqueakBundle, SqueakHash,
};

use crate::fsm::output::Outbox;
use crate::{
    common::peer::{AddressSource, Source},
    common::time::AdjustedClock,
    fsm::addrmgr::AddressManager,
    fsm::peermgr::{Connection, PeerInfo, PeerManager},
    fsm::pingmgr::PingManager,
    fsm::Event,
    fsm::{output, peermgr},
    net::{Disconnect, Link, LocalDuration, LocalTime},
};

pub type PeerId = net::SocketAddr;

/// Peer-to-peer protocol version.
pub const PROTOCOL_VERSION: u32 = 70002;
/// User agent included in `version` messages.
pub const USER_AGENT: &str = concat!("/squeaknode:", env!("CARGO_PKG_VERSION"), "/");

/// Configured connection bounds.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Lower bound of outbound peer connections.
    pub min_peers: usize,
    /// Upper bound of peer connections.
    pub max_peers: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_peers: peermgr::DEFAULT_MIN_PEERS,
            max_peers: peermgr::DEFAULT_MAX_PEERS,
        }
    }
}

/// Disconnect reason.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    /// Peer is misbehaving.
    PeerMisbehaving(&'static str),
    /// Peer protocol version is too old or too recent.
    PeerProtocolVersion(u32),
    /// Peer magic is invalid.
    PeerMagic(Magic),
    /// Peer timed out.
    PeerTimeout(&'static str),
    /// Connection to self was detected.
    SelfConnection,
    /// Connection limit reached.
    ConnectionLimit,
    /// Error trying to decode incoming message.
    DecodeError,
    /// Peer was forced to disconnect by external command.
    Command,
}

impl DisconnectReason {
    /// Check whether the disconnect reason is transient, ie. may no longer be
    /// applicable after some time.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionLimit | Self::PeerTimeout(_))
    }
}

impl From<DisconnectReason> for crate::net::Disconnect<DisconnectReason> {
    fn from(reason: DisconnectReason) -> Self {
        Self::StateMachine(reason)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerMisbehaving(reason) => write!(f, "peer misbehaving: {}", reason),
            Self::PeerProtocolVersion(_) => write!(f, "peer protocol version mismatch"),
            Self::PeerMagic(magic) => write!(f, "received message with invalid magic: {}", magic),
            Self::PeerTimeout(s) => write!(f, "peer timed out: {:?}", s),
            Self::SelfConnection => write!(f, "detected self-connection"),
            Self::ConnectionLimit => write!(f, "connection limit reached"),
            Self::DecodeError => write!(f, "message decode error"),
            Self::Command => write!(f, "received external command"),
        }
    }
}

/// Snapshot of the connection map, together with the change sequence number
/// at the time it was taken.
#[derive(Debug, Clone)]
pub struct PeersSnapshot {
    /// Connection-map change counter.
    pub sequence: u64,
    /// Fully negotiated peers.
    pub peers: Vec<PeerSummary>,
}

/// A command or request that can be sent to the protocol.
#[derive(Clone)]
pub enum Command {
    /// Get connected peers.
    GetPeers(chan::Sender<PeersSnapshot>),
    /// Connect to a peer.
    Connect(SocketAddr),
    /// Disconnect from a peer.
    Disconnect(SocketAddr),
    /// Broadcast to peers matching the predicate.
    Broadcast(NetworkMessage, for<'a> fn(&'a PeerSummary) -> bool, chan::Sender<Vec<PeerId>>),
    /// Advertise squeaks to all negotiated peers.
    SendInv(Vec<Inventory>),
    /// Request squeaks from the given peer.
    SendGetSqueaks(Vec<Inventory>, SocketAddr),
    /// Send squeaks to the given peer.
    SendSqueaks(Vec<SqueakBundle>, SocketAddr),
    /// Request an offer from the given peer.
    SendGetOffer(SqueakHash, SocketAddr),
    /// Send an offer to the given peer.
    SendOffer(Offer, SocketAddr),
    /// Register an interest filter with the given peer.
    SendSubscribe(InterestFilter, SocketAddr),
    /// Withdraw an interest filter from the given peer.
    SendUnsubscribe(InterestFilter, SocketAddr),
    /// Import addresses into the address book.
    ImportAddresses(Vec<SocketAddr>),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetPeers(_) => write!(f, "GetPeers"),
            Self::Connect(addr) => write!(f, "Connect({})", addr),
            Self::Disconnect(addr) => write!(f, "Disconnect({})", addr),
            Self::Broadcast(msg, _, _) => write!(f, "Broadcast({})", msg.cmd()),
            Self::SendInv(inv) => write!(f, "SendInv({} item(s))", inv.len()),
            Self::SendGetSqueaks(inv, addr) => {
                write!(f, "SendGetSqueaks({} item(s)) to {}", inv.len(), addr)
            }
            Self::SendSqueaks(squeaks, addr) => {
                write!(f, "SendSqueaks({} squeak(s)) to {}", squeaks.len(), addr)
            }
            Self::SendGetOffer(hash, addr) => write!(f, "SendGetOffer({}) to {}", hash, addr),
            Self::SendOffer(offer, addr) => {
                write!(f, "SendOffer({}) to {}", offer.squeak_hash, addr)
            }
            Self::SendSubscribe(_, addr) => write!(f, "SendSubscribe to {}", addr),
            Self::SendUnsubscribe(_, addr) => write!(f, "SendUnsubscribe to {}", addr),
            Self::ImportAddresses(addrs) => write!(f, "ImportAddresses({:?})", addrs),
        }
    }
}

/// An instance of the squeak peer-to-peer protocol.
pub struct StateMachine<C> {
    /// Squeak network we're connecting to.
    pub network: Network,
    /// Peer address manager.
    addrmgr: AddressManager<Outbox, C>,
    /// Ping manager.
    pingmgr: PingManager<Outbox, C>,
    /// Peer manager.
    pub peermgr: PeerManager<Outbox, C>,
    /// Clock, set by the reactor on every tick.
    pub clock: C,
    /// Random number generator.
    pub rng: fastrand::Rng,
    /// Outbound I/O. Used to communicate protocol events with a reactor.
    pub outbox: Outbox,
    event_bus: EventBus,
}

/// State machine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Squeak network we are connected to.
    pub network: Network,
    /// Peers to always stay connected to.
    pub connect: Vec<net::SocketAddr>,
    /// Community nodes worth knowing about before any addresses are learned.
    pub seeds: Vec<net::SocketAddr>,
    /// Our user agent.
    pub user_agent: &'static str,
    /// Configured connection bounds.
    pub limits: Limits,
    /// Interval between connection-maintenance runs.
    pub update_interval: LocalDuration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            connect: Vec::new(),
            seeds: Vec::new(),
            user_agent: USER_AGENT,
            limits: Limits::default(),
            update_interval: peermgr::DEFAULT_UPDATE_INTERVAL,
        }
    }
}

impl<C> Iterator for StateMachine<C> {
    type Item = output::Io;

    fn next(&mut self) -> Option<output::Io> {
        self.outbox.next()
    }
}

fn summary(peer: &PeerInfo, conn: &Connection) -> PeerSummary {
    PeerSummary {
        address: conn.addr,
        outbound: conn.link.is_outbound(),
        user_agent: peer.user_agent.clone(),
        version: peer.version,
        connected_since: conn.since.as_secs(),
    }
}

impl<C: AdjustedClock<PeerId> + Sync + Send> StateMachine<C> {
    /// Construct a new protocol instance.
    pub fn new(clock: C, rng: fastrand::Rng, config: Config, full_event_bus: &EventBus) -> Self {
        let event_bus = full_event_bus
            .extract(&typeid![ControllerMessage], &[])
            .expect("event channels must be presented");

        let Config {
            network,
            connect,
            seeds,
            user_agent,
            limits,
            update_interval,
        } = config;

        let outbox = Outbox::new(network);
        let pingmgr = PingManager::new(rng.clone(), outbox.clone(), clock.clone());
        let peermgr = PeerManager::new(
            peermgr::Config {
                protocol_version: PROTOCOL_VERSION,
                persistent: connect.clone(),
                min_peers: limits.min_peers,
                max_peers: limits.max_peers,
                update_interval,
                retry_max_wait: LocalDuration::from_mins(60),
                retry_min_wait: LocalDuration::from_secs(1),
                user_agent,
            },
            rng.clone(),
            outbox.clone(),
            clock.clone(),
            network,
        );
        let mut addrmgr = AddressManager::new(rng.clone(), outbox.clone(), clock.clone());
        addrmgr.insert(&connect, Source::Imported);
        addrmgr.insert(&seeds, Source::Imported);

        Self {
            network,
            clock,
            addrmgr,
            pingmgr,
            peermgr,
            rng,
            outbox,
            event_bus,
        }
    }

    /// Process a user command.
    pub async fn command(&mut self, cmd: Command) {
        debug!(target: "p2p", "Received command: {:?}", cmd);

        match cmd {
            Command::GetPeers(reply) => {
                let peers = self
                    .peermgr
                    .peers()
                    .filter(|(p, _)| p.is_negotiated())
                    .map(|(p, c)| summary(p, c))
                    .collect();

                reply
                    .send_async(PeersSnapshot {
                        sequence: self.peermgr.sequence(),
                        peers,
                    })
                    .await
                    .ok();
            }
            Command::Connect(addr) => {
                self.peermgr.connect(&addr);
            }
            Command::Disconnect(addr) => {
                self.disconnect(addr, DisconnectReason::Command);
            }
            Command::Broadcast(msg, predicate, reply) => {
                let peers = self.broadcast(msg, |p| predicate(p));
                reply.send_async(peers).await.ok();
            }
            Command::SendInv(inv) => {
                self.broadcast(NetworkMessage::Inv(inv), |_| true);
            }
            Command::SendGetSqueaks(inv, addr) => {
                self.send(NetworkMessage::GetSqueaks(inv), addr);
            }
            Command::SendSqueaks(squeaks, addr) => {
                for squeak in squeaks {
                    self.send(NetworkMessage::Squeak(squeak.without_decryption_key()), addr);
                }
            }
            Command::SendGetOffer(hash, addr) => {
                self.send(NetworkMessage::GetOffer(hash), addr);
            }
            Command::SendOffer(offer, addr) => {
                self.send(NetworkMessage::Offer(offer), addr);
            }
            Command::SendSubscribe(filter, addr) => {
                self.send(NetworkMessage::Subscribe(filter), addr);
            }
            Command::SendUnsubscribe(filter, addr) => {
                self.send(NetworkMessage::Unsubscribe(filter), addr);
            }
            Command::ImportAddresses(addrs) => {
                self.addrmgr.insert(&addrs, Source::Imported);
            }
        }
    }

    /// Disconnect a peer.
    pub fn disconnect(&mut self, addr: PeerId, reason: DisconnectReason) {
        self.peermgr.disconnect(addr, reason);
    }

    /// Send a message to all negotiated peers matching the predicate.
    fn broadcast<Q>(&mut self, msg: NetworkMessage, predicate: Q) -> Vec<PeerId>
    where
        Q: Fn(&PeerSummary) -> bool,
    {
        let mut recipients = Vec::new();

        for (peer_info, connection) in self.peermgr.peers() {
            if peer_info.is_negotiated() && predicate(&summary(peer_info, connection)) {
                recipients.push(connection.addr);
            }
        }
        for addr in &recipients {
            self.outbox.message(*addr, msg.clone());
        }

        recipients
    }

    /// Send a message to the given peer.
    fn send(&mut self, msg: NetworkMessage, addr: PeerId) {
        self.outbox.message(addr, msg);
    }

    /// Whether the given peer has completed its handshake.
    fn is_negotiated(&self, addr: &PeerId) -> bool {
        self.peermgr
            .peers()
            .any(|(p, c)| c.addr == *addr && p.is_negotiated())
    }

    /// Forward a message to the controller service.
    async fn forward(&self, msg: ControllerP2PMessage) {
        self.event_bus.send(ControllerMessage::P2P(msg)).await;
    }
}

#[async_trait]
impl<C: AdjustedClock<PeerId> + Sync + Send> crate::net::StateMachine for StateMachine<C> {
    type Message = RawNetworkMessage;
    type Event = Event;
    type DisconnectReason = DisconnectReason;

    async fn initialize(&mut self, time: LocalTime) {
        self.clock.set(time);
        self.outbox.event(Event::Initializing);
        self.addrmgr.initialize();
        self.peermgr.initialize(&mut self.addrmgr).await;

        self.outbox.event(Event::Ready { time });
    }

    async fn message_received(&mut self, addr: &SocketAddr, msg: Cow<'_, RawNetworkMessage>) {
        let now = self.clock.local_time();
        let addr = *addr;
        let msg = msg.into_owned();

        if msg.magic != self.network.magic() {
            self.disconnect(addr, DisconnectReason::PeerMagic(msg.magic));
            return;
        }

        if !self.peermgr.is_connected(&addr) {
            debug!(target: "p2p", "Received {:?} from unknown peer {}", msg.command(), addr);
            return;
        }

        debug!(target: "p2p", "Received {:?} from {}", msg.command(), addr);

        // Any traffic counts against the silence timeout.
        self.pingmgr.received_message(&addr);

        match msg.payload {
            NetworkMessage::Version(version) => {
                self.peermgr
                    .received_version(&addr, version, &mut self.addrmgr);
            }
            NetworkMessage::Verack => {
                if let Some((peer, conn)) = self.peermgr.received_verack(&addr, now) {
                    self.addrmgr.peer_negotiated(&addr);
                    self.pingmgr.peer_negotiated(conn.addr);

                    self.event_bus
                        .send(ControllerMessage::PeerConnected(summary(&peer, &conn)))
                        .await;
                }
            }
            NetworkMessage::Ping(nonce) => {
                if self.pingmgr.received_ping(addr, nonce) {
                    self.addrmgr.peer_active(addr);
                }
            }
            NetworkMessage::Pong(nonce) => {
                if self.pingmgr.received_pong(addr, nonce, now) {
                    self.addrmgr.peer_active(addr);
                }
            }
            NetworkMessage::GetAddr => {
                self.addrmgr.received_getaddr(&addr);
            }
            NetworkMessage::Addr(addresses) => {
                self.addrmgr.received_addr(addr, addresses);
            }
            NetworkMessage::Inv(inv) => {
                if self.is_negotiated(&addr) {
                    self.forward(ControllerP2PMessage::Inv { inv, sender: addr })
                        .await;
                }
            }
            NetworkMessage::GetSqueaks(inv) => {
                if self.is_negotiated(&addr) {
                    self.forward(ControllerP2PMessage::GetSqueaks { inv, sender: addr })
                        .await;
                }
            }
            NetworkMessage::Squeak(squeak) => {
                if self.is_negotiated(&addr) {
                    self.forward(ControllerP2PMessage::Squeak {
                        squeak,
                        sender: addr,
                    })
                    .await;
                }
            }
            NetworkMessage::GetOffer(squeak_hash) => {
                if self.is_negotiated(&addr) {
                    self.forward(ControllerP2PMessage::GetOffer {
                        squeak_hash,
                        sender: addr,
                    })
                    .await;
                }
            }
            NetworkMessage::Offer(offer) => {
                if self.is_negotiated(&addr) {
                    self.forward(ControllerP2PMessage::Offer { offer, sender: addr })
                        .await;
                }
            }
            NetworkMessage::Subscribe(filter) => {
                if self.is_negotiated(&addr) {
                    self.forward(ControllerP2PMessage::Subscribe {
                        filter,
                        sender: addr,
                    })
                    .await;
                }
            }
            NetworkMessage::Unsubscribe(filter) => {
                if self.is_negotiated(&addr) {
                    self.forward(ControllerP2PMessage::Unsubscribe {
                        filter,
                        sender: addr,
                    })
                    .await;
                }
            }
            NetworkMessage::Unknown { command, .. } => {
                warn!(target: "p2p", "Received unknown command {:?} from {}", command, addr);
                self.disconnect(
                    addr,
                    DisconnectReason::PeerMisbehaving("unknown message command"),
                );
            }
        }
    }

    fn attempted(&mut self, addr: &net::SocketAddr) {
        self.addrmgr.peer_attempted(addr);
        self.peermgr.peer_attempted(addr);
    }

    fn connected(&mut self, addr: net::SocketAddr, local_addr: &net::SocketAddr, link: Link) -> bool {
        if self.peermgr.peer_connected(addr, *local_addr, link) {
            return false;
        }
        self.addrmgr.peer_connected(&addr);

        true
    }

    async fn disconnected(&mut self, addr: &SocketAddr, reason: Disconnect<DisconnectReason>) {
        // Capture the peer's summary before the managers forget it.
        let negotiated = self
            .peermgr
            .peers()
            .find(|(p, c)| c.addr == *addr && p.is_negotiated())
            .map(|(p, c)| summary(p, c));

        self.addrmgr.peer_disconnected(addr);
        self.pingmgr.peer_disconnected(addr);
        self.peermgr
            .peer_disconnected(addr, &mut self.addrmgr, reason)
            .await;

        if let Some(peer) = negotiated {
            self.event_bus
                .send(ControllerMessage::PeerDisconnected(peer))
                .await;
        }
    }

    fn is_disconnected(&mut self, addr: SocketAddr) -> bool {
        self.peermgr.is_disconnected(&addr)
    }

    fn tick(&mut self, local_time: LocalTime) {
        self.clock.set(local_time);
    }

    async fn timer_expired(&mut self) {
        self.pingmgr.received_wake();
        self.addrmgr.received_wake();
        self.peermgr.received_wake(&mut self.addrmgr).await;
    }

    fn is_connected(&mut self, addr: SocketAddr) -> bool {
        self.peermgr.is_connected(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::WallClock;
    use crate::net::StateMachine as _;
    use bitcoin::hashes::Hash;

    type Machine = StateMachine<WallClock>;

    fn machine() -> (Machine, EventBus) {
        let mut bus = EventBus::default();
        bus.register::<ControllerMessage>(None);

        let machine = StateMachine::new(
            WallClock::new(LocalTime::from_secs(1_600_000_000)),
            fastrand::Rng::with_seed(7),
            Config {
                network: Network::Simnet,
                ..Config::default()
            },
            &bus,
        );

        (machine, bus)
    }

    fn raw(payload: NetworkMessage) -> RawNetworkMessage {
        RawNetworkMessage {
            magic: Network::Simnet.magic(),
            payload,
        }
    }

    /// Complete an inbound handshake with the given peer address.
    async fn negotiate(machine: &mut Machine, addr: SocketAddr) {
        let local: SocketAddr = "127.0.0.1:18666".parse().unwrap();

        machine.connected(addr, &local, Link::Inbound);

        let version = machine.peermgr.version(addr, local, 99);
        machine
            .message_received(&addr, Cow::Owned(raw(NetworkMessage::Version(version))))
            .await;
        machine
            .message_received(&addr, Cow::Owned(raw(NetworkMessage::Verack)))
            .await;
    }

    #[tokio::test]
    async fn handshake_publishes_peer_connected() {
        let (mut machine, bus) = machine();
        let events = bus.subscribe::<ControllerMessage>();
        let addr: SocketAddr = "8.8.8.8:44556".parse().unwrap();

        negotiate(&mut machine, addr).await;

        match events.recv().await.unwrap() {
            ControllerMessage::PeerConnected(peer) => {
                assert_eq!(peer.address, addr);
                assert!(!peer.outbound);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn squeak_messages_are_forwarded_after_handshake() {
        let (mut machine, bus) = machine();
        let events = bus.subscribe::<ControllerMessage>();
        let addr: SocketAddr = "8.8.8.8:44556".parse().unwrap();
        let hash = SqueakHash::from_byte_array([5u8; 32]);

        negotiate(&mut machine, addr).await;
        let _connected = events.recv().await.unwrap();

        machine
            .message_received(
                &addr,
                Cow::Owned(raw(NetworkMessage::Inv(vec![Inventory::Squeak(hash)]))),
            )
            .await;

        match events.recv().await.unwrap() {
            ControllerMessage::P2P(ControllerP2PMessage::Inv { inv, sender }) => {
                assert_eq!(inv, vec![Inventory::Squeak(hash)]);
                assert_eq!(sender, addr);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn squeak_messages_before_handshake_are_dropped() {
        let (mut machine, bus) = machine();
        let events = bus.subscribe::<ControllerMessage>();
        let addr: SocketAddr = "8.8.8.8:44556".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:18666".parse().unwrap();

        machine.connected(addr, &local, Link::Inbound);
        machine
            .message_received(
                &addr,
                Cow::Owned(raw(NetworkMessage::Inv(vec![Inventory::Squeak(
                    SqueakHash::from_byte_array([5u8; 32]),
                )]))),
            )
            .await;

        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn wrong_magic_disconnects() {
        let (mut machine, _bus) = machine();
        let addr: SocketAddr = "8.8.8.8:44556".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:18666".parse().unwrap();

        machine.connected(addr, &local, Link::Inbound);
        machine
            .message_received(
                &addr,
                Cow::Owned(RawNetworkMessage {
                    magic: Network::Mainnet.magic(),
                    payload: NetworkMessage::Ping(1),
                }),
            )
            .await;

        let disconnected = machine.outbox.by_ref().any(|io| {
            matches!(
                io,
                output::Io::Disconnect(a, DisconnectReason::PeerMagic(_)) if a == addr
            )
        });
        assert!(disconnected);
    }
}
