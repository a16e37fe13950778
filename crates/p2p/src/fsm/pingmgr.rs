//! Peer keepalive: periodic pings and dead-peer detection.
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::{
    common::time::Clock,
    fsm::handler::{DisconnectReason, PeerId},
    net::{LocalDuration, LocalTime},
};

use super::output::Wire;

/// Interval between pings when the link is otherwise quiet.
pub const PING_INTERVAL: LocalDuration = LocalDuration::from_secs(60);
/// A peer that has sent nothing for this long is presumed dead.
pub const PEER_TIMEOUT: LocalDuration = LocalDuration::from_secs(180);

/// An event originating in the ping manager.
#[derive(Debug, Clone)]
pub enum Event {
    /// A ping was sent to a peer.
    PingSent {
        /// The pinged peer.
        addr: PeerId,
    },
    /// A pong was received, with the round-trip time.
    PongReceived {
        /// The ponging peer.
        addr: PeerId,
        /// Round-trip latency.
        latency: LocalDuration,
    },
}

impl std::fmt::Display for Event {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PingSent { addr } => write!(fmt, "{}: Ping sent", addr),
            Self::PongReceived { addr, latency } => {
                write!(fmt, "{}: Pong received, latency = {}", addr, latency)
            }
        }
    }
}

#[derive(Debug)]
struct PeerState {
    /// Outstanding ping, if any: the nonce we expect echoed and when we sent it.
    last_ping: Option<(u64, LocalTime)>,
    /// Last time anything was received from this peer.
    last_received: LocalTime,
    /// Last time a ping was sent.
    last_ping_sent: LocalTime,
}

/// Keeps connections alive and detects dead ones.
#[derive(Debug)]
pub struct PingManager<U, C> {
    peers: HashMap<SocketAddr, PeerState>,
    rng: fastrand::Rng,
    wire: U,
    clock: C,
}

impl<U: Wire<Event>, C: Clock> PingManager<U, C> {
    /// Create a new ping manager.
    pub fn new(rng: fastrand::Rng, wire: U, clock: C) -> Self {
        Self {
            peers: HashMap::new(),
            rng,
            wire,
            clock,
        }
    }

    /// Called when a peer completed its handshake.
    pub fn peer_negotiated(&mut self, addr: SocketAddr) {
        let now = self.clock.local_time();

        self.peers.insert(
            addr,
            PeerState {
                last_ping: None,
                last_received: now,
                last_ping_sent: now,
            },
        );
        self.wire.set_timer(PING_INTERVAL);
    }

    /// Called when a peer disconnected.
    pub fn peer_disconnected(&mut self, addr: &SocketAddr) {
        self.peers.remove(addr);
    }

    /// Whether a peer is tracked by the keepalive protocol.
    pub fn is_connected(&self, addr: &SocketAddr) -> bool {
        self.peers.contains_key(addr)
    }

    /// Note that *any* message arrived from this peer. Quiet peers time out.
    pub fn received_message(&mut self, addr: &SocketAddr) {
        let now = self.clock.local_time();

        if let Some(peer) = self.peers.get_mut(addr) {
            peer.last_received = now;
        }
    }

    /// Called when a `ping` was received. Replies with a `pong` echoing the
    /// nonce. Returns `false` for peers that haven't negotiated.
    pub fn received_ping(&mut self, addr: PeerId, nonce: u64) -> bool {
        if !self.peers.contains_key(&addr) {
            return false;
        }

        self.received_message(&addr);
        self.wire.pong(addr, nonce);

        true
    }

    /// Called when a `pong` was received. Only a pong echoing the nonce of an
    /// outstanding ping counts.
    pub fn received_pong(&mut self, addr: PeerId, nonce: u64, now: LocalTime) -> bool {
        let Some(peer) = self.peers.get_mut(&addr) else {
            return false;
        };

        peer.last_received = now;

        match peer.last_ping.take() {
            Some((expected, sent_at)) if expected == nonce => {
                self.wire.event(Event::PongReceived {
                    addr,
                    latency: now - sent_at,
                });
                true
            }
            other => {
                // An unsolicited or stale pong; keep any outstanding ping.
                peer.last_ping = other;
                false
            }
        }
    }

    /// Called when a tick was received: drop silent peers, ping quiet ones.
    pub fn received_wake(&mut self) {
        let now = self.clock.local_time();

        let mut dead = Vec::new();
        let mut quiet = Vec::new();

        for (addr, peer) in &self.peers {
            if now - peer.last_received >= PEER_TIMEOUT {
                dead.push(*addr);
            } else if now - peer.last_ping_sent >= PING_INTERVAL {
                quiet.push(*addr);
            }
        }

        for addr in dead {
            self.peers.remove(&addr);
            self.wire
                .disconnect(addr, DisconnectReason::PeerTimeout("ping"));
        }

        for addr in quiet {
            let nonce = self.rng.u64(..);
            let peer = self.peers.get_mut(&addr).expect("peer was just seen");

            peer.last_ping = Some((nonce, now));
            peer.last_ping_sent = now;

            self.wire.ping(addr, nonce);
            self.wire.event(Event::PingSent { addr });
        }

        self.wire.set_timer(PING_INTERVAL);
    }
}
