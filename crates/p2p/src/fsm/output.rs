//! Protocol output capabilities.
//!
//! Sub-protocol managers don't touch sockets; they hold a clone of the
//! [`Outbox`] and describe what should happen — a message to a peer, a
//! dial, a drop, a wakeup — as [`Io`] instructions the reactor executes.
//!
//! Only the bookkeeping messages (handshake, keepalive, addresses) go
//! through the [`Wire`] trait; squeak domain messages are queued by the
//! protocol handler itself via [`Outbox::message`].
use std::sync::{Arc, Mutex};
use std::{collections::VecDeque, net};

use tracing::debug;

use sqk_types::network::Network;
use sqk_types::{NetworkMessage, RawNetworkMessage};

use crate::{
    fsm::handler::{DisconnectReason, PeerId},
    fsm::Event,
    net::LocalDuration,
};
use bitcoin::{network::address::Address, network::message_network::VersionMessage};

/// Output of a state transition of the `Protocol` state machine.
pub type Io = crate::net::Io<RawNetworkMessage, Event, DisconnectReason>;

impl From<Event> for Io {
    fn from(event: Event) -> Self {
        Io::Event(event)
    }
}

/// Everything a sub-protocol manager can ask of the network: bookkeeping
/// messages, connection control, timers and events.
pub trait Wire<E> {
    /// Emit an event.
    fn event(&self, event: E);

    /// Dial a peer, giving up after `timeout`.
    fn connect(&self, addr: net::SocketAddr, timeout: LocalDuration);

    /// Drop a peer.
    fn disconnect(&self, addr: net::SocketAddr, reason: DisconnectReason);

    /// Ask to be woken up in a predefined amount of time.
    fn set_timer(&self, duration: LocalDuration);

    /// Send a `version` message.
    fn version(&mut self, addr: PeerId, msg: VersionMessage);

    /// Send a `verack` message.
    fn verack(&mut self, addr: PeerId);

    /// Send a `ping` message.
    fn ping(&mut self, addr: PeerId, nonce: u64);

    /// Send a `pong` message.
    fn pong(&mut self, addr: PeerId, nonce: u64);

    /// Send a `getaddr` message.
    fn get_addr(&mut self, addr: PeerId);

    /// Send an `addr` message.
    fn addr(&mut self, addr: PeerId, addrs: Vec<(u32, Address)>);
}

/// Queue of pending [`Io`] instructions, drained by the reactor after every
/// state transition. Clones share the queue, so each manager holds its own
/// copy.
#[derive(Debug, Clone)]
pub struct Outbox {
    /// Squeak network, for stamping outgoing messages with the right magic.
    network: Network,
    queue: Arc<Mutex<VecDeque<Io>>>,
}

impl Iterator for Outbox {
    type Item = Io;

    /// Get the next pending instruction.
    fn next(&mut self) -> Option<Io> {
        self.queue.lock().unwrap().pop_front()
    }
}

impl Outbox {
    /// Create a new outbox for the given network.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queue an instruction.
    pub fn push(&self, output: Io) {
        self.queue.lock().unwrap().push_back(output);
    }

    /// Queue a message to the given peer.
    pub fn message(&mut self, addr: PeerId, payload: NetworkMessage) {
        debug!(target: "p2p", "Sending {:?} to {}", payload.cmd(), addr);

        self.push(Io::Write(
            addr,
            RawNetworkMessage {
                magic: self.network.magic(),
                payload,
            },
        ));
    }

    /// Queue an event.
    pub fn event(&self, event: Event) {
        self.push(Io::Event(event));
    }
}

impl<E: Into<Event> + std::fmt::Display> Wire<E> for Outbox {
    fn event(&self, event: E) {
        debug!(target: "p2p", "{}", &event);
        self.event(event.into());
    }

    fn connect(&self, addr: net::SocketAddr, timeout: LocalDuration) {
        self.push(Io::Connect(addr));
        self.push(Io::SetTimer(timeout));
    }

    fn disconnect(&self, addr: net::SocketAddr, reason: DisconnectReason) {
        debug!(target: "p2p", "Disconnecting from {}: {}", addr, reason);

        self.push(Io::Disconnect(addr, reason));
    }

    fn set_timer(&self, duration: LocalDuration) {
        self.push(Io::SetTimer(duration));
    }

    fn version(&mut self, addr: PeerId, msg: VersionMessage) {
        self.message(addr, NetworkMessage::Version(msg));
    }

    fn verack(&mut self, addr: PeerId) {
        self.message(addr, NetworkMessage::Verack);
    }

    fn ping(&mut self, addr: PeerId, nonce: u64) {
        self.message(addr, NetworkMessage::Ping(nonce));
    }

    fn pong(&mut self, addr: PeerId, nonce: u64) {
        self.message(addr, NetworkMessage::Pong(nonce));
    }

    fn get_addr(&mut self, addr: PeerId) {
        self.message(addr, NetworkMessage::GetAddr);
    }

    fn addr(&mut self, addr: PeerId, addrs: Vec<(u32, Address)>) {
        self.message(addr, NetworkMessage::Addr(addrs));
    }
}
