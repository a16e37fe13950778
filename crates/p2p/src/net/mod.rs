//! Reactor-facing networking types.
//!
//! The state machine is pure: it consumes decoded messages and emits [`Io`]
//! instructions; the reactor owns every socket and carries those
//! instructions out. Peers are identified by their socket address
//! everywhere.
use std::{borrow::Cow, fmt, io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use flume as chan;
use tokio_util::sync::CancellationToken;

pub use reactor::{ReactorTcp, Waker};
pub use time::{LocalDuration, LocalTime};

pub mod reactor;
mod socket;
pub mod time;

/// An error occuring in the networking code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A channel send or receive error.
    #[error("channel error: {0}")]
    Channel(Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Origin of an I/O readiness event.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Source {
    Peer(SocketAddr),
    Listener,
    Waker,
}

/// Which side opened the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Link {
    /// The remote dialed us.
    Inbound,
    /// We dialed the remote.
    Outbound,
}

impl Link {
    pub fn is_outbound(&self) -> bool {
        *self == Link::Outbound
    }

    pub fn is_inbound(&self) -> bool {
        *self == Link::Inbound
    }
}

/// An instruction from the state machine to the reactor.
#[derive(Debug)]
pub enum Io<M, E, D> {
    /// Send a message to a peer.
    Write(SocketAddr, M),
    /// Dial a peer.
    Connect(SocketAddr),
    /// Drop a peer.
    Disconnect(SocketAddr, D),
    /// Wake the service up after the given delay.
    SetTimer(LocalDuration),
    /// Surface an event.
    Event(E),
}

/// Why a peer went away.
#[derive(Debug, Clone)]
pub enum Disconnect<T> {
    /// The dial failed before a connection ever existed.
    DialError(Arc<std::io::Error>),
    /// An established connection broke.
    ConnectionError(Arc<std::io::Error>),
    /// The local state machine asked for the disconnect.
    StateMachine(T),
}

impl<T> Disconnect<T> {
    pub fn is_dial_err(&self) -> bool {
        matches!(self, Self::DialError(_))
    }

    pub fn is_connection_err(&self) -> bool {
        matches!(self, Self::ConnectionError(_))
    }
}

impl<T: fmt::Display> fmt::Display for Disconnect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DialError(err) => write!(f, "{}", err),
            Self::ConnectionError(err) => write!(f, "{}", err),
            Self::StateMachine(reason) => write!(f, "{}", reason),
        }
    }
}

/// A protocol the reactor can drive: a byte-level state machine that also
/// accepts commands from outside the event loop.
#[async_trait]
pub trait Service: StateMachine<Message = [u8]> {
    /// Commands the service accepts. They arrive over the channel given to
    /// [`NetReactor::run`] and are delivered between poll iterations.
    type Command: Send + Sync;

    /// An external command has been received.
    async fn command_received(&mut self, cmd: Self::Command);
}

/// The protocol logic the reactor feeds: connection lifecycle and inbound
/// messages go in, [`Io`] instructions come back out through [`Iterator`].
#[async_trait]
pub trait StateMachine:
    Iterator<Item = Io<<Self::Message as ToOwned>::Owned, Self::Event, Self::DisconnectReason>>
{
    /// Message type sent between peers.
    type Message: fmt::Debug + ToOwned + ?Sized;
    /// Events emitted by the state machine.
    type Event: fmt::Debug + Send;
    /// Reason a peer was disconnected by the internal state-machine logic.
    type DisconnectReason: fmt::Debug + fmt::Display + Into<Disconnect<Self::DisconnectReason>>;

    /// Called once, before anything else.
    async fn initialize(&mut self, _time: LocalTime) {}
    /// A message arrived from a peer.
    async fn message_received(&mut self, addr: &SocketAddr, message: Cow<'_, Self::Message>);
    /// One of our dials is in flight. Always precedes
    /// [`StateMachine::connected`] for outbound peers.
    fn attempted(&mut self, addr: &SocketAddr);
    /// A socket to the peer is up. Returning `false` refuses the connection.
    fn connected(&mut self, addr: SocketAddr, local_addr: &SocketAddr, link: Link) -> bool;
    /// The peer is gone, by network failure or our own [`Io::Disconnect`].
    async fn disconnected(&mut self, addr: &SocketAddr, reason: Disconnect<Self::DisconnectReason>);
    /// Whether a peer is fully disconnected from the state machine.
    fn is_disconnected(&mut self, addr: SocketAddr) -> bool;
    /// Clock update, delivered on every reactor iteration.
    fn tick(&mut self, local_time: LocalTime);
    /// A timer set with [`Io::SetTimer`] has expired.
    async fn timer_expired(&mut self);
    /// Whether a peer is known to the state machine.
    fn is_connected(&mut self, addr: SocketAddr) -> bool;
}

/// Interrupts the reactor's poll from another task, so a queued
/// [`Service::Command`] doesn't sit until the next I/O event.
pub trait NetWaker: Send + Sync + Clone {
    fn wake(&self) -> io::Result<()>;
}

/// Any network reactor that can drive the peer-to-peer service.
#[async_trait]
pub trait NetReactor {
    /// The type of waker this reactor uses.
    type Waker: NetWaker;

    /// Create a reactor. The bound listen address is published on
    /// `listening` once [`NetReactor::run`] is up.
    fn new(listening: chan::Sender<SocketAddr>) -> Result<Self, io::Error>
    where
        Self: Sized;

    /// Drive the service until the token is cancelled: listen on
    /// `listen_addr`, deliver commands from `commands`, execute the
    /// service's instructions.
    async fn run<S>(
        &mut self,
        listen_addr: &SocketAddr,
        service: S,
        commands: chan::Receiver<S::Command>,
        cancellation: CancellationToken,
    ) -> Result<(), Error>
    where
        S: Service + Send + Sync,
        S::DisconnectReason: Into<Disconnect<S::DisconnectReason>> + Send + Sync;

    /// Return a new waker.
    ///
    /// The reactor can provide multiple wakers such that multiple user tasks
    /// may wake the event loop.
    fn waker(&self) -> Self::Waker;
}
