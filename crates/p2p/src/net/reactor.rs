//! Poll-based reactor. A single thread `poll`s every peer socket, the
//! listener and the waker, feeds decoded readiness into the service, and
//! carries out the [`Io`] instructions the service emits in return.
use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    io,
    io::prelude::*,
    net,
    net::SocketAddr,
    sync::Arc,
    time,
    time::SystemTime,
};

use async_trait::async_trait;
use flume as chan;
use flume::Receiver;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::net::socket::Socket;
use crate::net::time::Timeouts;
use crate::net::{
    Disconnect, Error, Io, Link, LocalDuration, LocalTime, NetReactor, NetWaker, Service, Source,
};

/// Maximum time to wait when reading from a socket.
const READ_TIMEOUT: time::Duration = time::Duration::from_secs(6);
/// Maximum time to wait when writing to a socket.
const WRITE_TIMEOUT: time::Duration = time::Duration::from_secs(3);
/// Maximum amount of time to wait for i/o.
const WAIT_TIMEOUT: LocalDuration = LocalDuration::from_secs(5);
/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 1024 * 192;

pub type ReactorTcp = Reactor<net::TcpStream>;

#[derive(Clone)]
pub struct Waker(Arc<popol::Waker>);

impl Waker {
    fn new(sources: &mut popol::Sources<Source>) -> io::Result<Self> {
        let waker = Arc::new(popol::Waker::new(sources, Source::Waker)?);

        Ok(Self(waker))
    }
}

impl NetWaker for Waker {
    fn wake(&self) -> io::Result<()> {
        self.0.wake()
    }
}

/// A single-threaded non-blocking reactor.
pub struct Reactor<R: Write + Read> {
    sockets: HashMap<SocketAddr, Socket<R>>,
    connecting: HashSet<SocketAddr>,
    sources: popol::Sources<Source>,
    waker: Waker,
    timeouts: Timeouts,
    listening: chan::Sender<SocketAddr>,
}

#[async_trait]
impl NetReactor for Reactor<net::TcpStream> {
    type Waker = Waker;

    /// Construct a new reactor, given a channel to publish the bound listen
    /// address on.
    fn new(listening: chan::Sender<SocketAddr>) -> Result<Self, io::Error> {
        let mut sources = popol::Sources::new();
        let waker = Waker::new(&mut sources)?;

        Ok(Self {
            sockets: HashMap::new(),
            connecting: HashSet::new(),
            sources,
            waker,
            timeouts: Timeouts::new(LocalDuration::from_secs(1)),
            listening,
        })
    }

    /// Run the given service with the reactor.
    async fn run<S>(
        &mut self,
        listen_addr: &SocketAddr,
        mut service: S,
        commands: Receiver<S::Command>,
        cancellation: CancellationToken,
    ) -> Result<(), Error>
    where
        S: Service + Send + Sync,
        S::DisconnectReason: Into<Disconnect<S::DisconnectReason>> + Send + Sync,
    {
        let listener = self.listen(listen_addr).await?;

        let local_time = SystemTime::now().into();
        service.initialize(local_time).await;

        self.process(&mut service, local_time).await;

        // I/O readiness events populated by `popol::Sources::wait_timeout`.
        let mut events = Vec::with_capacity(32);

        loop {
            select! {
                _ = cancellation.cancelled() => {
                    trace!("Reactor cancelled");
                    break Ok(());
                }
                result = self.step(&mut events, &mut service, &commands, &listener) => {
                    if let Err(e) = result {
                        break Err(e);
                    }
                }
            }
        }
    }

    /// Return a new waker.
    ///
    /// Used to wake up the main event loop.
    fn waker(&self) -> Self::Waker {
        self.waker.clone()
    }
}

impl Reactor<net::TcpStream> {
    /// Put a peer socket under the poller's watch.
    fn attach(&mut self, addr: SocketAddr, stream: net::TcpStream, link: Link) {
        self.sources
            .register(Source::Peer(addr), &stream, popol::interest::ALL);
        self.sockets.insert(addr, Socket::from(stream, addr, link));
    }

    /// Forget a peer socket and tell the service it's gone.
    async fn detach<S>(
        &mut self,
        addr: SocketAddr,
        reason: Disconnect<S::DisconnectReason>,
        service: &mut S,
    ) where
        S: Service,
    {
        self.connecting.remove(&addr);
        self.sockets.remove(&addr);
        self.sources.unregister(&Source::Peer(addr));

        service.disconnected(&addr, reason).await;
    }

    async fn listen(&mut self, listen_addr: &SocketAddr) -> Result<net::TcpListener, Error> {
        let listener = net::TcpListener::bind(listen_addr)?;
        listener.set_nonblocking(true)?;

        let local_addr = listener.local_addr()?;

        self.sources
            .register(Source::Listener, &listener, popol::interest::READ);
        self.listening.send_async(local_addr).await.ok();

        debug!(target: "net", "Listening for incoming connections on {}", local_addr);

        Ok(listener)
    }

    /// One iteration of the event loop: poll, dispatch readiness events, and
    /// process state-machine outputs.
    async fn step<S>(
        &mut self,
        events: &mut Vec<popol::Event<Source>>,
        service: &mut S,
        commands: &Receiver<S::Command>,
        listener: &net::TcpListener,
    ) -> Result<(), Error>
    where
        S: Service + Send + Sync,
        S::DisconnectReason: Into<Disconnect<S::DisconnectReason>> + Send + Sync,
    {
        tokio::task::yield_now().await;

        trace!(
            "Polling {} source(s) and {} timeout(s)..",
            self.sources.len(),
            self.timeouts.len(),
        );

        let result = self.sources.wait_timeout(events, WAIT_TIMEOUT.into()); // Blocking.
        let local_time = SystemTime::now().into();

        service.tick(local_time);

        match result {
            Ok(n) => {
                trace!("Woke up with {n} source(s) ready");

                for event in events.drain(..) {
                    match &event.key {
                        Source::Peer(addr) => {
                            let addr = *addr;

                            if event.is_invalid() {
                                // A closed descriptor here means a source
                                // wasn't unregistered, or is duplicated.
                                error!(target: "net", "{}: Socket is invalid, removing", addr);
                                self.sources.unregister(&event.key);
                                continue;
                            }
                            if event.is_error() || event.is_hangup() {
                                // The next read surfaces the actual error.
                                trace!("{}: Socket error triggered: {:?}", addr, event);
                            }

                            if event.is_writable() {
                                self.on_writable(addr, &event.key, service).await?;
                            }
                            if event.is_readable() {
                                self.on_readable(addr, service).await;
                            }
                        }
                        Source::Listener => loop {
                            let (conn, socket_addr) = match listener.accept() {
                                Ok((conn, socket_addr)) => (conn, socket_addr),
                                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                                Err(e) => {
                                    error!(target: "net", "Accept error: {}", e.to_string());
                                    break;
                                }
                            };

                            self.accept(service, socket_addr, conn)?;
                        },
                        Source::Waker => {
                            trace!("Woken up by waker ({} command(s))", commands.len());
                            popol::Waker::reset(event.source).ok();

                            // Drain all queued commands.
                            while let Ok(cmd) = commands.try_recv() {
                                service.command_received(cmd).await;
                            }
                        }
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                // The service doesn't track which timer fired; any due
                // deadline wakes it once.
                if self.timeouts.wake(local_time) > 0 {
                    service.timer_expired().await;
                }
            }
            Err(err) => return Err(err.into()),
        }
        self.process(service, local_time).await;

        Ok(())
    }

    /// Process service state machine outputs.
    async fn process<S>(&mut self, service: &mut S, local_time: LocalTime)
    where
        S: Service,
        S::DisconnectReason: Into<Disconnect<S::DisconnectReason>>,
    {
        // A message may still be queued for a peer that has since gone
        // away; the lookup below just misses and the write is dropped.
        while let Some(out) = service.next() {
            match out {
                Io::Write(addr, bytes) => {
                    if let Some((socket, source)) = self.sockets.get_mut(&addr).and_then(|socket| {
                        self.sources
                            .get_mut(&Source::Peer(addr))
                            .map(|source| (socket, source))
                    }) {
                        socket.push(&bytes);
                        source.set(popol::interest::WRITE);
                    }
                }
                Io::Connect(addr) => match dial(&addr) {
                    Ok(stream) => {
                        self.attach(addr, stream, Link::Outbound);
                        self.connecting.insert(addr);

                        service.attempted(&addr);
                    }
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        // A dial through this socket is already in flight.
                    }
                    Err(err) => {
                        error!(target: "net", "{}: Dial error: {}", addr, err.to_string());

                        service
                            .disconnected(&addr, Disconnect::DialError(Arc::new(err)))
                            .await;
                    }
                },
                Io::Disconnect(addr, reason) => {
                    // Shutdown the connection, ignoring any potential errors.
                    // If the socket was already disconnected, this will yield
                    // an error that is safe to ignore (`ENOTCONN`). The other
                    // possible errors relate to an invalid file descriptor.
                    self.sockets
                        .get(&addr)
                        .and_then(|peer| peer.disconnect().ok());
                    self.detach(addr, reason.into(), service).await;
                }
                Io::SetTimer(timeout) => {
                    self.timeouts.register(local_time + timeout);
                }
                Io::Event(event) => {
                    trace!("Event: {:?}", event);
                }
            }
        }
    }

    /// Accept an inbound peer connection.
    fn accept<S>(
        &mut self,
        service: &mut S,
        socket_addr: SocketAddr,
        conn: net::TcpStream,
    ) -> Result<(), Error>
    where
        S: Service,
    {
        trace!("{}: Accepting peer connection", socket_addr);

        conn.set_nonblocking(true)?;

        let local_addr = conn.local_addr()?;
        let link = Link::Inbound;

        if !service.connected(socket_addr, &local_addr, link) {
            conn.shutdown(net::Shutdown::Both).ok();
            return Ok(());
        }
        self.attach(socket_addr, conn, link);

        Ok(())
    }

    async fn on_readable<S>(&mut self, addr: SocketAddr, service: &mut S)
    where
        S: Service,
    {
        // A peer disconnected while handling its writable half is already
        // gone from the map by the time we get here.
        if let Some(socket) = self.sockets.get_mut(&addr) {
            let mut buffer = [0; READ_BUFFER_SIZE];

            trace!("{}: Socket is readable", addr);

            // `poll` is level-triggered: leftover data re-arms readiness on
            // the next iteration, so one read per wakeup is enough.
            match socket.read(&mut buffer) {
                Ok(count) => {
                    if count > 0 {
                        service
                            .message_received(&addr, Cow::Borrowed(&buffer[..count]))
                            .await;
                    } else {
                        // A zero-byte read is the peer's orderly shutdown.
                        socket.disconnect().ok();

                        self.detach(
                            addr,
                            Disconnect::ConnectionError(Arc::new(io::Error::from(
                                io::ErrorKind::ConnectionReset,
                            ))),
                            service,
                        )
                        .await;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    trace!("{}: Spurious read readiness", addr);
                }
                Err(err) => {
                    trace!("{}: Read error: {}", addr, err.to_string());

                    socket.disconnect().ok();
                    self.detach(addr, Disconnect::ConnectionError(Arc::new(err)), service)
                        .await;
                }
            }
        }
    }

    async fn on_writable<S: Service>(
        &mut self,
        addr: SocketAddr,
        source: &Source,
        service: &mut S,
    ) -> io::Result<()> {
        trace!("{}: Socket is writable", addr);

        let (Some(source), Some(socket)) =
            (self.sources.get_mut(source), self.sockets.get_mut(&addr))
        else {
            return Ok(());
        };

        // A non-blocking connect reports completion as writability, so the
        // first writable event on a dialing socket is the moment the
        // connection is actually up.
        if self.connecting.remove(&addr) {
            let local_addr = socket.local_address()?;

            service.connected(addr, &local_addr, socket.link);
        }

        match socket.drain() {
            // Drained: writing interest can be dropped until there is
            // something to send again.
            Ok(()) => {
                source.unset(popol::interest::WRITE);
            }
            // Partial write: stay interested so the rest goes out when the
            // socket is ready again.
            Err(err)
                if [io::ErrorKind::WouldBlock, io::ErrorKind::WriteZero].contains(&err.kind()) =>
            {
                source.set(popol::interest::WRITE);
            }
            Err(err) => {
                error!(target: "net", "{}: Write error: {}", addr, err.to_string());

                socket.disconnect().ok();
                self.detach(addr, Disconnect::ConnectionError(Arc::new(err)), service)
                    .await;
            }
        }
        Ok(())
    }
}

/// Connect to a peer given a remote address.
fn dial(addr: &SocketAddr) -> Result<net::TcpStream, io::Error> {
    use socket2::{Domain, Socket, Type};

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let sock = Socket::new(domain, Type::STREAM, None)?;

    sock.set_read_timeout(Some(READ_TIMEOUT))?;
    sock.set_write_timeout(Some(WRITE_TIMEOUT))?;
    sock.set_nonblocking(true)?;

    match sock.connect(&(*addr).into()) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) if e.raw_os_error() == Some(libc::EALREADY) => {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e),
    }
    Ok(sock.into())
}
