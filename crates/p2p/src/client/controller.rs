use std::net::SocketAddr;
use std::time::SystemTime;
use std::{net, time};

use async_trait::async_trait;
use flume as chan;

use event_bus::EventBus;
use sqk_types::network::Network;
use sqk_types::{
    InterestFilter, Inventory, NetworkMessage, Offer, PeerSummary, SqueakBundle, SqueakHash,
};
use tokio_util::sync::CancellationToken;

use crate::{
    client::handle,
    client::Error,
    client::service::Service,
    common::time::{RefClock, WallClock},
    fsm::handler,
    fsm::handler::PeerId,
    fsm::handler::{Command, Limits, PeersSnapshot},
    net::{LocalDuration, NetReactor, NetWaker},
};

/// P2P client configuration.
#[derive(Debug, Clone)]
pub struct P2PConfig {
    /// The squeak network to join.
    pub network: Network,
    /// Peers to always stay connected to.
    pub connect: Vec<SocketAddr>,
    /// Where to accept inbound peers.
    pub listen: SocketAddr,
    /// How we introduce ourselves in `version` messages.
    pub user_agent: &'static str,
    /// Configured connection bounds.
    pub limits: Limits,
    /// Interval between connection-maintenance runs.
    pub update_interval: LocalDuration,
}

impl P2PConfig {
    /// Create a new configuration for the given network.
    pub fn new(
        network: Network,
        listen: SocketAddr,
        connect: Vec<net::SocketAddr>,
        min_peers: usize,
        max_peers: usize,
        update_interval: LocalDuration,
    ) -> Self {
        Self {
            network,
            limits: Limits {
                min_peers,
                max_peers,
            },
            listen,
            connect,
            update_interval,
            ..Self::default()
        }
    }
}

impl Default for P2PConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            connect: Vec::new(),
            listen: ([0, 0, 0, 0], 0).into(),
            user_agent: handler::USER_AGENT,
            limits: Limits::default(),
            update_interval: crate::fsm::peermgr::DEFAULT_UPDATE_INTERVAL,
        }
    }
}

/// The p2p service bundled with its reactor, ready to run.
pub struct P2PClient<R: NetReactor> {
    handle: Handle<R::Waker>,
    service: Service<RefClock<WallClock>>,
    listen: SocketAddr,
    commands: chan::Receiver<Command>,
    reactor: R,
}

impl<R: NetReactor> P2PClient<R> {
    /// Create a new client.
    pub fn new(config: P2PConfig, full_event_bus: &EventBus) -> Result<Self, Error> {
        let (commands_tx, commands_rx) = chan::unbounded::<Command>();

        let (listening_send, listening) = chan::bounded(1);
        let reactor = <R as NetReactor>::new(listening_send)?;

        let clock = RefClock::from(WallClock::new(SystemTime::now().into()));
        let rng = fastrand::Rng::new();

        let p2p_service = Service::new(clock, rng, config.clone(), full_event_bus);

        let listen = config.listen;

        let handle = Handle {
            commands: commands_tx,
            waker: reactor.waker(),
            timeout: time::Duration::from_secs(60),
            listening,
        };

        Ok(P2PClient {
            handle,
            listen,
            commands: commands_rx,
            reactor,
            service: p2p_service,
        })
    }

    /// Run the p2p service until the token is cancelled.
    pub async fn run(mut self, cancellation: CancellationToken) {
        let result = self
            .reactor
            .run(&self.listen, self.service, self.commands, cancellation)
            .await;

        if let Err(e) = result {
            tracing::error!("P2P is down. P2P client run error: {}", e);
        }
    }

    /// A handle for talking to the running service.
    pub fn handle(&self) -> Handle<R::Waker> {
        self.handle.clone()
    }
}

#[derive(Clone)]
pub struct Handle<W: NetWaker> {
    pub commands: chan::Sender<Command>,
    pub waker: W,
    pub timeout: time::Duration,
    pub listening: chan::Receiver<net::SocketAddr>,
}

impl<W: NetWaker> Handle<W> {
    /// Queue a command for the service and wake its event loop.
    async fn submit(&self, cmd: Command) -> Result<(), handle::Error> {
        if self.commands.send_async(cmd).await.is_err() {
            return Err(handle::Error::ServiceStopped);
        }
        self.waker.wake()?;

        Ok(())
    }
}

#[async_trait]
impl<W: NetWaker> handle::Handle for Handle<W> {
    async fn command(&self, cmd: Command) -> Result<(), handle::Error> {
        self.submit(cmd).await
    }

    async fn get_peers(&self) -> Result<PeersSnapshot, handle::Error> {
        let (reply_tx, reply_rx) = chan::bounded(1);
        self.submit(Command::GetPeers(reply_tx)).await?;

        reply_rx
            .recv_async()
            .await
            .map_err(|_| handle::Error::Timeout)
    }

    async fn connect_peer(&self, addr: SocketAddr) -> Result<(), handle::Error> {
        self.command(Command::Connect(addr)).await
    }

    async fn disconnect_peer(&self, addr: SocketAddr) -> Result<(), handle::Error> {
        self.command(Command::Disconnect(addr)).await
    }

    async fn broadcast(
        &self,
        msg: NetworkMessage,
        predicate: for<'a> fn(&'a PeerSummary) -> bool,
    ) -> Result<Vec<net::SocketAddr>, handle::Error> {
        let (reply_tx, reply_rx) = chan::bounded(1);
        self.submit(Command::Broadcast(msg, predicate, reply_tx))
            .await?;

        reply_rx
            .recv_async()
            .await
            .map_err(|_| handle::Error::Timeout)
    }

    async fn send_inv(&self, inv: Vec<Inventory>) -> Result<(), handle::Error> {
        self.command(Command::SendInv(inv)).await
    }

    async fn send_get_squeaks(
        &self,
        inv: Vec<Inventory>,
        addr: PeerId,
    ) -> Result<(), handle::Error> {
        self.command(Command::SendGetSqueaks(inv, addr)).await
    }

    async fn send_squeaks(
        &self,
        squeaks: Vec<SqueakBundle>,
        addr: PeerId,
    ) -> Result<(), handle::Error> {
        self.command(Command::SendSqueaks(squeaks, addr)).await
    }

    async fn send_get_offer(&self, hash: SqueakHash, addr: PeerId) -> Result<(), handle::Error> {
        self.command(Command::SendGetOffer(hash, addr)).await
    }

    async fn send_offer(&self, offer: Offer, addr: PeerId) -> Result<(), handle::Error> {
        self.command(Command::SendOffer(offer, addr)).await
    }

    async fn send_subscribe(
        &self,
        filter: InterestFilter,
        addr: PeerId,
    ) -> Result<(), handle::Error> {
        self.command(Command::SendSubscribe(filter, addr)).await
    }

    async fn send_unsubscribe(
        &self,
        filter: InterestFilter,
        addr: PeerId,
    ) -> Result<(), handle::Error> {
        self.command(Command::SendUnsubscribe(filter, addr)).await
    }
}
