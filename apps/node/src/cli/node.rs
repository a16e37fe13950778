use std::sync::Arc;
use std::time::Duration;

use crate::config::{NodeConfig, StorageConfig};
use event_bus::EventBus;
use eyre::{Context, Ok};
use lightning_client::LndRestClient;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use sqk_controller::{Controller, ControllerConfig, NodeHubs};
use sqk_p2p::{
    client::{Handle, P2PClient},
    net::{ReactorTcp, Waker},
};
use sqk_rpc_server::ServerConfig;
use sqk_storage::{MemoryStore, PeerStorage};
use sqk_types::ControllerMessage;

/// Default size of the channel for the event bus.
const DEFAULT_CHANNEL_SIZE: usize = 1000;
/// The limit of time to wait for the node to shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

type NodeController = Controller<MemoryStore, Handle<Waker>, LndRestClient>;

/// Node encapsulates the node services' start.
pub struct Node {
    config: NodeConfig,
    event_bus: EventBus,
    store: MemoryStore,
    lightning: Arc<LndRestClient>,
    hubs: NodeHubs,

    cancelation: CancellationToken,
    pub(crate) task_tracker: TaskTracker,
}

impl Node {
    pub async fn new(config: NodeConfig) -> eyre::Result<Self> {
        let event_bus = Self::init_event_bus();
        let store = Self::init_storage(&config.storage).await?;

        let lightning = Arc::new(
            LndRestClient::new(
                config.lightning.lnd.rest_url.clone(),
                config.lightning.lnd.macaroon_hex.clone(),
                Duration::from_secs(config.lightning.lnd.timeout_s),
            )
            .wrap_err("failed to create lightning client")?,
        );

        Ok(Self {
            config,
            event_bus,
            store,
            lightning,
            hubs: NodeHubs::new(),
            cancelation: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        })
    }

    /// Wait for the signal from any node's service about the cancellation.
    pub async fn cancelled(&self) {
        self.cancelation.cancelled().await
    }

    pub async fn run(&self) -> eyre::Result<()> {
        let p2p_handle = self.spawn_p2p().await?;
        let controller = self.spawn_controller(p2p_handle.clone());

        self.spawn_rpc(controller, p2p_handle);

        self.task_tracker.close();

        Ok(())
    }

    async fn spawn_p2p(&self) -> eyre::Result<Handle<Waker>> {
        // Saved autoconnect peers are dialed first and kept connected.
        let autoconnect = self.store.get_autoconnect_peers().await?;
        let client_config = self
            .config
            .p2p
            .to_client_config(self.config.network, &autoconnect)?;

        let p2p_client_runner = P2PClient::<ReactorTcp>::new(client_config, &self.event_bus)
            .expect("P2P client must be successfully created");

        let handle = p2p_client_runner.handle();

        self.task_tracker
            .spawn(p2p_client_runner.run(self.cancelation.clone()));

        Ok(handle)
    }

    fn spawn_controller(&self, handle: Handle<Waker>) -> NodeController {
        let (external_host, external_port) = self.config.p2p.external_address();

        let controller = Controller::new(
            &self.event_bus,
            self.store.clone(),
            self.lightning.clone(),
            handle,
            self.hubs.clone(),
            ControllerConfig {
                network: self.config.network,
                price_msat: self.config.sqk.price_msat,
                external_host,
                external_port,
                block_range_window: self.config.sync.block_range_window,
            },
        );

        self.task_tracker
            .spawn(controller.clone().run(self.cancelation.clone()));

        controller
    }

    fn spawn_rpc(&self, controller: NodeController, p2p_handle: Handle<Waker>) {
        let admin_address = format!("{}:{}", self.config.rpc.host, self.config.rpc.port);
        let max_request_size_kb = self.config.rpc.max_request_size_kb;

        self.task_tracker.spawn(sqk_rpc_server::run_admin_server(
            ServerConfig {
                address: admin_address,
                max_request_size_kb,
            },
            controller.clone(),
            self.store.clone(),
            self.lightning.clone(),
            p2p_handle,
            self.hubs.clone(),
            Duration::from_secs(self.config.p2p.peer_timeout_s),
            self.cancelation.clone(),
        ));

        self.task_tracker.spawn(sqk_rpc_server::run_peer_server(
            ServerConfig {
                address: self.config.sync.listen_address(&self.config.p2p),
                max_request_size_kb,
            },
            controller,
            self.store.clone(),
            self.cancelation.clone(),
        ));
    }

    /// Open the store, retrying a fixed number of times before giving up.
    /// A store that cannot be opened is fatal.
    async fn init_storage(config: &StorageConfig) -> eyre::Result<MemoryStore> {
        let mut current_attempt = 1;

        loop {
            match MemoryStore::open(&config.connection_string) {
                std::result::Result::Ok(store) => return Ok(store),
                Err(err) => {
                    if current_attempt >= config.init_attempts {
                        return Err(err).wrap_err("failed to initialize storage");
                    }

                    current_attempt += 1;
                    error!(
                        %err,
                        "Failed to open the store. Trying again in {} secs",
                        config.init_retry_secs
                    );
                    sleep(Duration::from_secs(config.init_retry_secs)).await;
                }
            }
        }
    }

    fn init_event_bus() -> EventBus {
        let mut event_bus = EventBus::default();
        event_bus.register::<ControllerMessage>(Some(DEFAULT_CHANNEL_SIZE));

        event_bus
    }

    pub async fn shutdown(&self) {
        info!("Shutting down node, finishing received requests...");

        self.cancelation.cancel();

        let timeout = self
            .config
            .shutdown_timeout
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

        select! {
            // Wait until all tasks are finished
            _ = self.task_tracker.wait() => {},
            // Or wait for and exit by timeout
            _ = sleep(Duration::from_secs(timeout)) => {
                info!("Shutdown timeout reached, exiting...");
            },
        }
    }
}
