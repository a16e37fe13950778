//! The node's JSON-RPC servers.
//!
//! Two surfaces on two listeners: the admin surface the operator drives the
//! node with, and the peer surface other nodes sync squeaks over. This layer
//! is also where internal errors become user-visible status codes; peer
//! protocol errors never reach it.
use jsonrpsee::server::Server;
use tokio_util::sync::CancellationToken;

use lightning_client::LightningClient;
use sqk_controller::{Controller, NodeHubs, NodeStorage};
use sqk_p2p::client::handle::Handle as ClientHandle;
use sqk_rpc_api::admin::SqueakAdminRpcServer;
use sqk_rpc_api::peer::SqueakPeerRpcServer;

use crate::admin::AdminController;
use crate::peer::PeerController;

pub mod admin;
pub mod peer;

pub struct ServerConfig {
    /// Address at which the server will listen for incoming connections.
    pub address: String,
    /// Max size of incoming request in kilobytes.
    pub max_request_size_kb: u32,
}

/// Runs the operator-facing admin RPC server.
pub async fn run_admin_server<S, P2P, L>(
    ServerConfig {
        address,
        max_request_size_kb,
    }: ServerConfig,
    controller: Controller<S, P2P, L>,
    store: S,
    lightning: std::sync::Arc<L>,
    p2p_handle: P2P,
    hubs: NodeHubs,
    sync_timeout: std::time::Duration,
    cancellation: CancellationToken,
) -> eyre::Result<()>
where
    S: NodeStorage,
    P2P: ClientHandle + Send + Sync + 'static,
    L: LightningClient + Send + Sync + 'static,
{
    let server = Server::builder()
        .max_request_body_size(max_request_size_kb * 1024)
        .build(address)
        .await?;

    let handle = server.start(
        AdminController::new(controller, store, lightning, p2p_handle, hubs, sync_timeout)
            .into_rpc(),
    );

    // Await until stop message received
    cancellation.cancelled().await;

    // Send stop message to server
    if let Err(err) = handle.stop() {
        tracing::trace!("Failed to stop server: {}", err);
    }

    // Wait until server stopped
    handle.stopped().await;

    Ok(())
}

/// Runs the peer-facing sync RPC server.
pub async fn run_peer_server<S, P2P, L>(
    ServerConfig {
        address,
        max_request_size_kb,
    }: ServerConfig,
    controller: Controller<S, P2P, L>,
    store: S,
    cancellation: CancellationToken,
) -> eyre::Result<()>
where
    S: NodeStorage,
    P2P: ClientHandle + Send + Sync + 'static,
    L: LightningClient + Send + Sync + 'static,
{
    let server = Server::builder()
        .max_request_body_size(max_request_size_kb * 1024)
        .build(address)
        .await?;

    let handle = server.start(PeerController::new(controller, store).into_rpc());

    cancellation.cancelled().await;

    if let Err(err) = handle.stop() {
        tracing::trace!("Failed to stop server: {}", err);
    }

    handle.stopped().await;

    Ok(())
}
