//! Reconciliation of local and remote squeak sets.
//!
//! A [`SyncController`] is created per remote peer for the duration of one
//! sync operation. It drives the peer's sync RPC surface, applies a
//! [`DownloadCriteria`] to everything that comes back, and persists through
//! the controller so validation and fan-out happen in one place. Downloading
//! never pays for keys; paying is a separate operator action.
mod criteria;
pub use criteria::DownloadCriteria;

mod peer_client;
#[cfg(any(test, feature = "mocks"))]
pub use peer_client::MockPeerSyncRpc;
pub use peer_client::{HttpPeerClient, PeerSyncRpc};

mod controller;
pub use controller::SyncController;

/// By convention a node serves its peer sync RPC one port above its p2p
/// listen port.
pub fn sync_port(p2p_port: u16) -> u16 {
    p2p_port + 1
}
