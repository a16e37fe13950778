use async_trait::async_trait;
use sqk_types::SqueakPeer;

use crate::StorageResult;

/// Address-book persistence for saved peers.
#[async_trait]
pub trait PeerStorage {
    /// Insert a peer and return its assigned id.
    async fn insert_peer(&self, peer: &SqueakPeer) -> StorageResult<u64>;

    async fn get_peer(&self, peer_id: u64) -> StorageResult<Option<SqueakPeer>>;

    async fn get_peers(&self) -> StorageResult<Vec<SqueakPeer>>;

    /// Peers flagged for autoconnect, dialed first by the connect loop.
    async fn get_autoconnect_peers(&self) -> StorageResult<Vec<SqueakPeer>>;

    async fn set_peer_autoconnect(&self, peer_id: u64, autoconnect: bool) -> StorageResult<()>;

    async fn rename_peer(&self, peer_id: u64, name: &str) -> StorageResult<()>;

    async fn delete_peer(&self, peer_id: u64) -> StorageResult<()>;
}
