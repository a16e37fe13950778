//! Node handles are created from nodes by users of the library, to communicate with the underlying
//! protocol instance.
use std::net;
use std::net::SocketAddr;

use async_trait::async_trait;
use flume as chan;
use thiserror::Error;

use sqk_types::{
    InterestFilter, Inventory, NetworkMessage, Offer, PeerSummary, SqueakBundle, SqueakHash,
};

use crate::fsm::handler::{Command, PeerId, PeersSnapshot};

/// An error resulting from a handle method.
#[derive(Error, Debug)]
pub enum Error {
    /// The p2p service is gone; its command channel is closed.
    #[error("the p2p service is not running")]
    ServiceStopped,
    /// The service didn't answer in time.
    #[error("the operation timed out")]
    Timeout,
    /// An I/O error occured.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<chan::RecvError> for Error {
    fn from(_: chan::RecvError) -> Self {
        Self::ServiceStopped
    }
}

impl<T> From<chan::SendError<T>> for Error {
    fn from(_: chan::SendError<T>) -> Self {
        Self::ServiceStopped
    }
}

/// A handle for communicating with the p2p service.
#[async_trait]
pub trait Handle: Sized + Send + Sync + Clone {
    /// Send a raw command to the service.
    async fn command(&self, cmd: Command) -> Result<(), Error>;

    /// Get the current connection-map snapshot.
    async fn get_peers(&self) -> Result<PeersSnapshot, Error>;

    /// Dial a peer. A no-op if the peer is already connected.
    async fn connect_peer(&self, addr: SocketAddr) -> Result<(), Error>;

    /// Disconnect from a peer.
    async fn disconnect_peer(&self, addr: SocketAddr) -> Result<(), Error>;

    /// Broadcast a message to peers matching the predicate.
    /// To only broadcast to outbound peers, check `PeerSummary::outbound`.
    async fn broadcast(
        &self,
        msg: NetworkMessage,
        predicate: for<'a> fn(&'a PeerSummary) -> bool,
    ) -> Result<Vec<net::SocketAddr>, Error>;

    /// Advertise squeaks to all negotiated peers.
    async fn send_inv(&self, inv: Vec<Inventory>) -> Result<(), Error>;

    /// Request squeaks from the given peer.
    async fn send_get_squeaks(&self, inv: Vec<Inventory>, addr: PeerId) -> Result<(), Error>;

    /// Send squeaks to the given peer.
    async fn send_squeaks(&self, squeaks: Vec<SqueakBundle>, addr: PeerId) -> Result<(), Error>;

    /// Request an offer for the given squeak from the given peer.
    async fn send_get_offer(&self, hash: SqueakHash, addr: PeerId) -> Result<(), Error>;

    /// Send an offer to the given peer.
    async fn send_offer(&self, offer: Offer, addr: PeerId) -> Result<(), Error>;

    /// Register an interest filter with the given peer.
    async fn send_subscribe(&self, filter: InterestFilter, addr: PeerId) -> Result<(), Error>;

    /// Withdraw an interest filter from the given peer.
    async fn send_unsubscribe(&self, filter: InterestFilter, addr: PeerId) -> Result<(), Error>;
}

#[cfg(any(test, feature = "mocks"))]
mockall::mock! {
    pub Handle {}

    impl Clone for Handle {
        fn clone(&self) -> Self;
    }

    #[async_trait]
    impl Handle for Handle {
        async fn command(&self, cmd: Command) -> Result<(), Error>;
        async fn get_peers(&self) -> Result<PeersSnapshot, Error>;
        async fn connect_peer(&self, addr: SocketAddr) -> Result<(), Error>;
        async fn disconnect_peer(&self, addr: SocketAddr) -> Result<(), Error>;
        async fn broadcast(
            &self,
            msg: NetworkMessage,
            predicate: for<'a> fn(&'a PeerSummary) -> bool,
        ) -> Result<Vec<net::SocketAddr>, Error>;
        async fn send_inv(&self, inv: Vec<Inventory>) -> Result<(), Error>;
        async fn send_get_squeaks(&self, inv: Vec<Inventory>, addr: PeerId) -> Result<(), Error>;
        async fn send_squeaks(&self, squeaks: Vec<SqueakBundle>, addr: PeerId) -> Result<(), Error>;
        async fn send_get_offer(&self, hash: SqueakHash, addr: PeerId) -> Result<(), Error>;
        async fn send_offer(&self, offer: Offer, addr: PeerId) -> Result<(), Error>;
        async fn send_subscribe(&self, filter: InterestFilter, addr: PeerId) -> Result<(), Error>;
        async fn send_unsubscribe(&self, filter: InterestFilter, addr: PeerId) -> Result<(), Error>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_mock() {
        let mut _mock = MockHandle::new();
    }
}
