use async_trait::async_trait;
use sqk_types::{PeerAddress, ReceivedOffer, SqueakHash};

use crate::StorageResult;

/// Received-offer persistence. At most one offer is kept per
/// `(squeak_hash, peer_address)`; saving again replaces the stored offer.
#[async_trait]
pub trait OfferStorage {
    async fn save_received_offer(&self, offer: &ReceivedOffer) -> StorageResult<()>;

    async fn get_received_offer(
        &self,
        hash: &SqueakHash,
        peer_address: &PeerAddress,
    ) -> StorageResult<Option<ReceivedOffer>>;

    /// All offers received for one squeak, across peers.
    async fn get_received_offers(&self, hash: &SqueakHash) -> StorageResult<Vec<ReceivedOffer>>;

    async fn delete_offers_for_squeak(&self, hash: &SqueakHash) -> StorageResult<()>;

    /// Drop offers whose invoices expired before `now_secs`. Returns the
    /// number removed.
    async fn delete_expired_received_offers(&self, now_secs: u64) -> StorageResult<u64>;
}
