use std::collections::HashSet;
use std::time::Duration;

use eyre::Result;
use tracing::{debug, info, warn};

use lightning_client::LightningClient;
use sqk_controller::{Controller, NodeStorage};
use sqk_p2p::client::handle::Handle as ClientHandle;
use sqk_types::{BlockRange, PeerAddress, SqueakHash};

use crate::criteria::DownloadCriteria;
use crate::peer_client::{HttpPeerClient, PeerSyncRpc};

/// One sync operation against one remote peer.
pub struct SyncController<S, P2P, L, R> {
    controller: Controller<S, P2P, L>,
    peer_address: PeerAddress,
    client: R,
}

impl<S, P2P, L> SyncController<S, P2P, L, HttpPeerClient>
where
    S: NodeStorage,
    P2P: ClientHandle + Send + Sync + 'static,
    L: LightningClient + Send + Sync + 'static,
{
    /// Open a sync connection to the peer's RPC surface with a per-request
    /// timeout.
    pub fn connect(
        controller: Controller<S, P2P, L>,
        peer_address: PeerAddress,
        timeout: Duration,
    ) -> Result<Self> {
        let client = HttpPeerClient::open(&peer_address, timeout)?;

        Ok(Self::new(controller, peer_address, client))
    }
}

impl<S, P2P, L, R> SyncController<S, P2P, L, R>
where
    S: NodeStorage,
    P2P: ClientHandle + Send + Sync + 'static,
    L: LightningClient + Send + Sync + 'static,
    R: PeerSyncRpc,
{
    pub fn new(controller: Controller<S, P2P, L>, peer_address: PeerAddress, client: R) -> Self {
        Self {
            controller,
            peer_address,
            client,
        }
    }

    /// Download squeaks by followed authors inside the block range (the
    /// current window by default), plus offers for any that remain locked.
    pub async fn download(&self, block_range: Option<BlockRange>) -> Result<()> {
        let network = self.controller.get_network();
        let block_range = match block_range {
            Some(range) => range,
            None => self.controller.get_block_range().await?,
        };
        let followed_addresses = self.controller.get_followed_addresses().await?;

        let remote_hashes = self
            .client
            .lookup_squeaks_to_download(
                network,
                followed_addresses.clone(),
                block_range.min_block,
                block_range.max_block,
            )
            .await?;

        debug!(
            "peer {} advertises {} squeak(s)",
            self.peer_address,
            remote_hashes.len()
        );

        let criteria = DownloadCriteria::Range {
            block_range,
            follow_list: followed_addresses,
        };

        for squeak_hash in remote_hashes {
            if let Err(err) = self.download_one(squeak_hash, &criteria).await {
                warn!("failed to download {} from {}: {}", squeak_hash, self.peer_address, err);
            }
        }

        Ok(())
    }

    /// Upload squeaks the remote is missing for the authors it accepts. Only
    /// unlocked squeaks are worth sending.
    pub async fn upload(&self) -> Result<()> {
        let network = self.controller.get_network();
        let sharing_addresses = self.controller.get_sharing_addresses().await?;

        let lookup = self
            .client
            .lookup_squeaks_to_upload(network, sharing_addresses)
            .await?;

        let local_hashes = self
            .controller
            .lookup_squeaks(&lookup.addresses, lookup.min_block, lookup.max_block)
            .await?;

        let remote_hashes: HashSet<SqueakHash> = lookup.hashes.into_iter().collect();

        for hash in local_hashes {
            if remote_hashes.contains(&hash) {
                continue;
            }
            if let Err(err) = self.upload_one(hash).await {
                warn!("failed to upload {} to {}: {}", hash, self.peer_address, err);
            }
        }

        Ok(())
    }

    /// Download a single squeak and the corresponding offer.
    pub async fn download_single_squeak(&self, squeak_hash: SqueakHash) -> Result<()> {
        info!(
            "downloading single squeak {} from peer {}",
            squeak_hash, self.peer_address
        );
        let criteria = DownloadCriteria::Hash { squeak_hash };

        self.download_one(squeak_hash, &criteria).await
    }

    /// Re-fetch an offer for a locked squeak, replacing any stored one.
    pub async fn download_offer(&self, squeak_hash: SqueakHash) -> Result<()> {
        let Some(squeak) = self.controller.get_squeak(&squeak_hash).await? else {
            return Ok(());
        };
        if squeak.is_unlocked() {
            return Ok(());
        }

        self.fetch_offer(squeak_hash).await
    }

    /// Download the replies the remote carries for the given squeak.
    pub async fn download_replies(&self, squeak_hash: SqueakHash) -> Result<()> {
        let reply_hashes = self.client.lookup_replies(squeak_hash).await?;

        for hash in reply_hashes {
            let criteria = DownloadCriteria::Hash { squeak_hash: hash };
            if let Err(err) = self.download_one(hash, &criteria).await {
                warn!("failed to download reply {} from {}: {}", hash, self.peer_address, err);
            }
        }

        Ok(())
    }

    /// Download everything the remote carries for one author.
    pub async fn download_address_squeaks(&self, address: String) -> Result<()> {
        let network = self.controller.get_network();
        let block_range = BlockRange::new(0, u32::MAX);

        let remote_hashes = self
            .client
            .lookup_squeaks_to_download(
                network,
                vec![address.clone()],
                block_range.min_block,
                block_range.max_block,
            )
            .await?;

        let criteria = DownloadCriteria::Range {
            block_range,
            follow_list: vec![address],
        };

        for hash in remote_hashes {
            if let Err(err) = self.download_one(hash, &criteria).await {
                warn!("failed to download {} from {}: {}", hash, self.peer_address, err);
            }
        }

        Ok(())
    }

    /// Download one squeak if we don't have it, then an offer for it if it is
    /// still locked and we hold none from this peer.
    async fn download_one(
        &self,
        squeak_hash: SqueakHash,
        criteria: &DownloadCriteria,
    ) -> Result<()> {
        if self.controller.get_squeak(&squeak_hash).await?.is_none() {
            self.fetch_squeak(squeak_hash, criteria).await?;
        }

        let Some(squeak) = self.controller.get_squeak(&squeak_hash).await? else {
            // Not interesting enough to store; no point buying a key for it.
            return Ok(());
        };

        if squeak.is_unlocked() {
            return Ok(());
        }
        if self
            .controller
            .get_received_offer(&squeak_hash, &self.peer_address)
            .await?
            .is_some()
        {
            return Ok(());
        }

        self.fetch_offer(squeak_hash).await
    }

    async fn fetch_squeak(
        &self,
        squeak_hash: SqueakHash,
        criteria: &DownloadCriteria,
    ) -> Result<()> {
        let bundle = self.client.download_squeak(squeak_hash).await?;

        if bundle.hash() != squeak_hash {
            debug!("peer {} served a different squeak than asked", self.peer_address);
            return Ok(());
        }
        if !criteria.is_interested(&bundle.squeak) {
            debug!("discarding uninteresting squeak {}", squeak_hash);
            return Ok(());
        }

        self.controller.save_downloaded_squeak(&bundle).await?;

        Ok(())
    }

    async fn fetch_offer(&self, squeak_hash: SqueakHash) -> Result<()> {
        let offer = self.client.download_offer(squeak_hash).await?;

        if offer.squeak_hash != squeak_hash {
            debug!("peer {} served an offer for a different squeak", self.peer_address);
            return Ok(());
        }

        let received = self
            .controller
            .decode_received_offer(offer, self.peer_address.clone())
            .await?;
        self.controller.save_offer(received).await?;

        info!(
            "downloaded offer for squeak {} from peer {}",
            squeak_hash, self.peer_address
        );

        Ok(())
    }

    async fn upload_one(&self, squeak_hash: SqueakHash) -> Result<()> {
        let Some(bundle) = self.controller.get_squeak_bundle(&squeak_hash).await? else {
            return Ok(());
        };
        if !bundle.squeak.is_unlocked() {
            return Ok(());
        }

        self.client
            .upload_squeak(bundle.without_decryption_key())
            .await?;

        info!(
            "uploaded squeak {} to peer {}",
            squeak_hash, self.peer_address
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use bitcoin::block::{Header as BlockHeader, Version};
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{rand::thread_rng, SecretKey};
    use bitcoin::hash_types::TxMerkleNode;
    use bitcoin::{BlockHash, CompactTarget};
    use event_bus::EventBus;
    use mockall::predicate::eq;

    use lightning_client::{DecodedPaymentRequest, MockLightningClient};
    use sqk_controller::{ControllerConfig, NodeHubs};
    use sqk_p2p::client::handle::MockHandle;
    use sqk_storage::{MemoryStore, OfferStorage, ProfileStorage, SqueakStorage};
    use sqk_types::network::Network;
    use sqk_types::{Offer, Profile, Squeak, SqueakBundle};

    use crate::peer_client::MockPeerSyncRpc;

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn gen_header(height: u32) -> BlockHeader {
        let mut header = BlockHeader {
            version: Version::from_consensus(4),
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_600_000_000 + height,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: 0,
        };
        while header.validate_pow(header.target()).is_err() {
            header.nonce += 1;
        }
        header
    }

    fn gen_bundle(signing_key: &SecretKey, content: &str, height: u32) -> SqueakBundle {
        let header = gen_header(height);
        let squeak = Squeak::make(
            signing_key,
            Network::Simnet,
            content,
            height,
            header.block_hash(),
            None,
            now() as u32,
        )
        .unwrap()
        .0;

        SqueakBundle::new(squeak, header)
    }

    fn peer() -> PeerAddress {
        PeerAddress::new(Network::Simnet, "127.0.0.1", 18666)
    }

    fn controller(
        store: MemoryStore,
        p2p: MockHandle,
        lightning: MockLightningClient,
    ) -> Controller<MemoryStore, MockHandle, MockLightningClient> {
        let mut bus = EventBus::default();
        bus.register::<sqk_types::ControllerMessage>(None);

        Controller::new(
            &bus,
            store,
            Arc::new(lightning),
            p2p,
            NodeHubs::new(),
            ControllerConfig {
                network: Network::Simnet,
                price_msat: 1_000,
                external_host: "node.example.com".into(),
                external_port: 18666,
                block_range_window: 100,
            },
        )
    }

    fn offer_for(bundle: &SqueakBundle) -> Offer {
        Offer {
            squeak_hash: bundle.hash(),
            price_msat: 2_000,
            payment_request: "lnsb20u1pexample".into(),
            host: "seller.example.com".into(),
            port: 18666,
            node_pubkey: "02seller".into(),
            expiry: 3600,
            invoice_timestamp: now(),
        }
    }

    /// Lightning mock that decodes any payment request as a valid offer
    /// invoice for the given squeak.
    fn decoding_lightning(bundle: &SqueakBundle) -> MockLightningClient {
        let data_key = bundle.squeak.data_key;
        let mut lightning = MockLightningClient::new();

        lightning
            .expect_decode_payment_request()
            .returning(move |_| {
                Ok(DecodedPaymentRequest {
                    payment_hash: data_key,
                    amount_msat: 2_000,
                    node_pubkey: "02seller".into(),
                    expiry: 3600,
                    timestamp: now(),
                })
            });
        lightning
    }

    #[tokio::test]
    async fn download_fetches_missing_squeaks_and_their_offers() {
        let store = MemoryStore::new();
        let author = SecretKey::new(&mut thread_rng());
        let have = gen_bundle(&author, "already here", 5);
        let want = gen_bundle(&author, "remote only", 6).without_decryption_key();

        store
            .insert_squeak(&have.squeak, &have.header)
            .await
            .unwrap();

        // Follow the author so the range criteria accepts the download.
        let mut profile = Profile::new_contact("author", want.squeak.author_address.clone());
        profile.following = true;
        store.insert_profile(&profile).await.unwrap();

        let mut rpc = MockPeerSyncRpc::new();
        let advertised = vec![have.hash(), want.hash()];
        rpc.expect_lookup_squeaks_to_download()
            .returning(move |_, _, _, _| Ok(advertised.clone()));
        let served = want.clone();
        rpc.expect_download_squeak()
            .with(eq(want.hash()))
            .times(1)
            .returning(move |_| Ok(served.clone()));
        let offer = offer_for(&want);
        rpc.expect_download_offer()
            .with(eq(want.hash()))
            .times(1)
            .returning(move |_| Ok(offer.clone()));

        let mut p2p = MockHandle::new();
        p2p.expect_send_inv().returning(|_| Ok(()));

        let controller = controller(store.clone(), p2p, decoding_lightning(&want));
        let sync = SyncController::new(controller, peer(), rpc);

        sync.download(Some(BlockRange::new(0, 100))).await.unwrap();

        assert!(store.get_squeak(&want.hash()).await.unwrap().is_some());
        assert!(store
            .get_received_offer(&want.hash(), &peer())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn unfollowed_author_is_discarded_after_download() {
        let store = MemoryStore::new();
        let author = SecretKey::new(&mut thread_rng());
        let bundle = gen_bundle(&author, "stranger danger", 6).without_decryption_key();

        let mut rpc = MockPeerSyncRpc::new();
        let advertised = vec![bundle.hash()];
        rpc.expect_lookup_squeaks_to_download()
            .returning(move |_, _, _, _| Ok(advertised.clone()));
        let served = bundle.clone();
        rpc.expect_download_squeak()
            .times(1)
            .returning(move |_| Ok(served.clone()));
        // Nothing stored, so no offer is fetched either.

        let controller = controller(store.clone(), MockHandle::new(), MockLightningClient::new());
        let sync = SyncController::new(controller, peer(), rpc);

        sync.download(Some(BlockRange::new(0, 100))).await.unwrap();

        assert_eq!(store.number_of_squeaks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn download_single_squeak_is_idempotent() {
        let store = MemoryStore::new();
        let author = SecretKey::new(&mut thread_rng());
        let bundle = gen_bundle(&author, "once only", 6).without_decryption_key();

        let mut rpc = MockPeerSyncRpc::new();
        let served = bundle.clone();
        rpc.expect_download_squeak()
            .times(1)
            .returning(move |_| Ok(served.clone()));
        let offer = offer_for(&bundle);
        rpc.expect_download_offer()
            .times(1)
            .returning(move |_| Ok(offer.clone()));

        let mut p2p = MockHandle::new();
        p2p.expect_send_inv().returning(|_| Ok(()));

        let controller = controller(store.clone(), p2p, decoding_lightning(&bundle));
        let sync = SyncController::new(controller, peer(), rpc);

        sync.download_single_squeak(bundle.hash()).await.unwrap();
        sync.download_single_squeak(bundle.hash()).await.unwrap();

        assert_eq!(store.number_of_squeaks().await.unwrap(), 1);
        assert_eq!(
            store.get_received_offers(&bundle.hash()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn upload_sends_only_what_the_remote_is_missing() {
        let store = MemoryStore::new();
        let author = SecretKey::new(&mut thread_rng());
        let known = gen_bundle(&author, "remote has this", 5);
        let fresh = gen_bundle(&author, "remote wants this", 6);

        store
            .insert_squeak(&known.squeak, &known.header)
            .await
            .unwrap();
        store
            .insert_squeak(&fresh.squeak, &fresh.header)
            .await
            .unwrap();

        let mut rpc = MockPeerSyncRpc::new();
        let remote_known = known.hash();
        let accepted_author = known.squeak.author_address.clone();
        rpc.expect_lookup_squeaks_to_upload()
            .returning(move |_, _| {
                Ok(sqk_rpc_api::peer::UploadLookup {
                    hashes: vec![remote_known],
                    addresses: vec![accepted_author.clone()],
                    min_block: 0,
                    max_block: 100,
                })
            });
        let fresh_hash = fresh.hash();
        rpc.expect_upload_squeak()
            .withf(move |bundle| bundle.hash() == fresh_hash && !bundle.squeak.is_unlocked())
            .times(1)
            .returning(|_| Ok(()));

        let controller = controller(store, MockHandle::new(), MockLightningClient::new());
        let sync = SyncController::new(controller, peer(), rpc);

        sync.upload().await.unwrap();
    }

    #[tokio::test]
    async fn locked_squeaks_are_not_uploaded() {
        let store = MemoryStore::new();
        let author = SecretKey::new(&mut thread_rng());
        let locked = gen_bundle(&author, "still locked", 6).without_decryption_key();

        store
            .insert_squeak(&locked.squeak, &locked.header)
            .await
            .unwrap();

        let mut rpc = MockPeerSyncRpc::new();
        let accepted_author = locked.squeak.author_address.clone();
        rpc.expect_lookup_squeaks_to_upload()
            .returning(move |_, _| {
                Ok(sqk_rpc_api::peer::UploadLookup {
                    hashes: vec![],
                    addresses: vec![accepted_author.clone()],
                    min_block: 0,
                    max_block: 100,
                })
            });
        // No upload expectation: a locked squeak must never be pushed.

        let controller = controller(store, MockHandle::new(), MockLightningClient::new());
        let sync = SyncController::new(controller, peer(), rpc);

        sync.upload().await.unwrap();
    }
}
