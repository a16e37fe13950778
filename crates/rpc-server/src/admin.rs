//! The operator-facing admin RPC surface.
//!
//! The only place where core errors become user-visible status codes:
//! missing things are `NOT_FOUND`, everything else internal.
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonrpsee::{
    core::{RpcResult, SubscriptionResult},
    types::{
        error::{INTERNAL_ERROR_CODE, INVALID_REQUEST_CODE},
        ErrorObjectOwned,
    },
    PendingSubscriptionSink, SubscriptionMessage,
};
use serde::Serialize;
use tracing::{debug, warn};

use event_bus::{HubEvent, HubReceiver};
use lightning_client::{ChannelInfo, LightningClient, NodeInfo};
use sqk_controller::{Controller, NodeHubs, NodeStorage};
use sqk_p2p::client::handle::Handle as ClientHandle;
use sqk_rpc_api::admin::{
    ExternalAddressResponse, PaymentSummaryResponse, PeerResponse, ProfileResponse,
    SqueakAdminRpcServer,
};
use sqk_storage::{
    OfferStorage, PaymentStorage, PeerStorage, ProfileStorage, SqueakStorage, StorageError,
};
use sqk_sync::SyncController;
use sqk_types::{
    PeerAddress, PeerEvent, PeerSummary, Profile, ReceivedOffer, ReceivedPayment, SentPayment,
    SqueakEntry, SqueakHash, SqueakPeer,
};

/// Status code for admin lookups that found nothing.
pub(crate) const NOT_FOUND_CODE: i32 = -32001;

pub(crate) fn internal_error(err: impl std::fmt::Display) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(INTERNAL_ERROR_CODE, err.to_string(), Option::<()>::None)
}

pub(crate) fn not_found(what: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(
        NOT_FOUND_CODE,
        format!("{} not found", what),
        Option::<()>::None,
    )
}

fn invalid_request(msg: impl std::fmt::Display) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(INVALID_REQUEST_CODE, msg.to_string(), Option::<()>::None)
}

fn storage_error(err: StorageError) -> ErrorObjectOwned {
    match err {
        StorageError::ProfileNameExists(name) => {
            invalid_request(format!("profile name already exists: {name}"))
        }
        other => internal_error(other),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// Push one item down a subscription sink. Returns `false` once the client
/// is gone.
async fn emit<T: Serialize>(sink: &jsonrpsee::SubscriptionSink, item: &T) -> bool {
    let Ok(msg) = SubscriptionMessage::from_json(item) else {
        return false;
    };

    sink.send(msg).await.is_ok()
}

/// Implements the admin surface over the node's moving parts.
pub struct AdminController<S, P2P, L> {
    controller: Controller<S, P2P, L>,
    store: S,
    lightning: Arc<L>,
    p2p_handle: P2P,
    hubs: NodeHubs,
    sync_timeout: Duration,
}

impl<S, P2P, L> AdminController<S, P2P, L>
where
    S: NodeStorage,
    P2P: ClientHandle + Send + Sync + 'static,
    L: LightningClient + Send + Sync + 'static,
{
    pub fn new(
        controller: Controller<S, P2P, L>,
        store: S,
        lightning: Arc<L>,
        p2p_handle: P2P,
        hubs: NodeHubs,
        sync_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            store,
            lightning,
            p2p_handle,
            hubs,
            sync_timeout,
        }
    }

    /// Connected peers as saved-peer addresses.
    async fn connected_peer_addresses(&self) -> RpcResult<Vec<PeerAddress>> {
        let network = self.controller.get_network();
        let snapshot = self.p2p_handle.get_peers().await.map_err(internal_error)?;

        Ok(snapshot
            .peers
            .into_iter()
            .map(|peer| PeerAddress::from_socket_addr(network, peer.address))
            .collect())
    }

    /// Run one sync action against every connected peer, best effort.
    async fn for_each_connected_peer<F, Fut>(&self, action: F) -> RpcResult<()>
    where
        F: Fn(
            SyncController<S, P2P, L, sqk_sync::HttpPeerClient>,
        ) -> Fut,
        Fut: std::future::Future<Output = eyre::Result<()>>,
    {
        for peer_address in self.connected_peer_addresses().await? {
            let sync = match SyncController::connect(
                self.controller.clone(),
                peer_address.clone(),
                self.sync_timeout,
            ) {
                Ok(sync) => sync,
                Err(err) => {
                    warn!("failed to open sync stub for {}: {}", peer_address, err);
                    continue;
                }
            };

            if let Err(err) = action(sync).await {
                warn!("sync against {} failed: {}", peer_address, err);
            }
        }

        Ok(())
    }

    async fn profile_or_not_found(&self, profile_id: u64) -> RpcResult<Profile> {
        self.store
            .get_profile(profile_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| not_found("profile"))
    }
}

#[async_trait]
impl<S, P2P, L> SqueakAdminRpcServer for AdminController<S, P2P, L>
where
    S: NodeStorage,
    P2P: ClientHandle + Send + Sync + 'static,
    L: LightningClient + Send + Sync + 'static,
{
    // Profiles ////////////////////////////////////////////////////////////

    async fn create_signing_profile(&self, name: String) -> RpcResult<u64> {
        let profile = Profile::new_signing(name, self.controller.get_network());

        self.store
            .insert_profile(&profile)
            .await
            .map_err(storage_error)
    }

    async fn import_signing_profile(&self, name: String, private_key: String) -> RpcResult<u64> {
        let bytes = hex::decode(&private_key)
            .map_err(|_| invalid_request("private key is not valid hex"))?;
        let secret_key = bitcoin::secp256k1::SecretKey::from_slice(&bytes)
            .map_err(|_| invalid_request("not a valid private key"))?;

        let profile = Profile::import_signing(name, self.controller.get_network(), secret_key);

        self.store
            .insert_profile(&profile)
            .await
            .map_err(storage_error)
    }

    async fn create_contact_profile(&self, name: String, address: String) -> RpcResult<u64> {
        let profile = Profile::new_contact(name, address);

        self.store
            .insert_profile(&profile)
            .await
            .map_err(storage_error)
    }

    async fn get_profiles(&self) -> RpcResult<Vec<ProfileResponse>> {
        let profiles = self.store.get_profiles().await.map_err(storage_error)?;

        Ok(profiles.into_iter().map(ProfileResponse::from).collect())
    }

    async fn get_signing_profiles(&self) -> RpcResult<Vec<ProfileResponse>> {
        let profiles = self
            .store
            .get_signing_profiles()
            .await
            .map_err(storage_error)?;

        Ok(profiles.into_iter().map(ProfileResponse::from).collect())
    }

    async fn get_contact_profiles(&self) -> RpcResult<Vec<ProfileResponse>> {
        let profiles = self
            .store
            .get_contact_profiles()
            .await
            .map_err(storage_error)?;

        Ok(profiles.into_iter().map(ProfileResponse::from).collect())
    }

    async fn get_profile(&self, profile_id: u64) -> RpcResult<ProfileResponse> {
        Ok(self.profile_or_not_found(profile_id).await?.into())
    }

    async fn get_profile_by_name(&self, name: String) -> RpcResult<ProfileResponse> {
        self.store
            .get_profile_by_name(&name)
            .await
            .map_err(storage_error)?
            .map(ProfileResponse::from)
            .ok_or_else(|| not_found("profile"))
    }

    async fn get_profile_by_address(&self, address: String) -> RpcResult<ProfileResponse> {
        self.store
            .get_profile_by_address(&address)
            .await
            .map_err(storage_error)?
            .map(ProfileResponse::from)
            .ok_or_else(|| not_found("profile"))
    }

    async fn get_profile_private_key(&self, profile_id: u64) -> RpcResult<String> {
        let profile = self.profile_or_not_found(profile_id).await?;

        profile
            .private_key
            .map(hex::encode)
            .ok_or_else(|| invalid_request("profile has no private key"))
    }

    async fn set_profile_following(&self, profile_id: u64, following: bool) -> RpcResult<()> {
        self.profile_or_not_found(profile_id).await?;
        self.store
            .set_profile_following(profile_id, following)
            .await
            .map_err(storage_error)
    }

    async fn set_profile_use_custom_price(
        &self,
        profile_id: u64,
        use_custom_price: bool,
    ) -> RpcResult<()> {
        self.profile_or_not_found(profile_id).await?;
        self.store
            .set_profile_use_custom_price(profile_id, use_custom_price)
            .await
            .map_err(storage_error)
    }

    async fn set_profile_custom_price(&self, profile_id: u64, price_msat: u64) -> RpcResult<()> {
        self.profile_or_not_found(profile_id).await?;
        self.store
            .set_profile_custom_price(profile_id, price_msat)
            .await
            .map_err(storage_error)
    }

    async fn rename_profile(&self, profile_id: u64, name: String) -> RpcResult<()> {
        self.profile_or_not_found(profile_id).await?;
        self.store
            .rename_profile(profile_id, &name)
            .await
            .map_err(storage_error)
    }

    async fn set_profile_image(&self, profile_id: u64, image: String) -> RpcResult<()> {
        self.profile_or_not_found(profile_id).await?;
        let image = hex::decode(&image).map_err(|_| invalid_request("image is not valid hex"))?;

        self.store
            .set_profile_image(profile_id, Some(image))
            .await
            .map_err(storage_error)
    }

    async fn clear_profile_image(&self, profile_id: u64) -> RpcResult<()> {
        self.profile_or_not_found(profile_id).await?;
        self.store
            .set_profile_image(profile_id, None)
            .await
            .map_err(storage_error)
    }

    async fn delete_profile(&self, profile_id: u64) -> RpcResult<()> {
        self.store
            .delete_profile(profile_id)
            .await
            .map_err(storage_error)
    }

    // Squeaks /////////////////////////////////////////////////////////////

    async fn make_squeak(
        &self,
        profile_id: u64,
        content: String,
        reply_to: Option<SqueakHash>,
    ) -> RpcResult<SqueakHash> {
        self.controller
            .make_squeak(profile_id, &content, reply_to)
            .await
            .map_err(internal_error)
    }

    async fn get_squeak_display(&self, hash: SqueakHash) -> RpcResult<SqueakEntry> {
        self.store
            .get_squeak_entry(&hash)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| not_found("squeak"))
    }

    async fn get_timeline_squeak_displays(&self, limit: usize) -> RpcResult<Vec<SqueakEntry>> {
        self.store
            .get_timeline_entries(limit)
            .await
            .map_err(storage_error)
    }

    async fn get_address_squeak_displays(
        &self,
        address: String,
        limit: usize,
    ) -> RpcResult<Vec<SqueakEntry>> {
        self.store
            .get_address_entries(&address, limit)
            .await
            .map_err(storage_error)
    }

    async fn get_ancestor_squeak_displays(
        &self,
        hash: SqueakHash,
    ) -> RpcResult<Vec<SqueakEntry>> {
        self.store
            .get_thread_ancestor_entries(&hash)
            .await
            .map_err(storage_error)
    }

    async fn get_reply_squeak_displays(&self, hash: SqueakHash) -> RpcResult<Vec<SqueakEntry>> {
        self.store
            .get_thread_reply_entries(&hash)
            .await
            .map_err(storage_error)
    }

    async fn get_liked_squeak_displays(&self, limit: usize) -> RpcResult<Vec<SqueakEntry>> {
        self.store
            .get_liked_entries(limit)
            .await
            .map_err(storage_error)
    }

    async fn search_squeak_displays(
        &self,
        text: String,
        limit: usize,
        last: Option<SqueakHash>,
    ) -> RpcResult<Vec<SqueakEntry>> {
        self.store
            .get_squeak_entries_for_text_search(&text, limit, last)
            .await
            .map_err(storage_error)
    }

    async fn like_squeak(&self, hash: SqueakHash) -> RpcResult<()> {
        self.store
            .get_squeak(&hash)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| not_found("squeak"))?;

        self.store
            .set_squeak_liked(&hash, now_ms())
            .await
            .map_err(storage_error)
    }

    async fn unlike_squeak(&self, hash: SqueakHash) -> RpcResult<()> {
        self.store
            .set_squeak_unliked(&hash)
            .await
            .map_err(storage_error)
    }

    async fn delete_squeak(&self, hash: SqueakHash) -> RpcResult<()> {
        self.controller
            .delete_squeak(&hash)
            .await
            .map_err(internal_error)
    }

    async fn get_number_of_squeaks(&self) -> RpcResult<u64> {
        self.store.number_of_squeaks().await.map_err(storage_error)
    }

    // Saved peers /////////////////////////////////////////////////////////

    async fn create_peer(&self, name: String, host: String, port: u16) -> RpcResult<u64> {
        let address = PeerAddress::new(self.controller.get_network(), host, port);
        let peer = SqueakPeer::new(name, address);

        self.store.insert_peer(&peer).await.map_err(storage_error)
    }

    async fn get_peer(&self, peer_id: u64) -> RpcResult<PeerResponse> {
        self.store
            .get_peer(peer_id)
            .await
            .map_err(storage_error)?
            .map(PeerResponse::from)
            .ok_or_else(|| not_found("peer"))
    }

    async fn get_peers(&self) -> RpcResult<Vec<PeerResponse>> {
        let peers = self.store.get_peers().await.map_err(storage_error)?;

        Ok(peers.into_iter().map(PeerResponse::from).collect())
    }

    async fn set_peer_autoconnect(&self, peer_id: u64, autoconnect: bool) -> RpcResult<()> {
        self.store
            .get_peer(peer_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| not_found("peer"))?;

        self.store
            .set_peer_autoconnect(peer_id, autoconnect)
            .await
            .map_err(storage_error)
    }

    async fn rename_peer(&self, peer_id: u64, name: String) -> RpcResult<()> {
        self.store
            .rename_peer(peer_id, &name)
            .await
            .map_err(storage_error)
    }

    async fn delete_peer(&self, peer_id: u64) -> RpcResult<()> {
        self.store.delete_peer(peer_id).await.map_err(storage_error)
    }

    // Network /////////////////////////////////////////////////////////////

    async fn connect_peer(&self, host: String, port: u16) -> RpcResult<()> {
        let address = PeerAddress::new(self.controller.get_network(), host, port);
        let socket_addr = address
            .to_socket_addr()
            .map_err(|err| invalid_request(format!("cannot resolve {}: {}", address, err)))?;

        self.p2p_handle
            .connect_peer(socket_addr)
            .await
            .map_err(internal_error)
    }

    async fn disconnect_peer(&self, host: String, port: u16) -> RpcResult<()> {
        let address = PeerAddress::new(self.controller.get_network(), host, port);
        let socket_addr = address
            .to_socket_addr()
            .map_err(|err| invalid_request(format!("cannot resolve {}: {}", address, err)))?;

        self.p2p_handle
            .disconnect_peer(socket_addr)
            .await
            .map_err(internal_error)
    }

    async fn get_connected_peers(&self) -> RpcResult<Vec<PeerSummary>> {
        let snapshot = self.p2p_handle.get_peers().await.map_err(internal_error)?;

        Ok(snapshot.peers)
    }

    async fn get_connected_peer(&self, host: String, port: u16) -> RpcResult<PeerSummary> {
        let address = PeerAddress::new(self.controller.get_network(), host, port);
        let socket_addr = address
            .to_socket_addr()
            .map_err(|err| invalid_request(format!("cannot resolve {}: {}", address, err)))?;

        let snapshot = self.p2p_handle.get_peers().await.map_err(internal_error)?;

        snapshot
            .peers
            .into_iter()
            .find(|peer| peer.address == socket_addr)
            .ok_or_else(|| not_found("connected peer"))
    }

    async fn get_network(&self) -> RpcResult<String> {
        Ok(self.controller.get_network().to_string())
    }

    async fn get_external_address(&self) -> RpcResult<ExternalAddressResponse> {
        let (host, port) = self.controller.get_external_address();

        Ok(ExternalAddressResponse { host, port })
    }

    // Sync ////////////////////////////////////////////////////////////////

    async fn download_squeaks(&self) -> RpcResult<()> {
        self.for_each_connected_peer(|sync| async move { sync.download(None).await })
            .await
    }

    async fn download_squeak(&self, hash: SqueakHash) -> RpcResult<()> {
        self.for_each_connected_peer(|sync| async move {
            sync.download_single_squeak(hash).await
        })
        .await
    }

    async fn download_offers(&self, hash: SqueakHash) -> RpcResult<()> {
        self.for_each_connected_peer(|sync| async move { sync.download_offer(hash).await })
            .await
    }

    async fn download_replies(&self, hash: SqueakHash) -> RpcResult<()> {
        self.for_each_connected_peer(|sync| async move { sync.download_replies(hash).await })
            .await
    }

    async fn download_address_squeaks(&self, address: String) -> RpcResult<()> {
        self.for_each_connected_peer(|sync| {
            let address = address.clone();
            async move { sync.download_address_squeaks(address).await }
        })
        .await
    }

    // Payments ////////////////////////////////////////////////////////////

    async fn pay_offer(
        &self,
        hash: SqueakHash,
        peer_host: String,
        peer_port: u16,
    ) -> RpcResult<SentPayment> {
        let peer_address =
            PeerAddress::new(self.controller.get_network(), peer_host, peer_port);

        let offer = self
            .store
            .get_received_offer(&hash, &peer_address)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| not_found("offer"))?;

        self.controller
            .pay_offer(&offer)
            .await
            .map_err(internal_error)
    }

    async fn get_buy_offers(&self, hash: SqueakHash) -> RpcResult<Vec<ReceivedOffer>> {
        self.store
            .get_received_offers(&hash)
            .await
            .map_err(storage_error)
    }

    async fn get_buy_offer(
        &self,
        hash: SqueakHash,
        peer_host: String,
        peer_port: u16,
    ) -> RpcResult<ReceivedOffer> {
        let peer_address =
            PeerAddress::new(self.controller.get_network(), peer_host, peer_port);

        self.store
            .get_received_offer(&hash, &peer_address)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| not_found("offer"))
    }

    async fn get_sent_payments(&self, limit: usize) -> RpcResult<Vec<SentPayment>> {
        self.store
            .get_sent_payments(limit)
            .await
            .map_err(storage_error)
    }

    async fn get_received_payments(&self, limit: usize) -> RpcResult<Vec<ReceivedPayment>> {
        self.store
            .get_received_payments(limit)
            .await
            .map_err(storage_error)
    }

    async fn get_payment_summary(&self) -> RpcResult<PaymentSummaryResponse> {
        self.store
            .get_payment_summary()
            .await
            .map_err(storage_error)
    }

    async fn reprocess_received_payments(&self) -> RpcResult<u64> {
        let ingested = self
            .controller
            .reprocess_received_payments()
            .await
            .map_err(internal_error)?;

        Ok(ingested as u64)
    }

    // Lightning ///////////////////////////////////////////////////////////

    async fn lnd_get_info(&self) -> RpcResult<NodeInfo> {
        self.lightning.get_info().await.map_err(internal_error)
    }

    async fn lnd_list_channels(&self) -> RpcResult<Vec<ChannelInfo>> {
        self.lightning.list_channels().await.map_err(internal_error)
    }

    async fn lnd_new_address(&self) -> RpcResult<String> {
        self.lightning.new_address().await.map_err(internal_error)
    }

    // Subscriptions ///////////////////////////////////////////////////////

    async fn subscribe_connected_peers(
        &self,
        pending: PendingSubscriptionSink,
    ) -> SubscriptionResult {
        let receiver = self.hubs.peer_events.subscribe();
        let sink = pending.accept().await?;

        // Initial snapshot, then one per connection-map change.
        let snapshot = self.p2p_handle.get_peers().await.map_err(|e| e.to_string())?;
        if !emit(&sink, &snapshot.peers).await {
            return Ok(());
        }

        loop {
            tokio::select! {
                event = receiver.recv() => {
                    let Ok(_event) = event else { break };

                    let snapshot = self.p2p_handle.get_peers().await.map_err(|e| e.to_string())?;
                    if !emit(&sink, &snapshot.peers).await {
                        break;
                    }
                }
                _ = sink.closed() => break,
            }
        }

        Ok(())
    }

    async fn subscribe_connected_peer(
        &self,
        pending: PendingSubscriptionSink,
        host: String,
        port: u16,
    ) -> SubscriptionResult {
        let address = PeerAddress::new(self.controller.get_network(), host, port);
        let socket_addr = address.to_socket_addr().map_err(|e| e.to_string())?;

        let receiver = self.hubs.peer_events.subscribe();
        let sink = pending.accept().await?;

        loop {
            tokio::select! {
                event = receiver.recv() => {
                    let Ok(event) = event else { break };

                    let update: Option<Option<PeerSummary>> = match event {
                        HubEvent::Item(PeerEvent::Connected(peer)) if peer.address == socket_addr => {
                            Some(Some(peer))
                        }
                        HubEvent::Item(PeerEvent::Disconnected(peer)) if peer.address == socket_addr => {
                            Some(None)
                        }
                        HubEvent::Lagged(_) => {
                            // Resync from the authoritative snapshot.
                            let snapshot =
                                self.p2p_handle.get_peers().await.map_err(|e| e.to_string())?;
                            Some(snapshot.peers.into_iter().find(|p| p.address == socket_addr))
                        }
                        _ => None,
                    };

                    if let Some(update) = update {
                        if !emit(&sink, &update).await {
                            break;
                        }
                    }
                }
                _ = sink.closed() => break,
            }
        }

        Ok(())
    }

    async fn subscribe_buy_offers(
        &self,
        pending: PendingSubscriptionSink,
        hash: SqueakHash,
    ) -> SubscriptionResult {
        let receiver = self.hubs.buy_offers.subscribe();
        let sink = pending.accept().await?;

        forward_filtered(sink, receiver, move |offer: &ReceivedOffer| {
            offer.offer.squeak_hash == hash
        })
        .await
    }

    async fn subscribe_received_payments(
        &self,
        pending: PendingSubscriptionSink,
    ) -> SubscriptionResult {
        let receiver = self.hubs.received_payments.subscribe();
        let sink = pending.accept().await?;

        forward_filtered(sink, receiver, |_: &ReceivedPayment| true).await
    }

    async fn subscribe_squeak_display(
        &self,
        pending: PendingSubscriptionSink,
        hash: SqueakHash,
    ) -> SubscriptionResult {
        let receiver = self.hubs.squeak_displays.subscribe();
        let sink = pending.accept().await?;

        forward_filtered(sink, receiver, move |entry: &SqueakEntry| {
            entry.squeak_hash == hash
        })
        .await
    }

    async fn subscribe_squeak_displays(
        &self,
        pending: PendingSubscriptionSink,
    ) -> SubscriptionResult {
        let receiver = self.hubs.squeak_displays.subscribe();
        let sink = pending.accept().await?;

        forward_filtered(sink, receiver, |_: &SqueakEntry| true).await
    }

    async fn subscribe_reply_squeak_displays(
        &self,
        pending: PendingSubscriptionSink,
        hash: SqueakHash,
    ) -> SubscriptionResult {
        let receiver = self.hubs.squeak_displays.subscribe();
        let sink = pending.accept().await?;

        forward_filtered(sink, receiver, move |entry: &SqueakEntry| {
            entry.reply_to == Some(hash)
        })
        .await
    }

    async fn subscribe_address_squeak_displays(
        &self,
        pending: PendingSubscriptionSink,
        address: String,
    ) -> SubscriptionResult {
        let receiver = self.hubs.squeak_displays.subscribe();
        let sink = pending.accept().await?;

        forward_filtered(sink, receiver, move |entry: &SqueakEntry| {
            entry.author_address == address
        })
        .await
    }

    async fn subscribe_ancestor_squeak_displays(
        &self,
        pending: PendingSubscriptionSink,
        hash: SqueakHash,
    ) -> SubscriptionResult {
        let receiver = self.hubs.squeak_displays.subscribe();
        let sink = pending.accept().await?;

        loop {
            tokio::select! {
                event = receiver.recv() => {
                    match event {
                        Ok(HubEvent::Item(entry)) => {
                            let ancestors = self
                                .store
                                .get_thread_ancestor_entries(&hash)
                                .await
                                .map_err(|e| e.to_string())?;

                            if ancestors.iter().any(|a| a.squeak_hash == entry.squeak_hash)
                                && !emit(&sink, &entry).await
                            {
                                break;
                            }
                        }
                        Ok(HubEvent::Lagged(n)) => {
                            debug!("ancestor subscription lagged by {} event(s)", n);
                        }
                        Err(_) => break,
                    }
                }
                _ = sink.closed() => break,
            }
        }

        Ok(())
    }

    async fn subscribe_timeline_squeak_displays(
        &self,
        pending: PendingSubscriptionSink,
    ) -> SubscriptionResult {
        let receiver = self.hubs.squeak_displays.subscribe();
        let sink = pending.accept().await?;

        loop {
            tokio::select! {
                event = receiver.recv() => {
                    match event {
                        Ok(HubEvent::Item(entry)) => {
                            let followed = self
                                .store
                                .get_followed_addresses()
                                .await
                                .map_err(|e| e.to_string())?;

                            if followed.contains(&entry.author_address)
                                && !emit(&sink, &entry).await
                            {
                                break;
                            }
                        }
                        Ok(HubEvent::Lagged(n)) => {
                            debug!("timeline subscription lagged by {} event(s)", n);
                        }
                        Err(_) => break,
                    }
                }
                _ = sink.closed() => break,
            }
        }

        Ok(())
    }
}

/// Forward hub items matching the predicate until either side goes away.
/// Lag markers are logged; the client sees a gap, not stale data.
async fn forward_filtered<E, F>(
    sink: jsonrpsee::SubscriptionSink,
    receiver: HubReceiver<E>,
    predicate: F,
) -> SubscriptionResult
where
    E: Clone + Serialize,
    F: Fn(&E) -> bool,
{
    loop {
        tokio::select! {
            event = receiver.recv() => {
                match event {
                    Ok(HubEvent::Item(item)) => {
                        if predicate(&item) && !emit(&sink, &item).await {
                            break;
                        }
                    }
                    Ok(HubEvent::Lagged(n)) => {
                        debug!("subscription lagged by {} event(s)", n);
                    }
                    Err(_) => break,
                }
            }
            _ = sink.closed() => break,
        }
    }

    Ok(())
}
