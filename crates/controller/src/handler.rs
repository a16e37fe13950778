use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitcoin::consensus::deserialize;
use event_bus::{typeid, EventBus};
use eyre::{eyre, Result, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use lightning_client::LightningClient;
use sqk_p2p::client::handle::Handle as ClientHandle;
use sqk_storage::{OfferStorage, PaymentStorage, PeerStorage, ProfileStorage, SqueakStorage};
use sqk_types::network::Network;
use sqk_types::{
    BlockRange, ControllerMessage, ControllerP2PMessage, InterestFilter, Inventory, Offer,
    PaymentFailureReason, PeerAddress, PeerEvent, ReceivedOffer, ReceivedPayment, SentPayment,
    Squeak, SqueakBundle, SqueakEntry, SqueakHash,
};

use crate::hubs::NodeHubs;

/// Interval between expired-offer cleanups.
const OFFER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Interval between polls of the Lightning backend for settled invoices.
const PAYMENT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Expiry of invoices backing our offers.
const INVOICE_EXPIRY_SECS: u32 = 3600;

/// Everything the controller needs from the persistence layer.
pub trait NodeStorage:
    SqueakStorage
    + OfferStorage
    + PaymentStorage
    + ProfileStorage
    + PeerStorage
    + Clone
    + Send
    + Sync
    + 'static
{
}

impl<T> NodeStorage for T where
    T: SqueakStorage
        + OfferStorage
        + PaymentStorage
        + PeerStorage
        + ProfileStorage
        + Clone
        + Send
        + Sync
        + 'static
{
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub network: Network,
    /// Default price of a decryption key. `0` disables selling.
    pub price_msat: u64,
    /// Externally reachable host published in offers.
    pub external_host: String,
    /// Externally reachable port published in offers.
    pub external_port: u16,
    /// Number of recent blocks the node syncs and accepts squeaks for.
    pub block_range_window: u32,
}

/// Handles peer protocol semantics: inv reconciliation, serving squeaks,
/// selling and buying decryption keys, and subscription fan-out.
pub struct Controller<S, P2P, L> {
    store: S,
    lightning: Arc<L>,
    p2p_handle: P2P,
    event_bus: EventBus,
    hubs: NodeHubs,
    config: ControllerConfig,
    /// Interest filters registered by remote peers.
    peer_subscriptions: Arc<Mutex<HashMap<SocketAddr, Vec<InterestFilter>>>>,
}

impl<S, P2P, L> Clone for Controller<S, P2P, L>
where
    S: Clone,
    P2P: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lightning: Arc::clone(&self.lightning),
            p2p_handle: self.p2p_handle.clone(),
            event_bus: self.event_bus.clone(),
            hubs: self.hubs.clone(),
            config: self.config.clone(),
            peer_subscriptions: Arc::clone(&self.peer_subscriptions),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

impl<S, P2P, L> Controller<S, P2P, L>
where
    S: NodeStorage,
    P2P: ClientHandle + Send + Sync + 'static,
    L: LightningClient + Send + Sync + 'static,
{
    pub fn new(
        full_event_bus: &EventBus,
        store: S,
        lightning: Arc<L>,
        p2p_handle: P2P,
        hubs: NodeHubs,
        config: ControllerConfig,
    ) -> Self {
        let event_bus = full_event_bus
            .extract(&[], &typeid![ControllerMessage])
            .expect("event channels must be presented");

        Self {
            store,
            lightning,
            p2p_handle,
            event_bus,
            hubs,
            config,
            peer_subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs the controller: listens for peer messages from the event bus,
    /// cleans up expired offers, and ingests settled invoices.
    pub async fn run(mut self, cancellation: CancellationToken) {
        let events = self.event_bus.subscribe::<ControllerMessage>();
        let mut offer_cleanup = tokio::time::interval(OFFER_CLEANUP_INTERVAL);
        let mut payment_poll = tokio::time::interval(PAYMENT_POLL_INTERVAL);

        loop {
            tokio::select! {
                event_received = events.recv() => {
                    let Ok(event) = event_received else {
                        trace!("All incoming event senders are dropped");
                        return;
                    };

                    if let Err(err) = self.handle_event(event).await {
                        tracing::error!("Failed to handle an event: {}", err);
                    }
                }
                _ = offer_cleanup.tick() => {
                    match self.store.delete_expired_received_offers(now_secs()).await {
                        Ok(0) => {}
                        Ok(n) => debug!("Deleted {} expired offer(s)", n),
                        Err(err) => tracing::error!("Failed to clean up offers: {}", err),
                    }
                }
                _ = payment_poll.tick() => {
                    if let Err(err) = self.process_received_payments().await {
                        tracing::error!("Failed to process received payments: {}", err);
                    }
                }
                _ = cancellation.cancelled() => {
                    trace!("Cancellation received, stopping controller");
                    return;
                }
            }
        }
    }

    /// Handles new events from the event bus.
    async fn handle_event(&mut self, event: ControllerMessage) -> Result<()> {
        trace!("New event: {:?}", event);

        match event {
            ControllerMessage::P2P(p2p_event) => self
                .handle_p2p_msg(p2p_event)
                .await
                .wrap_err("failed to handle p2p event")?,
            ControllerMessage::PeerConnected(peer) => {
                self.hubs.peer_events.publish(PeerEvent::Connected(peer));
            }
            ControllerMessage::PeerDisconnected(peer) => {
                self.peer_subscriptions
                    .lock()
                    .expect("subscriptions lock poisoned")
                    .remove(&peer.address);
                self.hubs.peer_events.publish(PeerEvent::Disconnected(peer));
            }
        }

        Ok(())
    }

    /// Handles a message received from a peer.
    pub async fn handle_p2p_msg(&mut self, message: ControllerP2PMessage) -> Result<()> {
        match message {
            ControllerP2PMessage::Inv { inv, sender } => self
                .handle_inv(inv, sender)
                .await
                .wrap_err("failed to handle inbound inv")?,
            ControllerP2PMessage::GetSqueaks { inv, sender } => self
                .handle_get_squeaks(inv, sender)
                .await
                .wrap_err("failed to handle inbound getsqueaks")?,
            ControllerP2PMessage::Squeak { squeak, sender } => self
                .handle_squeak(squeak, sender)
                .await
                .wrap_err("failed to handle inbound squeak")?,
            ControllerP2PMessage::GetOffer {
                squeak_hash,
                sender,
            } => self
                .handle_get_offer(squeak_hash, sender)
                .await
                .wrap_err("failed to handle inbound getoffer")?,
            ControllerP2PMessage::Offer { offer, sender } => self
                .handle_offer(offer, sender)
                .await
                .wrap_err("failed to handle inbound offer")?,
            ControllerP2PMessage::Subscribe { filter, sender } => {
                self.peer_subscriptions
                    .lock()
                    .expect("subscriptions lock poisoned")
                    .entry(sender)
                    .or_default()
                    .push(filter);
            }
            ControllerP2PMessage::Unsubscribe { filter, sender } => {
                let mut subscriptions = self
                    .peer_subscriptions
                    .lock()
                    .expect("subscriptions lock poisoned");

                if let Some(filters) = subscriptions.get_mut(&sender) {
                    filters.retain(|f| f != &filter);
                    if filters.is_empty() {
                        subscriptions.remove(&sender);
                    }
                }
            }
        };

        Ok(())
    }

    /// A peer advertised squeaks: request the ones we don't have.
    async fn handle_inv(&self, inv: Vec<Inventory>, sender: SocketAddr) -> Result<()> {
        let mut missing = Vec::new();

        for item in inv {
            let Inventory::Squeak(hash) = item;
            if self.store.get_squeak(&hash).await?.is_none() {
                missing.push(Inventory::Squeak(hash));
            }
        }

        if !missing.is_empty() {
            self.p2p_handle
                .send_get_squeaks(missing, sender)
                .await
                .map_err(|err| eyre!("p2p handle: {err}"))?;
        }

        Ok(())
    }

    /// A peer requested squeaks: serve the ones we carry, keys withheld.
    async fn handle_get_squeaks(&self, inv: Vec<Inventory>, sender: SocketAddr) -> Result<()> {
        let mut bundles = Vec::new();

        for item in inv {
            let Inventory::Squeak(hash) = item;

            let Some(squeak) = self.store.get_squeak(&hash).await? else {
                continue;
            };
            let Some(header) = self.store.get_block_header(&hash).await? else {
                continue;
            };

            bundles.push(SqueakBundle::new(squeak, header).without_decryption_key());
        }

        if !bundles.is_empty() {
            self.p2p_handle
                .send_squeaks(bundles, sender)
                .await
                .map_err(|err| eyre!("p2p handle: {err}"))?;
        }

        Ok(())
    }

    /// A peer pushed a squeak at us.
    async fn handle_squeak(&self, bundle: SqueakBundle, sender: SocketAddr) -> Result<()> {
        if !self.accept_squeak(&bundle).await? {
            debug!("ignored squeak pushed by {}", sender);
        }

        Ok(())
    }

    /// Accept an unsolicited squeak if it is from a followed author inside
    /// the current block window. Returns whether it was stored.
    pub async fn accept_squeak(&self, bundle: &SqueakBundle) -> Result<bool> {
        let hash = bundle.hash();

        if self.store.get_squeak(&hash).await?.is_some() {
            return Ok(false);
        }

        let followed = self.get_followed_addresses().await?;
        let range = self.get_block_range().await?;

        if !followed.contains(&bundle.squeak.author_address)
            || !range.contains(bundle.squeak.block_height)
        {
            debug!(%hash, "ignoring uninteresting squeak");
            return Ok(false);
        }

        Ok(self.save_downloaded_squeak(bundle).await?.is_some())
    }

    /// A peer asked for an offer on one of our squeaks.
    async fn handle_get_offer(&self, squeak_hash: SqueakHash, sender: SocketAddr) -> Result<()> {
        let Some(offer) = self.create_offer(squeak_hash).await? else {
            return Ok(());
        };

        info!(%squeak_hash, price_msat = offer.price_msat, "serving offer to {}", sender);
        self.p2p_handle
            .send_offer(offer, sender)
            .await
            .map_err(|err| eyre!("p2p handle: {err}"))?;

        Ok(())
    }

    /// Create an offer selling the given squeak's decryption key: a fresh
    /// invoice whose preimage is the key itself. Returns `None` if the squeak
    /// is unknown, locked, or not for sale.
    pub async fn create_offer(&self, squeak_hash: SqueakHash) -> Result<Option<Offer>> {
        let Some(squeak) = self.store.get_squeak(&squeak_hash).await? else {
            return Ok(None);
        };
        let Some(key) = squeak.decryption_key else {
            return Ok(None);
        };

        let price_msat = self.price_for_squeak(&squeak).await?;
        if price_msat == 0 {
            debug!(%squeak_hash, "squeak is not for sale");
            return Ok(None);
        }

        let invoice = self
            .lightning
            .add_invoice(key, price_msat, INVOICE_EXPIRY_SECS)
            .await
            .wrap_err("failed to create invoice")?;
        let info = self
            .lightning
            .get_info()
            .await
            .wrap_err("failed to get node info")?;

        Ok(Some(Offer {
            squeak_hash,
            price_msat,
            payment_request: invoice.payment_request,
            host: self.config.external_host.clone(),
            port: self.config.external_port,
            node_pubkey: info.identity_pubkey,
            expiry: INVOICE_EXPIRY_SECS,
            invoice_timestamp: now_secs(),
        }))
    }

    /// A peer sent us an offer for a squeak we want unlocked.
    async fn handle_offer(&self, offer: Offer, sender: SocketAddr) -> Result<()> {
        let peer_address = PeerAddress::from_socket_addr(self.config.network, sender);

        match self.decode_received_offer(offer, peer_address).await {
            Ok(received) => self.save_offer(received).await,
            Err(err) => {
                // A bad offer costs us nothing; drop it without punishing the peer.
                debug!("dropping invalid offer from {}: {}", sender, err);
                Ok(())
            }
        }
    }

    /// Decode and validate an offer received from a peer.
    pub async fn decode_received_offer(
        &self,
        offer: Offer,
        peer_address: PeerAddress,
    ) -> Result<ReceivedOffer> {
        let squeak = self
            .store
            .get_squeak(&offer.squeak_hash)
            .await?
            .ok_or_else(|| eyre!("offer for unknown squeak {}", offer.squeak_hash))?;

        if squeak.is_unlocked() {
            return Err(eyre!("squeak {} is already unlocked", offer.squeak_hash));
        }

        let decoded = self
            .lightning
            .decode_payment_request(&offer.payment_request)
            .await
            .wrap_err("failed to decode payment request")?;

        if decoded.node_pubkey != offer.node_pubkey {
            return Err(eyre!("offer pubkey does not match its payment request"));
        }
        if decoded.amount_msat != offer.price_msat {
            return Err(eyre!("offer price does not match its payment request"));
        }
        if decoded.payment_hash != squeak.data_key {
            return Err(eyre!("invoice preimage would not unlock the squeak"));
        }
        if decoded.timestamp + u64::from(decoded.expiry) <= now_secs() {
            return Err(eyre!("offer invoice already expired"));
        }

        Ok(ReceivedOffer {
            offer: Offer {
                // Trust the invoice over the peer's claims.
                expiry: decoded.expiry,
                invoice_timestamp: decoded.timestamp,
                ..offer
            },
            peer_address,
            payment_hash: decoded.payment_hash,
            decoded_at: now_secs(),
        })
    }

    /// Persist a received offer and fan it out to subscribers.
    pub async fn save_offer(&self, offer: ReceivedOffer) -> Result<()> {
        self.store.save_received_offer(&offer).await?;
        self.hubs.buy_offers.publish(offer);

        Ok(())
    }

    /// Validate and persist a squeak downloaded from the network. Returns the
    /// hash if it was newly stored.
    pub async fn save_downloaded_squeak(
        &self,
        bundle: &SqueakBundle,
    ) -> Result<Option<SqueakHash>> {
        if let Err(err) = bundle.validate(self.config.network) {
            debug!("dropping invalid squeak: {}", err);
            return Ok(None);
        }

        let Some(hash) = self
            .store
            .insert_squeak(&bundle.squeak, &bundle.header)
            .await?
        else {
            return Ok(None);
        };

        self.publish_squeak(bundle, &hash).await?;

        Ok(Some(hash))
    }

    /// Fan a freshly stored squeak out: display subscriptions, peer
    /// subscriptions, and an inv to the rest of the network.
    async fn publish_squeak(&self, bundle: &SqueakBundle, hash: &SqueakHash) -> Result<()> {
        if let Some(entry) = self.store.get_squeak_entry(hash).await? {
            self.hubs.squeak_displays.publish(entry);
        }

        let subscribers: Vec<SocketAddr> = {
            let subscriptions = self
                .peer_subscriptions
                .lock()
                .expect("subscriptions lock poisoned");

            subscriptions
                .iter()
                .filter(|(_, filters)| filters.iter().any(|f| f.matches(&bundle.squeak)))
                .map(|(addr, _)| *addr)
                .collect()
        };

        for addr in subscribers {
            self.p2p_handle
                .send_squeaks(vec![bundle.without_decryption_key()], addr)
                .await
                .map_err(|err| eyre!("p2p handle: {err}"))?;
        }

        self.p2p_handle
            .send_inv(vec![Inventory::Squeak(*hash)])
            .await
            .map_err(|err| eyre!("p2p handle: {err}"))?;

        Ok(())
    }

    /// Create, sign and store a squeak with the given signing profile.
    pub async fn make_squeak(
        &self,
        profile_id: u64,
        content: &str,
        reply_to: Option<SqueakHash>,
    ) -> Result<SqueakHash> {
        let profile = self
            .store
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| eyre!("no such profile: {}", profile_id))?;
        let signing_key = profile
            .signing_key()
            .ok_or_else(|| eyre!("profile {} cannot sign", profile.name))?;

        let info = self.lightning.get_info().await?;
        let header_bytes = self.lightning.get_block_header(&info.block_hash).await?;
        let header: bitcoin::block::Header =
            deserialize(&header_bytes).wrap_err("backend returned a malformed block header")?;

        let (squeak, _key) = Squeak::make(
            &signing_key,
            self.config.network,
            content,
            info.block_height,
            header.block_hash(),
            reply_to,
            now_secs() as u32,
        )?;

        let bundle = SqueakBundle::new(squeak, header);
        let hash = self
            .store
            .insert_squeak(&bundle.squeak, &bundle.header)
            .await?
            .ok_or_else(|| eyre!("made a squeak that already exists"))?;

        self.publish_squeak(&bundle, &hash).await?;

        Ok(hash)
    }

    /// Delete a squeak and any offers received for it.
    pub async fn delete_squeak(&self, hash: &SqueakHash) -> Result<()> {
        self.store.delete_squeak(hash).await?;
        self.store.delete_offers_for_squeak(hash).await?;

        Ok(())
    }

    /// Pay for a decryption key: settle the offer's invoice and unlock the
    /// squeak with the preimage. Every attempt leaves a `SentPayment` record.
    pub async fn pay_offer(&self, received_offer: &ReceivedOffer) -> Result<SentPayment> {
        let offer = &received_offer.offer;

        // Guard against double-pay.
        if let Some(previous) = self
            .store
            .get_settled_sent_payment(&received_offer.payment_hash)
            .await?
        {
            return Err(eyre!(
                "offer for squeak {} was already paid at {}",
                offer.squeak_hash,
                previous.time_ms
            ));
        }

        let mut payment = SentPayment {
            payment_hash: received_offer.payment_hash,
            preimage: None,
            amount_msat: offer.price_msat,
            peer_address: received_offer.peer_address.clone(),
            squeak_hash: offer.squeak_hash,
            time_ms: now_ms(),
            settled: false,
            failure_reason: None,
        };

        if !received_offer.is_valid_for_purchase(now_secs()) {
            payment.failure_reason = Some(PaymentFailureReason::InvoiceExpired);
            self.store.save_sent_payment(&payment).await?;
            return Err(eyre!("offer invoice already expired"));
        }

        let result = self
            .lightning
            .send_payment(&offer.payment_request, Duration::from_secs(60))
            .await;

        let preimage = match result {
            Ok(result) => result.preimage,
            Err(err) => {
                payment.failure_reason = Some(PaymentFailureReason::SendFailed);
                self.store.save_sent_payment(&payment).await?;
                return Err(eyre!("lightning payment failed: {err}"));
            }
        };

        // The preimage must hash to the invoice payment hash, otherwise the
        // seller revealed nothing of value.
        let preimage_hash: [u8; 32] = {
            use bitcoin::hashes::{sha256, Hash};
            sha256::Hash::hash(&preimage).to_byte_array()
        };
        if preimage_hash != received_offer.payment_hash {
            payment.preimage = Some(preimage);
            payment.failure_reason = Some(PaymentFailureReason::PreimageMismatch);
            self.store.save_sent_payment(&payment).await?;
            return Err(eyre!("payment preimage does not match the invoice hash"));
        }

        let squeak = self
            .store
            .get_squeak(&offer.squeak_hash)
            .await?
            .ok_or_else(|| eyre!("paid for unknown squeak {}", offer.squeak_hash))?;
        let content = squeak.decrypt_content(&preimage)?;

        self.store
            .set_decryption_key(&offer.squeak_hash, preimage, &content)
            .await?;

        payment.preimage = Some(preimage);
        payment.settled = true;
        payment.time_ms = now_ms();
        self.store.save_sent_payment(&payment).await?;

        if let Some(entry) = self.store.get_squeak_entry(&offer.squeak_hash).await? {
            self.hubs.squeak_displays.publish(entry);
        }

        info!(
            squeak_hash = %offer.squeak_hash,
            amount_msat = offer.price_msat,
            "bought decryption key from {}", received_offer.peer_address,
        );

        Ok(payment)
    }

    /// Ingest settled invoices from the Lightning backend as received
    /// payments. Returns how many were ingested.
    pub async fn process_received_payments(&self) -> Result<usize> {
        let mut index = self.store.get_latest_settle_index().await?;
        let invoices = self.lightning.settled_invoices(index).await?;
        let mut ingested = 0;

        for invoice in invoices {
            if invoice.settle_index <= index {
                continue;
            }
            index = invoice.settle_index;

            let Some(squeak_hash) = self.store.get_squeak_by_data_key(&invoice.payment_hash).await?
            else {
                continue;
            };

            let payment = ReceivedPayment {
                payment_hash: invoice.payment_hash,
                squeak_hash,
                amount_msat: invoice.amount_msat,
                time_ms: invoice.settled_at * 1000,
            };

            self.store.save_received_payment(&payment).await?;
            self.hubs.received_payments.publish(payment);
            ingested += 1;
        }

        self.store.set_latest_settle_index(index).await?;

        Ok(ingested)
    }

    /// Drop and re-ingest all received payments from the Lightning backend.
    pub async fn reprocess_received_payments(&self) -> Result<usize> {
        self.store.delete_received_payments().await?;
        self.process_received_payments().await
    }

    /// The network this node runs on.
    pub fn get_network(&self) -> Network {
        self.config.network
    }

    /// The externally reachable address published in offers.
    pub fn get_external_address(&self) -> (String, u16) {
        (
            self.config.external_host.clone(),
            self.config.external_port,
        )
    }

    /// The block window squeaks are currently synced and accepted for.
    pub async fn get_block_range(&self) -> Result<BlockRange> {
        let info = self.lightning.get_info().await?;
        let min_block = info
            .block_height
            .saturating_sub(self.config.block_range_window);

        Ok(BlockRange::new(min_block, info.block_height))
    }

    /// Addresses of profiles we follow.
    pub async fn get_followed_addresses(&self) -> Result<Vec<String>> {
        Ok(self.store.get_followed_addresses().await?)
    }

    /// Addresses this node authors for, and will serve to others.
    pub async fn get_sharing_addresses(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_signing_profiles()
            .await?
            .into_iter()
            .map(|profile| profile.address)
            .collect())
    }

    /// The squeak stored under `hash`, if any.
    pub async fn get_squeak(&self, hash: &SqueakHash) -> Result<Option<Squeak>> {
        Ok(self.store.get_squeak(hash).await?)
    }

    /// The stored squeak together with its block header, for serving.
    pub async fn get_squeak_bundle(&self, hash: &SqueakHash) -> Result<Option<SqueakBundle>> {
        let Some(squeak) = self.store.get_squeak(hash).await? else {
            return Ok(None);
        };
        let Some(header) = self.store.get_block_header(hash).await? else {
            return Ok(None);
        };

        Ok(Some(SqueakBundle::new(squeak, header)))
    }

    /// The offer previously received from the given peer for the given
    /// squeak, if any.
    pub async fn get_received_offer(
        &self,
        hash: &SqueakHash,
        peer_address: &PeerAddress,
    ) -> Result<Option<ReceivedOffer>> {
        Ok(self.store.get_received_offer(hash, peer_address).await?)
    }

    /// Hashes of stored squeaks for the given authors and block range.
    pub async fn lookup_squeaks(
        &self,
        addresses: &[String],
        min_block: u32,
        max_block: u32,
    ) -> Result<Vec<SqueakHash>> {
        Ok(self
            .store
            .lookup_squeaks(addresses, min_block, max_block)
            .await?)
    }

    /// Display entry for one squeak.
    pub async fn get_squeak_entry(&self, hash: &SqueakHash) -> Result<Option<SqueakEntry>> {
        Ok(self.store.get_squeak_entry(hash).await?)
    }

    /// The price a peer pays for the given squeak's key.
    async fn price_for_squeak(&self, squeak: &Squeak) -> Result<u64> {
        let profile = self
            .store
            .get_profile_by_address(&squeak.author_address)
            .await?;

        Ok(match profile {
            Some(profile) if profile.use_custom_price => profile.custom_price_msat,
            _ => self.config.price_msat,
        })
    }
}
