use jsonrpsee::proc_macros::rpc;

#[cfg(feature = "server")]
use jsonrpsee::core::{RpcResult, SubscriptionResult};

use lightning_client::{ChannelInfo, NodeInfo};
use sqk_types::{ReceivedOffer, ReceivedPayment, SentPayment, SqueakEntry, SqueakHash};

use crate::admin::{ExternalAddressResponse, PaymentSummaryResponse, PeerResponse, ProfileResponse};

/// RPC methods the operator drives the node with.
#[cfg_attr(all(feature = "client", not(feature = "server")), rpc(client))]
#[cfg_attr(all(feature = "server", not(feature = "client")), rpc(server))]
#[cfg_attr(all(feature = "server", feature = "client"), rpc(server, client))]
#[async_trait::async_trait]
pub trait SqueakAdminRpc {
    // Profiles ////////////////////////////////////////////////////////////

    /// Create a signing profile with a freshly generated key.
    #[method(name = "createsigningprofile")]
    async fn create_signing_profile(&self, name: String) -> RpcResult<u64>;

    /// Import a signing profile from a hex-encoded private key.
    #[method(name = "importsigningprofile")]
    async fn import_signing_profile(&self, name: String, private_key: String) -> RpcResult<u64>;

    /// Create a contact profile for a known author address.
    #[method(name = "createcontactprofile")]
    async fn create_contact_profile(&self, name: String, address: String) -> RpcResult<u64>;

    #[method(name = "getprofiles")]
    async fn get_profiles(&self) -> RpcResult<Vec<ProfileResponse>>;

    #[method(name = "getsigningprofiles")]
    async fn get_signing_profiles(&self) -> RpcResult<Vec<ProfileResponse>>;

    #[method(name = "getcontactprofiles")]
    async fn get_contact_profiles(&self) -> RpcResult<Vec<ProfileResponse>>;

    #[method(name = "getprofile")]
    async fn get_profile(&self, profile_id: u64) -> RpcResult<ProfileResponse>;

    #[method(name = "getprofilebyname")]
    async fn get_profile_by_name(&self, name: String) -> RpcResult<ProfileResponse>;

    #[method(name = "getprofilebyaddress")]
    async fn get_profile_by_address(&self, address: String) -> RpcResult<ProfileResponse>;

    /// The hex-encoded private key of a signing profile, for backup.
    #[method(name = "getprofileprivatekey")]
    async fn get_profile_private_key(&self, profile_id: u64) -> RpcResult<String>;

    #[method(name = "setprofilefollowing")]
    async fn set_profile_following(&self, profile_id: u64, following: bool) -> RpcResult<()>;

    #[method(name = "setprofileusecustomprice")]
    async fn set_profile_use_custom_price(
        &self,
        profile_id: u64,
        use_custom_price: bool,
    ) -> RpcResult<()>;

    #[method(name = "setprofilecustomprice")]
    async fn set_profile_custom_price(&self, profile_id: u64, price_msat: u64) -> RpcResult<()>;

    #[method(name = "renameprofile")]
    async fn rename_profile(&self, profile_id: u64, name: String) -> RpcResult<()>;

    /// Set a profile image, hex-encoded.
    #[method(name = "setprofileimage")]
    async fn set_profile_image(&self, profile_id: u64, image: String) -> RpcResult<()>;

    #[method(name = "clearprofileimage")]
    async fn clear_profile_image(&self, profile_id: u64) -> RpcResult<()>;

    #[method(name = "deleteprofile")]
    async fn delete_profile(&self, profile_id: u64) -> RpcResult<()>;

    // Squeaks /////////////////////////////////////////////////////////////

    /// Create, sign and store a squeak, then advertise it to peers.
    #[method(name = "makesqueak")]
    async fn make_squeak(
        &self,
        profile_id: u64,
        content: String,
        reply_to: Option<SqueakHash>,
    ) -> RpcResult<SqueakHash>;

    #[method(name = "getsqueakdisplay")]
    async fn get_squeak_display(&self, hash: SqueakHash) -> RpcResult<SqueakEntry>;

    #[method(name = "gettimelinesqueakdisplays")]
    async fn get_timeline_squeak_displays(&self, limit: usize) -> RpcResult<Vec<SqueakEntry>>;

    #[method(name = "getaddresssqueakdisplays")]
    async fn get_address_squeak_displays(
        &self,
        address: String,
        limit: usize,
    ) -> RpcResult<Vec<SqueakEntry>>;

    /// The reply chain from the thread root down to the given squeak.
    #[method(name = "getancestorsqueakdisplays")]
    async fn get_ancestor_squeak_displays(&self, hash: SqueakHash)
        -> RpcResult<Vec<SqueakEntry>>;

    #[method(name = "getreplysqueakdisplays")]
    async fn get_reply_squeak_displays(&self, hash: SqueakHash) -> RpcResult<Vec<SqueakEntry>>;

    #[method(name = "getlikedsqueakdisplays")]
    async fn get_liked_squeak_displays(&self, limit: usize) -> RpcResult<Vec<SqueakEntry>>;

    /// Case-insensitive substring search over unlocked content.
    #[method(name = "searchsqueakdisplays")]
    async fn search_squeak_displays(
        &self,
        text: String,
        limit: usize,
        last: Option<SqueakHash>,
    ) -> RpcResult<Vec<SqueakEntry>>;

    #[method(name = "likesqueak")]
    async fn like_squeak(&self, hash: SqueakHash) -> RpcResult<()>;

    #[method(name = "unlikesqueak")]
    async fn unlike_squeak(&self, hash: SqueakHash) -> RpcResult<()>;

    #[method(name = "deletesqueak")]
    async fn delete_squeak(&self, hash: SqueakHash) -> RpcResult<()>;

    #[method(name = "getnumberofsqueaks")]
    async fn get_number_of_squeaks(&self) -> RpcResult<u64>;

    // Saved peers /////////////////////////////////////////////////////////

    #[method(name = "createpeer")]
    async fn create_peer(&self, name: String, host: String, port: u16) -> RpcResult<u64>;

    #[method(name = "getpeer")]
    async fn get_peer(&self, peer_id: u64) -> RpcResult<PeerResponse>;

    #[method(name = "getpeers")]
    async fn get_peers(&self) -> RpcResult<Vec<PeerResponse>>;

    #[method(name = "setpeerautoconnect")]
    async fn set_peer_autoconnect(&self, peer_id: u64, autoconnect: bool) -> RpcResult<()>;

    #[method(name = "renamepeer")]
    async fn rename_peer(&self, peer_id: u64, name: String) -> RpcResult<()>;

    #[method(name = "deletepeer")]
    async fn delete_peer(&self, peer_id: u64) -> RpcResult<()>;

    // Network /////////////////////////////////////////////////////////////

    #[method(name = "connectpeer")]
    async fn connect_peer(&self, host: String, port: u16) -> RpcResult<()>;

    #[method(name = "disconnectpeer")]
    async fn disconnect_peer(&self, host: String, port: u16) -> RpcResult<()>;

    #[method(name = "getconnectedpeers")]
    async fn get_connected_peers(&self) -> RpcResult<Vec<sqk_types::PeerSummary>>;

    #[method(name = "getconnectedpeer")]
    async fn get_connected_peer(&self, host: String, port: u16)
        -> RpcResult<sqk_types::PeerSummary>;

    #[method(name = "getnetwork")]
    async fn get_network(&self) -> RpcResult<String>;

    #[method(name = "getexternaladdress")]
    async fn get_external_address(&self) -> RpcResult<ExternalAddressResponse>;

    // Sync ////////////////////////////////////////////////////////////////

    /// Reconcile the current block window with every connected peer.
    #[method(name = "downloadsqueaks")]
    async fn download_squeaks(&self) -> RpcResult<()>;

    /// Download one squeak (and an offer for it) from connected peers.
    #[method(name = "downloadsqueak")]
    async fn download_squeak(&self, hash: SqueakHash) -> RpcResult<()>;

    /// Re-fetch offers for one squeak from connected peers.
    #[method(name = "downloadoffers")]
    async fn download_offers(&self, hash: SqueakHash) -> RpcResult<()>;

    /// Download replies to one squeak from connected peers.
    #[method(name = "downloadreplies")]
    async fn download_replies(&self, hash: SqueakHash) -> RpcResult<()>;

    /// Download squeaks authored by one address from connected peers.
    #[method(name = "downloadaddresssqueaks")]
    async fn download_address_squeaks(&self, address: String) -> RpcResult<()>;

    // Payments ////////////////////////////////////////////////////////////

    /// Pay the offer previously received from the given peer and unlock the
    /// squeak with the revealed preimage.
    #[method(name = "payoffer")]
    async fn pay_offer(
        &self,
        hash: SqueakHash,
        peer_host: String,
        peer_port: u16,
    ) -> RpcResult<SentPayment>;

    #[method(name = "getbuyoffers")]
    async fn get_buy_offers(&self, hash: SqueakHash) -> RpcResult<Vec<ReceivedOffer>>;

    #[method(name = "getbuyoffer")]
    async fn get_buy_offer(
        &self,
        hash: SqueakHash,
        peer_host: String,
        peer_port: u16,
    ) -> RpcResult<ReceivedOffer>;

    #[method(name = "getsentpayments")]
    async fn get_sent_payments(&self, limit: usize) -> RpcResult<Vec<SentPayment>>;

    #[method(name = "getreceivedpayments")]
    async fn get_received_payments(&self, limit: usize) -> RpcResult<Vec<ReceivedPayment>>;

    #[method(name = "getpaymentsummary")]
    async fn get_payment_summary(&self) -> RpcResult<PaymentSummaryResponse>;

    /// Drop and re-ingest received payments from the Lightning backend.
    #[method(name = "reprocessreceivedpayments")]
    async fn reprocess_received_payments(&self) -> RpcResult<u64>;

    // Lightning ///////////////////////////////////////////////////////////

    #[method(name = "lndgetinfo")]
    async fn lnd_get_info(&self) -> RpcResult<NodeInfo>;

    #[method(name = "lndlistchannels")]
    async fn lnd_list_channels(&self) -> RpcResult<Vec<ChannelInfo>>;

    #[method(name = "lndnewaddress")]
    async fn lnd_new_address(&self) -> RpcResult<String>;

    // Subscriptions ///////////////////////////////////////////////////////

    /// The connected-peer list, re-emitted on every connection-map change.
    #[subscription(name = "subscribeconnectedpeers", unsubscribe = "unsubscribeconnectedpeers", item = Vec<sqk_types::PeerSummary>)]
    async fn subscribe_connected_peers(&self) -> SubscriptionResult;

    /// Connection state of one peer, re-emitted on every change.
    #[subscription(name = "subscribeconnectedpeer", unsubscribe = "unsubscribeconnectedpeer", item = Option<sqk_types::PeerSummary>)]
    async fn subscribe_connected_peer(&self, host: String, port: u16) -> SubscriptionResult;

    /// Offers received for one squeak.
    #[subscription(name = "subscribebuyoffers", unsubscribe = "unsubscribebuyoffers", item = ReceivedOffer)]
    async fn subscribe_buy_offers(&self, hash: SqueakHash) -> SubscriptionResult;

    /// Settled incoming payments.
    #[subscription(name = "subscribereceivedpayments", unsubscribe = "unsubscribereceivedpayments", item = ReceivedPayment)]
    async fn subscribe_received_payments(&self) -> SubscriptionResult;

    /// Updates of one squeak's display entry.
    #[subscription(name = "subscribesqueakdisplay", unsubscribe = "unsubscribesqueakdisplay", item = SqueakEntry)]
    async fn subscribe_squeak_display(&self, hash: SqueakHash) -> SubscriptionResult;

    /// Every newly stored or updated squeak.
    #[subscription(name = "subscribesqueakdisplays", unsubscribe = "unsubscribesqueakdisplays", item = SqueakEntry)]
    async fn subscribe_squeak_displays(&self) -> SubscriptionResult;

    /// New replies to one squeak.
    #[subscription(name = "subscribereplysqueakdisplays", unsubscribe = "unsubscribereplysqueakdisplays", item = SqueakEntry)]
    async fn subscribe_reply_squeak_displays(&self, hash: SqueakHash) -> SubscriptionResult;

    /// New squeaks by one author.
    #[subscription(name = "subscribeaddresssqueakdisplays", unsubscribe = "unsubscribeaddresssqueakdisplays", item = SqueakEntry)]
    async fn subscribe_address_squeak_displays(&self, address: String) -> SubscriptionResult;

    /// Updates along the ancestor chain of one squeak.
    #[subscription(name = "subscribeancestorsqueakdisplays", unsubscribe = "unsubscribeancestorsqueakdisplays", item = SqueakEntry)]
    async fn subscribe_ancestor_squeak_displays(&self, hash: SqueakHash) -> SubscriptionResult;

    /// New squeaks by followed authors.
    #[subscription(name = "subscribetimelinesqueakdisplays", unsubscribe = "unsubscribetimelinesqueakdisplays", item = SqueakEntry)]
    async fn subscribe_timeline_squeak_displays(&self) -> SubscriptionResult;
}
