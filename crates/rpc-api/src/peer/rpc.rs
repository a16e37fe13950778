use jsonrpsee::proc_macros::rpc;

#[cfg(feature = "server")]
use jsonrpsee::core::RpcResult;

use sqk_types::network::Network;
use sqk_types::SqueakHash;

use crate::peer::{
    DownloadLookupRequest, DownloadOfferResponse, DownloadSqueakResponse, UploadLookup,
    UploadSqueakRequest,
};

/// RPC surface this node serves to other nodes, and dials on them.
#[cfg_attr(all(feature = "client", not(feature = "server")), rpc(client))]
#[cfg_attr(all(feature = "server", not(feature = "client")), rpc(server))]
#[cfg_attr(all(feature = "server", feature = "client"), rpc(server, client))]
#[async_trait::async_trait]
pub trait SqueakPeerRpc {
    /// Hashes of squeaks the serving node carries for the given authors and
    /// block range, for the caller to download.
    #[method(name = "lookupsqueakstodownload")]
    async fn lookup_squeaks_to_download(
        &self,
        request: DownloadLookupRequest,
    ) -> RpcResult<Vec<SqueakHash>>;

    /// What the serving node already carries for the given authors, plus the
    /// block range it currently accepts uploads for.
    #[method(name = "lookupsqueakstoupload")]
    async fn lookup_squeaks_to_upload(
        &self,
        network: Network,
        addresses: Vec<String>,
    ) -> RpcResult<UploadLookup>;

    /// Download one squeak with its anchoring block header. The decryption
    /// key is never included.
    #[method(name = "downloadsqueak")]
    async fn download_squeak(&self, hash: SqueakHash) -> RpcResult<DownloadSqueakResponse>;

    /// Download an offer selling the decryption key of one squeak.
    #[method(name = "downloadoffer")]
    async fn download_offer(&self, hash: SqueakHash) -> RpcResult<DownloadOfferResponse>;

    /// Hashes of stored replies to the given squeak.
    #[method(name = "lookupreplies")]
    async fn lookup_replies(&self, hash: SqueakHash) -> RpcResult<Vec<SqueakHash>>;

    /// Push one squeak to the serving node. Returns whether it was stored.
    #[method(name = "uploadsqueak")]
    async fn upload_squeak(&self, request: UploadSqueakRequest) -> RpcResult<bool>;
}
