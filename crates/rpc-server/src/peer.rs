//! The peer-facing sync RPC surface.
use async_trait::async_trait;
use jsonrpsee::{
    core::RpcResult,
    types::{error::INTERNAL_ERROR_CODE, ErrorObjectOwned},
};

use lightning_client::LightningClient;
use sqk_controller::{Controller, NodeStorage};
use sqk_p2p::client::handle::Handle as ClientHandle;
use sqk_rpc_api::peer::{
    DownloadLookupRequest, DownloadOfferResponse, DownloadSqueakResponse, SqueakPeerRpcServer,
    UploadLookup, UploadSqueakRequest,
};
use sqk_storage::SqueakStorage;
use sqk_types::network::Network;
use sqk_types::SqueakHash;

use crate::admin::{internal_error, not_found};

/// Serves the sync surface other nodes reconcile against.
pub struct PeerController<S, P2P, L> {
    controller: Controller<S, P2P, L>,
    store: S,
}

impl<S, P2P, L> PeerController<S, P2P, L>
where
    S: NodeStorage,
    P2P: ClientHandle + Send + Sync + 'static,
    L: LightningClient + Send + Sync + 'static,
{
    pub fn new(controller: Controller<S, P2P, L>, store: S) -> Self {
        Self { controller, store }
    }

    fn check_network(&self, network: Network) -> RpcResult<()> {
        if network != self.controller.get_network() {
            return Err(ErrorObjectOwned::owned(
                INTERNAL_ERROR_CODE,
                format!("wrong network: {}", network),
                Option::<()>::None,
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<S, P2P, L> SqueakPeerRpcServer for PeerController<S, P2P, L>
where
    S: NodeStorage,
    P2P: ClientHandle + Send + Sync + 'static,
    L: LightningClient + Send + Sync + 'static,
{
    async fn lookup_squeaks_to_download(
        &self,
        request: DownloadLookupRequest,
    ) -> RpcResult<Vec<SqueakHash>> {
        self.check_network(request.network)?;

        self.store
            .lookup_squeaks(&request.addresses, request.min_block, request.max_block)
            .await
            .map_err(internal_error)
    }

    async fn lookup_squeaks_to_upload(
        &self,
        network: Network,
        addresses: Vec<String>,
    ) -> RpcResult<UploadLookup> {
        self.check_network(network)?;

        let followed = self
            .controller
            .get_followed_addresses()
            .await
            .map_err(internal_error)?;
        let range = self
            .controller
            .get_block_range()
            .await
            .map_err(internal_error)?;

        // Only advertise interest in authors we actually follow.
        let accepted: Vec<String> = addresses
            .into_iter()
            .filter(|address| followed.contains(address))
            .collect();

        let hashes = self
            .store
            .lookup_squeaks(&accepted, range.min_block, range.max_block)
            .await
            .map_err(internal_error)?;

        Ok(UploadLookup {
            hashes,
            addresses: accepted,
            min_block: range.min_block,
            max_block: range.max_block,
        })
    }

    async fn download_squeak(&self, hash: SqueakHash) -> RpcResult<DownloadSqueakResponse> {
        let bundle = self
            .controller
            .get_squeak_bundle(&hash)
            .await
            .map_err(internal_error)?
            .ok_or_else(|| not_found("squeak"))?;

        Ok(DownloadSqueakResponse {
            bundle: bundle.without_decryption_key(),
        })
    }

    async fn download_offer(&self, hash: SqueakHash) -> RpcResult<DownloadOfferResponse> {
        let offer = self
            .controller
            .create_offer(hash)
            .await
            .map_err(internal_error)?
            .ok_or_else(|| not_found("offer"))?;

        Ok(DownloadOfferResponse { offer })
    }

    async fn lookup_replies(&self, hash: SqueakHash) -> RpcResult<Vec<SqueakHash>> {
        let replies = self
            .store
            .get_thread_reply_entries(&hash)
            .await
            .map_err(internal_error)?;

        Ok(replies.into_iter().map(|entry| entry.squeak_hash).collect())
    }

    async fn upload_squeak(&self, request: UploadSqueakRequest) -> RpcResult<bool> {
        self.controller
            .accept_squeak(&request.bundle)
            .await
            .map_err(internal_error)
    }
}
