//! The per-peer sync RPC stub.
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};

use sqk_rpc_api::peer::{
    DownloadLookupRequest, SqueakPeerRpcClient, UploadLookup, UploadSqueakRequest,
};
use sqk_types::network::Network;
use sqk_types::{Offer, PeerAddress, SqueakBundle, SqueakHash};

/// Sync operations against one remote node. The concrete stub applies the
/// configured timeout to every call.
#[async_trait]
pub trait PeerSyncRpc: Send + Sync {
    /// Hashes the remote carries for the given authors and block range.
    async fn lookup_squeaks_to_download(
        &self,
        network: Network,
        addresses: Vec<String>,
        min_block: u32,
        max_block: u32,
    ) -> Result<Vec<SqueakHash>>;

    /// What the remote already has, and what it accepts uploads for.
    async fn lookup_squeaks_to_upload(
        &self,
        network: Network,
        addresses: Vec<String>,
    ) -> Result<UploadLookup>;

    /// Fetch one squeak with its anchoring header.
    async fn download_squeak(&self, hash: SqueakHash) -> Result<SqueakBundle>;

    /// Fetch an offer for one squeak's decryption key.
    async fn download_offer(&self, hash: SqueakHash) -> Result<Offer>;

    /// Hashes of replies the remote carries for the given squeak.
    async fn lookup_replies(&self, hash: SqueakHash) -> Result<Vec<SqueakHash>>;

    /// Push one squeak to the remote.
    async fn upload_squeak(&self, bundle: SqueakBundle) -> Result<()>;
}

#[cfg(any(test, feature = "mocks"))]
mockall::mock! {
    pub PeerSyncRpc {}

    #[async_trait]
    impl PeerSyncRpc for PeerSyncRpc {
        async fn lookup_squeaks_to_download(
            &self,
            network: Network,
            addresses: Vec<String>,
            min_block: u32,
            max_block: u32,
        ) -> Result<Vec<SqueakHash>>;
        async fn lookup_squeaks_to_upload(
            &self,
            network: Network,
            addresses: Vec<String>,
        ) -> Result<UploadLookup>;
        async fn download_squeak(&self, hash: SqueakHash) -> Result<SqueakBundle>;
        async fn download_offer(&self, hash: SqueakHash) -> Result<Offer>;
        async fn lookup_replies(&self, hash: SqueakHash) -> Result<Vec<SqueakHash>>;
        async fn upload_squeak(&self, bundle: SqueakBundle) -> Result<()>;
    }
}

/// JSON-RPC stub over HTTP, one per remote peer.
pub struct HttpPeerClient {
    client: HttpClient,
}

impl HttpPeerClient {
    /// Open a stub against the peer's sync endpoint with a per-request
    /// timeout.
    pub fn open(peer_address: &PeerAddress, timeout: Duration) -> Result<Self> {
        let url = format!(
            "http://{}:{}",
            peer_address.host,
            crate::sync_port(peer_address.resolved_port()),
        );

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(url)
            .wrap_err("failed to build peer sync stub")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PeerSyncRpc for HttpPeerClient {
    async fn lookup_squeaks_to_download(
        &self,
        network: Network,
        addresses: Vec<String>,
        min_block: u32,
        max_block: u32,
    ) -> Result<Vec<SqueakHash>> {
        Ok(self
            .client
            .lookup_squeaks_to_download(DownloadLookupRequest {
                network,
                addresses,
                min_block,
                max_block,
            })
            .await?)
    }

    async fn lookup_squeaks_to_upload(
        &self,
        network: Network,
        addresses: Vec<String>,
    ) -> Result<UploadLookup> {
        Ok(self
            .client
            .lookup_squeaks_to_upload(network, addresses)
            .await?)
    }

    async fn download_squeak(&self, hash: SqueakHash) -> Result<SqueakBundle> {
        Ok(self.client.download_squeak(hash).await?.bundle)
    }

    async fn download_offer(&self, hash: SqueakHash) -> Result<Offer> {
        Ok(self.client.download_offer(hash).await?.offer)
    }

    async fn lookup_replies(&self, hash: SqueakHash) -> Result<Vec<SqueakHash>> {
        Ok(self.client.lookup_replies(hash).await?)
    }

    async fn upload_squeak(&self, bundle: SqueakBundle) -> Result<()> {
        self.client
            .upload_squeak(UploadSqueakRequest { bundle })
            .await?;

        Ok(())
    }
}
