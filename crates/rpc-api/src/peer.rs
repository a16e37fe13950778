//! The peer-facing sync surface: lookup and transfer of squeaks and offers.
use sqk_types::network::Network;
use sqk_types::{Offer, SqueakBundle, SqueakHash};

#[cfg(any(feature = "client", feature = "server"))]
mod rpc;
#[cfg(any(feature = "client", feature = "server"))]
pub use self::rpc::*;

/// Response for [`lookupsqueakstoupload`](SqueakPeerRpcServer::lookup_squeaks_to_upload):
/// what the remote already has, and the authors and block range it accepts.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UploadLookup {
    /// Hashes the remote already carries.
    pub hashes: Vec<SqueakHash>,
    /// Authors the remote accepts squeaks for.
    pub addresses: Vec<String>,
    pub min_block: u32,
    pub max_block: u32,
}

/// Request body for [`uploadsqueak`](SqueakPeerRpcServer::upload_squeak).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UploadSqueakRequest {
    pub bundle: SqueakBundle,
}

/// Response for [`downloadsqueak`](SqueakPeerRpcServer::download_squeak).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DownloadSqueakResponse {
    pub bundle: SqueakBundle,
}

/// Response for [`downloadoffer`](SqueakPeerRpcServer::download_offer).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DownloadOfferResponse {
    pub offer: Offer,
}

/// Request parameters shared by the lookup methods.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DownloadLookupRequest {
    pub network: Network,
    pub addresses: Vec<String>,
    pub min_block: u32,
    pub max_block: u32,
}
