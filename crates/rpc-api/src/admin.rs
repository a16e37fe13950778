//! The operator-facing admin surface.
use sqk_types::{PaymentSummary, Profile, SqueakPeer};

#[cfg(any(feature = "client", feature = "server"))]
mod rpc;
#[cfg(any(feature = "client", feature = "server"))]
pub use self::rpc::*;

/// A profile as served to the operator: the private key never leaves the
/// node through list calls.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProfileResponse {
    pub profile_id: u64,
    pub name: String,
    pub address: String,
    pub is_signing: bool,
    pub following: bool,
    pub use_custom_price: bool,
    pub custom_price_msat: u64,
    pub has_image: bool,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        Self {
            profile_id: profile.profile_id.unwrap_or_default(),
            is_signing: profile.is_signing(),
            has_image: profile.image.is_some(),
            name: profile.name,
            address: profile.address,
            following: profile.following,
            use_custom_price: profile.use_custom_price,
            custom_price_msat: profile.custom_price_msat,
        }
    }
}

/// A saved peer as served to the operator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeerResponse {
    pub peer_id: u64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub autoconnect: bool,
}

impl From<SqueakPeer> for PeerResponse {
    fn from(peer: SqueakPeer) -> Self {
        Self {
            peer_id: peer.peer_id.unwrap_or_default(),
            name: peer.name,
            host: peer.address.host,
            port: peer.address.port,
            autoconnect: peer.autoconnect,
        }
    }
}

/// The node's externally reachable address, as published in offers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExternalAddressResponse {
    pub host: String,
    pub port: u16,
}

/// Aggregate payment totals.
pub type PaymentSummaryResponse = PaymentSummary;
