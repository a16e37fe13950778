//! Core data model of the squeak network: squeaks and their hashes, peer
//! addresses, offers, payments, profiles, and the wire messages peers
//! exchange.

pub use address::PeerAddress;
#[cfg(feature = "messages")]
pub use messages::p2p::{Inventory, NetworkMessage, RawNetworkMessage};
#[cfg(feature = "messages")]
pub use messages::{ControllerMessage, ControllerP2PMessage, PeerEvent, PeerSummary};
pub use offer::{Offer, PaymentSummary, ReceivedOffer, ReceivedPayment, SentPayment};
pub use peer::SqueakPeer;
pub use profile::Profile;
pub use squeak::{
    validate_block_header, BlockRange, DecryptionKey, InterestFilter, Squeak, SqueakBundle,
    SqueakEntry, SqueakError, SqueakHash, DECRYPTION_KEY_SIZE,
};

pub mod address;
pub mod network;
pub mod offer;
pub mod peer;
pub mod profile;
pub mod squeak;

#[cfg(feature = "consensus")]
mod consensus;
#[cfg(feature = "messages")]
pub mod messages;

/// Reason recorded on a sent payment that did not settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PaymentFailureReason {
    /// The Lightning backend failed or timed out sending the payment.
    SendFailed,
    /// The returned preimage does not hash to the invoice payment hash.
    PreimageMismatch,
    /// The offer's invoice had already expired.
    InvoiceExpired,
}

impl std::fmt::Display for PaymentFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendFailed => write!(f, "send failed"),
            Self::PreimageMismatch => write!(f, "preimage mismatch"),
            Self::InvoiceExpired => write!(f, "invoice expired"),
        }
    }
}
