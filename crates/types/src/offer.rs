use crate::address::PeerAddress;
use crate::squeak::SqueakHash;
use crate::PaymentFailureReason;

/// A priced Lightning invoice whose preimage unlocks one squeak.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Offer {
    pub squeak_hash: SqueakHash,
    pub price_msat: u64,
    /// BOLT-11 payment request.
    pub payment_request: String,
    /// Lightning host of the selling node.
    pub host: String,
    pub port: u16,
    /// Hex-encoded pubkey of the selling Lightning node.
    pub node_pubkey: String,
    /// Invoice expiry, seconds after `invoice_timestamp`.
    pub expiry: u32,
    /// Invoice creation time, unix seconds.
    pub invoice_timestamp: u64,
}

/// An offer received from a peer, decoded and bound to its origin.
/// Uniquely identified by `(squeak_hash, peer_address)`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReceivedOffer {
    pub offer: Offer,
    pub peer_address: PeerAddress,
    /// Payment hash extracted from the decoded payment request.
    pub payment_hash: [u8; 32],
    /// When the offer was decoded, unix seconds.
    pub decoded_at: u64,
}

impl ReceivedOffer {
    /// An offer can be purchased while its invoice has not expired.
    pub fn is_valid_for_purchase(&self, now_secs: u64) -> bool {
        self.offer.invoice_timestamp + u64::from(self.offer.expiry) > now_secs
    }
}

/// Record of an outgoing pay-for-key attempt, settled or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SentPayment {
    pub payment_hash: [u8; 32],
    pub preimage: Option<[u8; 32]>,
    pub amount_msat: u64,
    pub peer_address: PeerAddress,
    pub squeak_hash: SqueakHash,
    /// When the attempt finished, unix milliseconds.
    pub time_ms: u64,
    pub settled: bool,
    pub failure_reason: Option<PaymentFailureReason>,
}

/// Record of a settled incoming payment for one of our offers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReceivedPayment {
    pub payment_hash: [u8; 32],
    pub squeak_hash: SqueakHash,
    pub amount_msat: u64,
    /// When the payment settled, unix milliseconds.
    pub time_ms: u64,
}

/// Aggregate over all sent and received payments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PaymentSummary {
    pub num_sent_payments: u64,
    pub msat_spent: u64,
    pub num_received_payments: u64,
    pub msat_earned: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use bitcoin::hashes::Hash;

    fn offer(invoice_timestamp: u64, expiry: u32) -> ReceivedOffer {
        ReceivedOffer {
            offer: Offer {
                squeak_hash: SqueakHash::all_zeros(),
                price_msat: 1_000,
                payment_request: "lnsb1...".into(),
                host: "seller.example.com".into(),
                port: 9735,
                node_pubkey: "02aa".into(),
                expiry,
                invoice_timestamp,
            },
            peer_address: PeerAddress::new(Network::Simnet, "127.0.0.1", 18666),
            payment_hash: [1u8; 32],
            decoded_at: invoice_timestamp,
        }
    }

    #[test]
    fn expired_offer_is_not_purchasable() {
        let live = offer(1_000, 600);
        assert!(live.is_valid_for_purchase(1_500));

        let expired = offer(1_000, 600);
        assert!(!expired.is_valid_for_purchase(1_600));
    }
}
