//! Plain data returned by the Lightning backend.

/// Identity and chain state of the backing node.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeInfo {
    /// Hex-encoded identity pubkey.
    pub identity_pubkey: String,
    pub alias: String,
    pub block_height: u32,
    /// Hex-encoded hash of the best block.
    pub block_hash: String,
    pub synced_to_chain: bool,
}

/// A settled outgoing payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    /// Preimage revealed by the settled payment.
    pub preimage: [u8; 32],
    /// Amount paid, excluding fees.
    pub amount_msat: u64,
    pub fee_msat: u64,
}

/// A decoded BOLT-11 payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPaymentRequest {
    pub payment_hash: [u8; 32],
    pub amount_msat: u64,
    /// Hex-encoded destination pubkey.
    pub node_pubkey: String,
    /// Seconds after `timestamp` until the invoice expires.
    pub expiry: u32,
    /// Invoice creation time, unix seconds.
    pub timestamp: u64,
}

/// An invoice created by [`crate::LightningClient::add_invoice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedInvoice {
    pub payment_request: String,
    pub payment_hash: [u8; 32],
    pub add_index: u64,
}

/// A settled incoming invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledInvoice {
    pub payment_hash: [u8; 32],
    pub preimage: Option<[u8; 32]>,
    pub amount_msat: u64,
    pub settle_index: u64,
    /// Settle time, unix seconds.
    pub settled_at: u64,
}

/// An open channel of the backing node.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChannelInfo {
    pub remote_pubkey: String,
    pub channel_point: String,
    pub capacity_sat: u64,
    pub local_balance_sat: u64,
    pub remote_balance_sat: u64,
    pub active: bool,
}
