use std::time::Duration;

use async_trait::async_trait;

use crate::json::{
    AddedInvoice, ChannelInfo, DecodedPaymentRequest, NodeInfo, PaymentResult, SettledInvoice,
};
use crate::Result;

/// Calls the node makes against its Lightning backend.
#[async_trait]
pub trait LightningClient {
    /// Identity and chain state of the backing Lightning node.
    async fn get_info(&self) -> Result<NodeInfo>;

    /// Pay a BOLT-11 payment request. Resolves once the payment settles with
    /// the preimage, or fails with [`crate::Error::PaymentFailed`] /
    /// [`crate::Error::PaymentTimeout`].
    async fn send_payment(
        &self,
        payment_request: &str,
        timeout: Duration,
    ) -> Result<PaymentResult>;

    /// Decode a BOLT-11 payment request without paying it.
    async fn decode_payment_request(&self, payment_request: &str)
        -> Result<DecodedPaymentRequest>;

    /// Create an invoice whose preimage is chosen by the caller.
    async fn add_invoice(
        &self,
        preimage: [u8; 32],
        amount_msat: u64,
        expiry_secs: u32,
    ) -> Result<AddedInvoice>;

    /// Settled invoices with a settle index greater than `index_offset`,
    /// oldest first.
    async fn settled_invoices(&self, index_offset: u64) -> Result<Vec<SettledInvoice>>;

    /// Raw 80-byte header of the given block, from the backing node's chain
    /// view. `block_hash` is hex-encoded.
    async fn get_block_header(&self, block_hash: &str) -> Result<Vec<u8>>;

    /// Open channels of the backing node.
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>>;

    /// A fresh on-chain address from the backing node's wallet.
    async fn new_address(&self) -> Result<String>;
}

#[cfg(any(test, feature = "mocks"))]
mockall::mock! {
    pub LightningClient {}

    #[async_trait]
    impl LightningClient for LightningClient {
        async fn get_info(&self) -> Result<NodeInfo>;
        async fn send_payment(
            &self,
            payment_request: &str,
            timeout: Duration,
        ) -> Result<PaymentResult>;
        async fn decode_payment_request(
            &self,
            payment_request: &str,
        ) -> Result<DecodedPaymentRequest>;
        async fn add_invoice(
            &self,
            preimage: [u8; 32],
            amount_msat: u64,
            expiry_secs: u32,
        ) -> Result<AddedInvoice>;
        async fn settled_invoices(&self, index_offset: u64) -> Result<Vec<SettledInvoice>>;
        async fn get_block_header(&self, block_hash: &str) -> Result<Vec<u8>>;
        async fn list_channels(&self) -> Result<Vec<ChannelInfo>>;
        async fn new_address(&self) -> Result<String>;
    }
}
