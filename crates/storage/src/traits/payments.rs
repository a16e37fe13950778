use async_trait::async_trait;
use sqk_types::{PaymentSummary, ReceivedPayment, SentPayment};

use crate::StorageResult;

/// Payment bookkeeping: every outgoing attempt (settled or failed) and every
/// settled incoming payment.
#[async_trait]
pub trait PaymentStorage {
    async fn save_sent_payment(&self, payment: &SentPayment) -> StorageResult<()>;

    /// Sent payments, newest first.
    async fn get_sent_payments(&self, limit: usize) -> StorageResult<Vec<SentPayment>>;

    /// A settled sent payment with this payment hash, if any. Guards against
    /// paying the same invoice twice.
    async fn get_settled_sent_payment(
        &self,
        payment_hash: &[u8; 32],
    ) -> StorageResult<Option<SentPayment>>;

    async fn save_received_payment(&self, payment: &ReceivedPayment) -> StorageResult<()>;

    /// Received payments, newest first.
    async fn get_received_payments(&self, limit: usize) -> StorageResult<Vec<ReceivedPayment>>;

    /// Clear received payments so they can be re-ingested from the Lightning
    /// backend after an outage.
    async fn delete_received_payments(&self) -> StorageResult<()>;

    /// Settle-index high-water mark of the Lightning invoice stream.
    async fn get_latest_settle_index(&self) -> StorageResult<u64>;

    async fn set_latest_settle_index(&self, index: u64) -> StorageResult<()>;

    async fn get_payment_summary(&self) -> StorageResult<PaymentSummary>;
}
