use async_trait::async_trait;
use bitcoin::block::Header as BlockHeader;
use sqk_types::{DecryptionKey, SqueakEntry, SqueakHash};

use crate::StorageResult;

/// Squeak persistence and query surface.
///
/// Entry-returning queries order newest first (block height, then time) and
/// decorate entries with the author's local profile name where one exists.
#[async_trait]
pub trait SqueakStorage {
    /// Insert a squeak with the block header it is anchored to. Returns the
    /// squeak hash, or `None` if the squeak was already present.
    async fn insert_squeak(
        &self,
        squeak: &sqk_types::Squeak,
        header: &BlockHeader,
    ) -> StorageResult<Option<SqueakHash>>;

    async fn get_squeak(&self, hash: &SqueakHash) -> StorageResult<Option<sqk_types::Squeak>>;

    /// The block header stored with the squeak at insert time.
    async fn get_block_header(&self, hash: &SqueakHash) -> StorageResult<Option<BlockHeader>>;

    async fn delete_squeak(&self, hash: &SqueakHash) -> StorageResult<()>;

    /// Unlock a stored squeak: record its decryption key and decrypted
    /// content. The content is denormalized so queries never re-decrypt.
    async fn set_decryption_key(
        &self,
        hash: &SqueakHash,
        key: DecryptionKey,
        content: &str,
    ) -> StorageResult<()>;

    async fn set_squeak_liked(&self, hash: &SqueakHash, time_ms: u64) -> StorageResult<()>;

    async fn set_squeak_unliked(&self, hash: &SqueakHash) -> StorageResult<()>;

    /// Hashes of stored squeaks by the given authors inside the inclusive
    /// block range. Used by upload reconciliation and inv serving.
    async fn lookup_squeaks(
        &self,
        addresses: &[String],
        min_block: u32,
        max_block: u32,
    ) -> StorageResult<Vec<SqueakHash>>;

    /// The stored squeak whose decryption-key commitment equals `data_key`.
    /// The commitment doubles as the payment hash of offers sold for the
    /// squeak, so this resolves settled invoices back to squeaks.
    async fn get_squeak_by_data_key(
        &self,
        data_key: &[u8; 32],
    ) -> StorageResult<Option<SqueakHash>>;

    async fn get_squeak_entry(&self, hash: &SqueakHash) -> StorageResult<Option<SqueakEntry>>;

    /// Entries by followed authors, newest first.
    async fn get_timeline_entries(&self, limit: usize) -> StorageResult<Vec<SqueakEntry>>;

    /// Entries by one author, newest first.
    async fn get_address_entries(
        &self,
        address: &str,
        limit: usize,
    ) -> StorageResult<Vec<SqueakEntry>>;

    /// Liked entries, most recently liked first.
    async fn get_liked_entries(&self, limit: usize) -> StorageResult<Vec<SqueakEntry>>;

    /// The reply chain from the thread root down to the given squeak,
    /// inclusive. Empty if the squeak is unknown.
    async fn get_thread_ancestor_entries(
        &self,
        hash: &SqueakHash,
    ) -> StorageResult<Vec<SqueakEntry>>;

    /// Direct replies to the given squeak, newest first.
    async fn get_thread_reply_entries(&self, hash: &SqueakHash)
        -> StorageResult<Vec<SqueakEntry>>;

    /// Case-insensitive substring search over unlocked content. `last` is a
    /// resume cursor: entries at or before it are skipped.
    async fn get_squeak_entries_for_text_search(
        &self,
        text: &str,
        limit: usize,
        last: Option<SqueakHash>,
    ) -> StorageResult<Vec<SqueakEntry>>;

    async fn number_of_squeaks(&self) -> StorageResult<u64>;
}
