//! In-memory storage engine.
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bitcoin::block::Header as BlockHeader;
use tracing::debug;

use sqk_types::{
    DecryptionKey, PaymentSummary, PeerAddress, Profile, ReceivedOffer, ReceivedPayment,
    SentPayment, Squeak, SqueakEntry, SqueakHash, SqueakPeer,
};

use crate::{
    OfferStorage, PaymentStorage, PeerStorage, ProfileStorage, SqueakStorage, StorageError,
    StorageResult,
};

/// Connection string accepted by [`MemoryStore::open`].
const MEMORY_SCHEME: &str = "memory://";

#[derive(Clone)]
struct StoredSqueak {
    squeak: Squeak,
    header: BlockHeader,
    /// Decrypted content, denormalized at unlock time.
    content: Option<String>,
    liked_time_ms: Option<u64>,
}

#[derive(Default)]
struct Inner {
    squeaks: HashMap<SqueakHash, StoredSqueak>,
    received_offers: HashMap<(SqueakHash, PeerAddress), ReceivedOffer>,
    sent_payments: Vec<SentPayment>,
    received_payments: Vec<ReceivedPayment>,
    latest_settle_index: u64,
    profiles: HashMap<u64, Profile>,
    next_profile_id: u64,
    peers: HashMap<u64, SqueakPeer>,
    next_peer_id: u64,
}

/// The bundled storage engine: everything in process memory behind one lock.
///
/// Locks are held only for map access, never across `.await`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store from a connection string. Only the `memory://` scheme is
    /// understood here; anything else is a configuration error.
    pub fn open(connection_string: &str) -> StorageResult<Self> {
        if !connection_string.starts_with(MEMORY_SCHEME) {
            return Err(StorageError::UnsupportedConnectionString(
                connection_string.to_owned(),
            ));
        }

        Ok(Self::new())
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("store lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("store lock poisoned")
    }
}

impl Inner {
    fn entry(&self, stored: &StoredSqueak) -> SqueakEntry {
        let squeak = &stored.squeak;

        SqueakEntry {
            squeak_hash: squeak.hash(),
            author_address: squeak.author_address.clone(),
            author_name: self
                .profiles
                .values()
                .find(|p| p.address == squeak.author_address)
                .map(|p| p.name.clone()),
            reply_to: squeak.reply_to,
            block_height: squeak.block_height,
            time: squeak.time,
            is_unlocked: stored.content.is_some(),
            content: stored.content.clone(),
            liked_time_ms: stored.liked_time_ms,
        }
    }

    /// All stored squeaks, newest first.
    fn sorted(&self) -> Vec<&StoredSqueak> {
        let mut all: Vec<&StoredSqueak> = self.squeaks.values().collect();
        all.sort_by(|a, b| {
            (b.squeak.block_height, b.squeak.time, b.squeak.hash())
                .cmp(&(a.squeak.block_height, a.squeak.time, a.squeak.hash()))
        });
        all
    }

    fn followed_addresses(&self) -> Vec<String> {
        self.profiles
            .values()
            .filter(|p| p.following)
            .map(|p| p.address.clone())
            .collect()
    }
}

#[async_trait]
impl SqueakStorage for MemoryStore {
    async fn insert_squeak(
        &self,
        squeak: &Squeak,
        header: &BlockHeader,
    ) -> StorageResult<Option<SqueakHash>> {
        let hash = squeak.hash();
        let mut inner = self.write();

        if inner.squeaks.contains_key(&hash) {
            debug!(%hash, "duplicate squeak insert ignored");
            return Ok(None);
        }

        inner.squeaks.insert(
            hash,
            StoredSqueak {
                content: squeak.content(),
                squeak: squeak.clone(),
                header: *header,
                liked_time_ms: None,
            },
        );

        Ok(Some(hash))
    }

    async fn get_squeak(&self, hash: &SqueakHash) -> StorageResult<Option<Squeak>> {
        Ok(self.read().squeaks.get(hash).map(|s| s.squeak.clone()))
    }

    async fn get_block_header(&self, hash: &SqueakHash) -> StorageResult<Option<BlockHeader>> {
        Ok(self.read().squeaks.get(hash).map(|s| s.header))
    }

    async fn delete_squeak(&self, hash: &SqueakHash) -> StorageResult<()> {
        self.write().squeaks.remove(hash);
        Ok(())
    }

    async fn set_decryption_key(
        &self,
        hash: &SqueakHash,
        key: DecryptionKey,
        content: &str,
    ) -> StorageResult<()> {
        let mut inner = self.write();

        if let Some(stored) = inner.squeaks.get_mut(hash) {
            stored.squeak.decryption_key = Some(key);
            stored.content = Some(content.to_owned());
        }

        Ok(())
    }

    async fn set_squeak_liked(&self, hash: &SqueakHash, time_ms: u64) -> StorageResult<()> {
        let mut inner = self.write();

        if let Some(stored) = inner.squeaks.get_mut(hash) {
            stored.liked_time_ms = Some(time_ms);
        }

        Ok(())
    }

    async fn set_squeak_unliked(&self, hash: &SqueakHash) -> StorageResult<()> {
        let mut inner = self.write();

        if let Some(stored) = inner.squeaks.get_mut(hash) {
            stored.liked_time_ms = None;
        }

        Ok(())
    }

    async fn lookup_squeaks(
        &self,
        addresses: &[String],
        min_block: u32,
        max_block: u32,
    ) -> StorageResult<Vec<SqueakHash>> {
        let inner = self.read();

        Ok(inner
            .squeaks
            .iter()
            .filter(|(_, s)| {
                s.squeak.block_height >= min_block
                    && s.squeak.block_height <= max_block
                    && addresses.contains(&s.squeak.author_address)
            })
            .map(|(hash, _)| *hash)
            .collect())
    }

    async fn get_squeak_by_data_key(
        &self,
        data_key: &[u8; 32],
    ) -> StorageResult<Option<SqueakHash>> {
        Ok(self
            .read()
            .squeaks
            .iter()
            .find(|(_, s)| s.squeak.data_key == *data_key)
            .map(|(hash, _)| *hash))
    }

    async fn get_squeak_entry(&self, hash: &SqueakHash) -> StorageResult<Option<SqueakEntry>> {
        let inner = self.read();

        Ok(inner.squeaks.get(hash).map(|s| inner.entry(s)))
    }

    async fn get_timeline_entries(&self, limit: usize) -> StorageResult<Vec<SqueakEntry>> {
        let inner = self.read();
        let followed = inner.followed_addresses();

        Ok(inner
            .sorted()
            .into_iter()
            .filter(|s| followed.contains(&s.squeak.author_address))
            .take(limit)
            .map(|s| inner.entry(s))
            .collect())
    }

    async fn get_address_entries(
        &self,
        address: &str,
        limit: usize,
    ) -> StorageResult<Vec<SqueakEntry>> {
        let inner = self.read();

        Ok(inner
            .sorted()
            .into_iter()
            .filter(|s| s.squeak.author_address == address)
            .take(limit)
            .map(|s| inner.entry(s))
            .collect())
    }

    async fn get_liked_entries(&self, limit: usize) -> StorageResult<Vec<SqueakEntry>> {
        let inner = self.read();

        let mut liked: Vec<&StoredSqueak> = inner
            .squeaks
            .values()
            .filter(|s| s.liked_time_ms.is_some())
            .collect();
        liked.sort_by(|a, b| b.liked_time_ms.cmp(&a.liked_time_ms));

        Ok(liked
            .into_iter()
            .take(limit)
            .map(|s| inner.entry(s))
            .collect())
    }

    async fn get_thread_ancestor_entries(
        &self,
        hash: &SqueakHash,
    ) -> StorageResult<Vec<SqueakEntry>> {
        let inner = self.read();

        let mut chain = Vec::new();
        let mut cursor = *hash;

        while let Some(stored) = inner.squeaks.get(&cursor) {
            chain.push(inner.entry(stored));
            match stored.squeak.reply_to {
                Some(parent) => cursor = parent,
                None => break,
            }
        }

        chain.reverse();
        Ok(chain)
    }

    async fn get_thread_reply_entries(
        &self,
        hash: &SqueakHash,
    ) -> StorageResult<Vec<SqueakEntry>> {
        let inner = self.read();

        Ok(inner
            .sorted()
            .into_iter()
            .filter(|s| s.squeak.reply_to.as_ref() == Some(hash))
            .map(|s| inner.entry(s))
            .collect())
    }

    async fn get_squeak_entries_for_text_search(
        &self,
        text: &str,
        limit: usize,
        last: Option<SqueakHash>,
    ) -> StorageResult<Vec<SqueakEntry>> {
        let inner = self.read();
        let needle = text.to_lowercase();

        let matches = inner.sorted().into_iter().filter(|s| {
            s.content
                .as_ref()
                .map(|c| c.to_lowercase().contains(&needle))
                .unwrap_or(false)
        });

        // Skip everything up to and including the cursor.
        let mut seen_cursor = last.is_none();
        let mut entries = Vec::new();
        for stored in matches {
            if !seen_cursor {
                if Some(stored.squeak.hash()) == last {
                    seen_cursor = true;
                }
                continue;
            }
            if entries.len() == limit {
                break;
            }
            entries.push(inner.entry(stored));
        }

        Ok(entries)
    }

    async fn number_of_squeaks(&self) -> StorageResult<u64> {
        Ok(self.read().squeaks.len() as u64)
    }
}

#[async_trait]
impl OfferStorage for MemoryStore {
    async fn save_received_offer(&self, offer: &ReceivedOffer) -> StorageResult<()> {
        self.write().received_offers.insert(
            (offer.offer.squeak_hash, offer.peer_address.clone()),
            offer.clone(),
        );

        Ok(())
    }

    async fn get_received_offer(
        &self,
        hash: &SqueakHash,
        peer_address: &PeerAddress,
    ) -> StorageResult<Option<ReceivedOffer>> {
        Ok(self
            .read()
            .received_offers
            .get(&(*hash, peer_address.clone()))
            .cloned())
    }

    async fn get_received_offers(&self, hash: &SqueakHash) -> StorageResult<Vec<ReceivedOffer>> {
        Ok(self
            .read()
            .received_offers
            .values()
            .filter(|o| o.offer.squeak_hash == *hash)
            .cloned()
            .collect())
    }

    async fn delete_offers_for_squeak(&self, hash: &SqueakHash) -> StorageResult<()> {
        self.write()
            .received_offers
            .retain(|(offer_hash, _), _| offer_hash != hash);

        Ok(())
    }

    async fn delete_expired_received_offers(&self, now_secs: u64) -> StorageResult<u64> {
        let mut inner = self.write();
        let before = inner.received_offers.len();

        inner
            .received_offers
            .retain(|_, offer| offer.is_valid_for_purchase(now_secs));

        Ok((before - inner.received_offers.len()) as u64)
    }
}

#[async_trait]
impl PaymentStorage for MemoryStore {
    async fn save_sent_payment(&self, payment: &SentPayment) -> StorageResult<()> {
        self.write().sent_payments.push(payment.clone());
        Ok(())
    }

    async fn get_sent_payments(&self, limit: usize) -> StorageResult<Vec<SentPayment>> {
        Ok(self
            .read()
            .sent_payments
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_settled_sent_payment(
        &self,
        payment_hash: &[u8; 32],
    ) -> StorageResult<Option<SentPayment>> {
        Ok(self
            .read()
            .sent_payments
            .iter()
            .find(|p| p.settled && p.payment_hash == *payment_hash)
            .cloned())
    }

    async fn save_received_payment(&self, payment: &ReceivedPayment) -> StorageResult<()> {
        self.write().received_payments.push(payment.clone());
        Ok(())
    }

    async fn get_received_payments(&self, limit: usize) -> StorageResult<Vec<ReceivedPayment>> {
        Ok(self
            .read()
            .received_payments
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_received_payments(&self) -> StorageResult<()> {
        let mut inner = self.write();
        inner.received_payments.clear();
        inner.latest_settle_index = 0;

        Ok(())
    }

    async fn get_latest_settle_index(&self) -> StorageResult<u64> {
        Ok(self.read().latest_settle_index)
    }

    async fn set_latest_settle_index(&self, index: u64) -> StorageResult<()> {
        self.write().latest_settle_index = index;
        Ok(())
    }

    async fn get_payment_summary(&self) -> StorageResult<PaymentSummary> {
        let inner = self.read();

        let settled_sent = inner.sent_payments.iter().filter(|p| p.settled);
        let (num_sent_payments, msat_spent) = settled_sent
            .fold((0u64, 0u64), |(n, sum), p| (n + 1, sum + p.amount_msat));

        let (num_received_payments, msat_earned) = inner
            .received_payments
            .iter()
            .fold((0u64, 0u64), |(n, sum), p| (n + 1, sum + p.amount_msat));

        Ok(PaymentSummary {
            num_sent_payments,
            msat_spent,
            num_received_payments,
            msat_earned,
        })
    }
}

#[async_trait]
impl ProfileStorage for MemoryStore {
    async fn insert_profile(&self, profile: &Profile) -> StorageResult<u64> {
        let mut inner = self.write();

        if inner.profiles.values().any(|p| p.name == profile.name) {
            return Err(StorageError::ProfileNameExists(profile.name.clone()));
        }

        inner.next_profile_id += 1;
        let profile_id = inner.next_profile_id;

        let mut profile = profile.clone();
        profile.profile_id = Some(profile_id);
        inner.profiles.insert(profile_id, profile);

        Ok(profile_id)
    }

    async fn get_profile(&self, profile_id: u64) -> StorageResult<Option<Profile>> {
        Ok(self.read().profiles.get(&profile_id).cloned())
    }

    async fn get_profile_by_name(&self, name: &str) -> StorageResult<Option<Profile>> {
        Ok(self
            .read()
            .profiles
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn get_profile_by_address(&self, address: &str) -> StorageResult<Option<Profile>> {
        Ok(self
            .read()
            .profiles
            .values()
            .find(|p| p.address == address)
            .cloned())
    }

    async fn get_profiles(&self) -> StorageResult<Vec<Profile>> {
        Ok(self.read().profiles.values().cloned().collect())
    }

    async fn get_signing_profiles(&self) -> StorageResult<Vec<Profile>> {
        Ok(self
            .read()
            .profiles
            .values()
            .filter(|p| p.is_signing())
            .cloned()
            .collect())
    }

    async fn get_contact_profiles(&self) -> StorageResult<Vec<Profile>> {
        Ok(self
            .read()
            .profiles
            .values()
            .filter(|p| !p.is_signing())
            .cloned()
            .collect())
    }

    async fn get_followed_addresses(&self) -> StorageResult<Vec<String>> {
        Ok(self.read().followed_addresses())
    }

    async fn set_profile_following(&self, profile_id: u64, following: bool) -> StorageResult<()> {
        if let Some(profile) = self.write().profiles.get_mut(&profile_id) {
            profile.following = following;
        }

        Ok(())
    }

    async fn set_profile_use_custom_price(
        &self,
        profile_id: u64,
        use_custom_price: bool,
    ) -> StorageResult<()> {
        if let Some(profile) = self.write().profiles.get_mut(&profile_id) {
            profile.use_custom_price = use_custom_price;
        }

        Ok(())
    }

    async fn set_profile_custom_price(
        &self,
        profile_id: u64,
        price_msat: u64,
    ) -> StorageResult<()> {
        if let Some(profile) = self.write().profiles.get_mut(&profile_id) {
            profile.custom_price_msat = price_msat;
        }

        Ok(())
    }

    async fn rename_profile(&self, profile_id: u64, name: &str) -> StorageResult<()> {
        let mut inner = self.write();

        if inner
            .profiles
            .iter()
            .any(|(id, p)| *id != profile_id && p.name == name)
        {
            return Err(StorageError::ProfileNameExists(name.to_owned()));
        }

        if let Some(profile) = inner.profiles.get_mut(&profile_id) {
            profile.name = name.to_owned();
        }

        Ok(())
    }

    async fn set_profile_image(
        &self,
        profile_id: u64,
        image: Option<Vec<u8>>,
    ) -> StorageResult<()> {
        if let Some(profile) = self.write().profiles.get_mut(&profile_id) {
            profile.image = image;
        }

        Ok(())
    }

    async fn delete_profile(&self, profile_id: u64) -> StorageResult<()> {
        self.write().profiles.remove(&profile_id);
        Ok(())
    }
}

#[async_trait]
impl PeerStorage for MemoryStore {
    async fn insert_peer(&self, peer: &SqueakPeer) -> StorageResult<u64> {
        let mut inner = self.write();

        inner.next_peer_id += 1;
        let peer_id = inner.next_peer_id;

        let mut peer = peer.clone();
        peer.peer_id = Some(peer_id);
        inner.peers.insert(peer_id, peer);

        Ok(peer_id)
    }

    async fn get_peer(&self, peer_id: u64) -> StorageResult<Option<SqueakPeer>> {
        Ok(self.read().peers.get(&peer_id).cloned())
    }

    async fn get_peers(&self) -> StorageResult<Vec<SqueakPeer>> {
        Ok(self.read().peers.values().cloned().collect())
    }

    async fn get_autoconnect_peers(&self) -> StorageResult<Vec<SqueakPeer>> {
        Ok(self
            .read()
            .peers
            .values()
            .filter(|p| p.autoconnect)
            .cloned()
            .collect())
    }

    async fn set_peer_autoconnect(&self, peer_id: u64, autoconnect: bool) -> StorageResult<()> {
        if let Some(peer) = self.write().peers.get_mut(&peer_id) {
            peer.autoconnect = autoconnect;
        }

        Ok(())
    }

    async fn rename_peer(&self, peer_id: u64, name: &str) -> StorageResult<()> {
        if let Some(peer) = self.write().peers.get_mut(&peer_id) {
            peer.name = name.to_owned();
        }

        Ok(())
    }

    async fn delete_peer(&self, peer_id: u64) -> StorageResult<()> {
        self.write().peers.remove(&peer_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::block::Version;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{rand::thread_rng, SecretKey};
    use bitcoin::hash_types::TxMerkleNode;
    use bitcoin::CompactTarget;
    use sqk_types::network::Network;

    fn gen_header(height: u32) -> BlockHeader {
        BlockHeader {
            version: Version::from_consensus(4),
            prev_blockhash: bitcoin::BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_600_000_000 + height,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: 0,
        }
    }

    fn gen_squeak(
        signing_key: &SecretKey,
        content: &str,
        height: u32,
        reply_to: Option<SqueakHash>,
    ) -> (Squeak, BlockHeader) {
        let header = gen_header(height);
        let squeak = Squeak::make(
            signing_key,
            Network::Simnet,
            content,
            height,
            header.block_hash(),
            reply_to,
            1_600_000_000 + height,
        )
        .unwrap()
        .0;

        (squeak, header)
    }

    #[tokio::test]
    async fn duplicate_insert_returns_none() {
        let store = MemoryStore::new();
        let key = SecretKey::new(&mut thread_rng());
        let (squeak, header) = gen_squeak(&key, "only once", 1, None);

        let hash = store.insert_squeak(&squeak, &header).await.unwrap();
        assert_eq!(hash, Some(squeak.hash()));

        let again = store.insert_squeak(&squeak, &header).await.unwrap();
        assert_eq!(again, None);

        let retrieved = store.get_squeak(&squeak.hash()).await.unwrap().unwrap();
        assert_eq!(retrieved, squeak);
    }

    #[tokio::test]
    async fn liked_then_unliked() {
        let store = MemoryStore::new();
        let key = SecretKey::new(&mut thread_rng());
        let (squeak, header) = gen_squeak(&key, "likeable", 1, None);
        let hash = store.insert_squeak(&squeak, &header).await.unwrap().unwrap();

        store.set_squeak_liked(&hash, 1234).await.unwrap();
        let entry = store.get_squeak_entry(&hash).await.unwrap().unwrap();
        assert_eq!(entry.liked_time_ms, Some(1234));
        assert_eq!(store.get_liked_entries(200).await.unwrap().len(), 1);

        store.set_squeak_unliked(&hash).await.unwrap();
        let entry = store.get_squeak_entry(&hash).await.unwrap().unwrap();
        assert_eq!(entry.liked_time_ms, None);
        assert!(store.get_liked_entries(200).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeline_is_gated_by_following() {
        let store = MemoryStore::new();
        let key = SecretKey::new(&mut thread_rng());

        let mut author = None;
        for height in 0..100 {
            let (squeak, header) = gen_squeak(&key, &format!("squeak {height}"), height, None);
            author = Some(squeak.author_address.clone());
            store.insert_squeak(&squeak, &header).await.unwrap();
        }

        let mut profile = Profile::new_contact("author", author.unwrap());
        profile.following = true;
        let profile_id = store.insert_profile(&profile).await.unwrap();

        let timeline = store.get_timeline_entries(2).await.unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].block_height, 99);
        assert_eq!(timeline[0].author_name.as_deref(), Some("author"));

        store.set_profile_following(profile_id, false).await.unwrap();
        assert!(store.get_timeline_entries(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn thread_traversal() {
        let store = MemoryStore::new();
        let key = SecretKey::new(&mut thread_rng());

        let (root, root_header) = gen_squeak(&key, "root", 1, None);
        let (reply, reply_header) = gen_squeak(&key, "reply", 2, Some(root.hash()));

        store.insert_squeak(&root, &root_header).await.unwrap();
        store.insert_squeak(&reply, &reply_header).await.unwrap();

        let ancestors = store
            .get_thread_ancestor_entries(&reply.hash())
            .await
            .unwrap();
        assert_eq!(ancestors.len(), 2);
        assert_eq!(ancestors[0].squeak_hash, root.hash());
        assert_eq!(ancestors[1].squeak_hash, reply.hash());

        let replies = store.get_thread_reply_entries(&root.hash()).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].squeak_hash, reply.hash());

        let missing = SqueakHash::from_byte_array([0xaa; 32]);
        assert!(store
            .get_thread_ancestor_entries(&missing)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn text_search_sees_only_unlocked_content() {
        let store = MemoryStore::new();
        let key = SecretKey::new(&mut thread_rng());
        let (squeak, header) = gen_squeak(&key, "hello world", 1, None);

        store.insert_squeak(&squeak, &header).await.unwrap();

        let hits = store
            .get_squeak_entries_for_text_search("hello", 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content.as_deref(), Some("hello world"));

        let misses = store
            .get_squeak_entries_for_text_search("goodbye", 10, None)
            .await
            .unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn locked_squeak_becomes_searchable_after_unlock() {
        let store = MemoryStore::new();
        let key = SecretKey::new(&mut thread_rng());
        let (squeak, header) = gen_squeak(&key, "buried treasure", 1, None);
        let secret = squeak.decryption_key.unwrap();

        let locked = squeak.without_decryption_key();
        store.insert_squeak(&locked, &header).await.unwrap();

        assert!(store
            .get_squeak_entries_for_text_search("treasure", 10, None)
            .await
            .unwrap()
            .is_empty());

        store
            .set_decryption_key(&locked.hash(), secret, "buried treasure")
            .await
            .unwrap();

        let hits = store
            .get_squeak_entries_for_text_search("treasure", 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_unlocked);
    }

    #[tokio::test]
    async fn received_offer_is_unique_per_squeak_and_peer() {
        let store = MemoryStore::new();
        let hash = SqueakHash::from_byte_array([1u8; 32]);
        let peer = PeerAddress::new(Network::Simnet, "127.0.0.1", 18666);

        let offer = ReceivedOffer {
            offer: sqk_types::Offer {
                squeak_hash: hash,
                price_msat: 1000,
                payment_request: "lnsb1...".into(),
                host: "h".into(),
                port: 9735,
                node_pubkey: "02aa".into(),
                expiry: 3600,
                invoice_timestamp: 100,
            },
            peer_address: peer.clone(),
            payment_hash: [2u8; 32],
            decoded_at: 100,
        };

        store.save_received_offer(&offer).await.unwrap();
        store.save_received_offer(&offer).await.unwrap();

        assert_eq!(store.get_received_offers(&hash).await.unwrap().len(), 1);
        assert!(store
            .get_received_offer(&hash, &peer)
            .await
            .unwrap()
            .is_some());

        let removed = store.delete_expired_received_offers(10_000).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn duplicate_profile_name_is_rejected() {
        let store = MemoryStore::new();

        store
            .insert_profile(&Profile::new_contact("carol", "addr1"))
            .await
            .unwrap();
        let dup = store
            .insert_profile(&Profile::new_contact("carol", "addr2"))
            .await;

        assert!(matches!(dup, Err(StorageError::ProfileNameExists(_))));
    }

    #[tokio::test]
    async fn payment_summary_counts_only_settled_sent() {
        let store = MemoryStore::new();
        let peer = PeerAddress::new(Network::Simnet, "127.0.0.1", 18666);
        let hash = SqueakHash::from_byte_array([3u8; 32]);

        let settled = SentPayment {
            payment_hash: [1u8; 32],
            preimage: Some([9u8; 32]),
            amount_msat: 1_000,
            peer_address: peer.clone(),
            squeak_hash: hash,
            time_ms: 1,
            settled: true,
            failure_reason: None,
        };
        let failed = SentPayment {
            payment_hash: [2u8; 32],
            preimage: None,
            amount_msat: 2_000,
            settled: false,
            failure_reason: Some(sqk_types::PaymentFailureReason::SendFailed),
            ..settled.clone()
        };

        store.save_sent_payment(&settled).await.unwrap();
        store.save_sent_payment(&failed).await.unwrap();
        store
            .save_received_payment(&ReceivedPayment {
                payment_hash: [4u8; 32],
                squeak_hash: hash,
                amount_msat: 500,
                time_ms: 2,
            })
            .await
            .unwrap();

        let summary = store.get_payment_summary().await.unwrap();
        assert_eq!(summary.num_sent_payments, 1);
        assert_eq!(summary.msat_spent, 1_000);
        assert_eq!(summary.num_received_payments, 1);
        assert_eq!(summary.msat_earned, 500);

        assert!(store
            .get_settled_sent_payment(&[1u8; 32])
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_settled_sent_payment(&[2u8; 32])
            .await
            .unwrap()
            .is_none());
    }
}
