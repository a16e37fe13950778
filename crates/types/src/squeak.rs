use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use bitcoin::block::Header as BlockHeader;
use bitcoin::hashes::{sha256, sha256d, Hash};
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{self, Message, Secp256k1, SecretKey};
use bitcoin::BlockHash;
use once_cell::sync::Lazy;

use crate::network::Network;

bitcoin::hashes::hash_newtype! {
    /// Content-addressed identifier of a squeak: double-SHA-256 of its
    /// serialized header.
    pub struct SqueakHash(sha256d::Hash);
}

/// Secret that unlocks a squeak's content. Also the preimage of the offer
/// invoice sold for it.
pub type DecryptionKey = [u8; DECRYPTION_KEY_SIZE];

pub const DECRYPTION_KEY_SIZE: usize = 32;

/// AES-GCM nonce length used for content encryption.
pub const IV_SIZE: usize = 12;

/// Compact recoverable signature: recovery id byte followed by 64 signature
/// bytes.
pub const SIGNATURE_SIZE: usize = 65;

static SECP: Lazy<Secp256k1<secp256k1::All>> = Lazy::new(Secp256k1::new);

#[derive(Debug, thiserror::Error)]
pub enum SqueakError {
    #[error("squeak content is empty")]
    EmptyContent,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not recover to the author address")]
    AuthorMismatch,
    #[error("secp256k1 error: {0}")]
    Secp(#[from] secp256k1::Error),
    #[error("decryption key does not match the squeak's key commitment")]
    KeyCommitmentMismatch,
    #[error("content decryption failed")]
    DecryptionFailed,
    #[error("decrypted content is not valid utf-8")]
    ContentNotUtf8,
    #[error("squeak has no decryption key")]
    MissingDecryptionKey,
    #[error("block header hash does not match the squeak's block hash")]
    BlockHashMismatch,
    #[error("block header proof of work is invalid")]
    InvalidProofOfWork,
}

/// A signed, block-anchored short message whose content stays encrypted until
/// a decryption key is revealed.
///
/// The optional `decryption_key` is local knowledge: it is never written by
/// the wire codec, so serving a squeak to a peer cannot leak the secret being
/// sold.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Squeak {
    pub version: u32,
    /// P2PKH-encoded address of the signing key.
    pub author_address: String,
    pub block_height: u32,
    /// Hash of the block this squeak is anchored to.
    pub block_hash: BlockHash,
    /// Hash of the squeak this one replies to, if any.
    pub reply_to: Option<SqueakHash>,
    /// SHA-256 commitment to the decryption key.
    pub data_key: [u8; 32],
    /// Cipher nonce for the content encryption.
    pub iv: [u8; IV_SIZE],
    /// Author-claimed unix timestamp, seconds.
    pub time: u32,
    pub nonce: u32,
    pub encrypted_content: Vec<u8>,
    /// Recoverable ECDSA signature over the header hash.
    pub signature: Vec<u8>,
    /// Present iff this squeak is unlocked locally.
    pub decryption_key: Option<DecryptionKey>,
}

impl Squeak {
    /// Create and sign a squeak. Returns the squeak (already unlocked) and
    /// its freshly generated decryption key.
    pub fn make(
        signing_key: &SecretKey,
        network: Network,
        content: &str,
        block_height: u32,
        block_hash: BlockHash,
        reply_to: Option<SqueakHash>,
        time: u32,
    ) -> Result<(Squeak, DecryptionKey), SqueakError> {
        if content.is_empty() {
            return Err(SqueakError::EmptyContent);
        }

        let mut key = [0u8; DECRYPTION_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new_from_slice(&key).expect("key length is fixed");
        let encrypted_content = cipher
            .encrypt(Nonce::from_slice(&iv), content.as_bytes())
            .map_err(|_| SqueakError::DecryptionFailed)?;

        let pubkey = signing_key.public_key(&SECP);
        let author_address = address_for_pubkey(&pubkey, network);

        let mut squeak = Squeak {
            version: 1,
            author_address,
            block_height,
            block_hash,
            reply_to,
            data_key: sha256::Hash::hash(&key).to_byte_array(),
            iv,
            time,
            nonce: 0,
            encrypted_content,
            signature: Vec::new(),
            decryption_key: Some(key),
        };

        let digest = squeak.header_digest();
        let msg = Message::from_slice(digest.as_byte_array().as_ref())?;
        let (recovery_id, compact) = SECP
            .sign_ecdsa_recoverable(&msg, signing_key)
            .serialize_compact();

        let mut signature = Vec::with_capacity(SIGNATURE_SIZE);
        signature.push(recovery_id.to_i32() as u8);
        signature.extend_from_slice(&compact);
        squeak.signature = signature;

        Ok((squeak, key))
    }

    /// The squeak's content-addressed identifier.
    pub fn hash(&self) -> SqueakHash {
        SqueakHash::from_raw_hash(self.header_digest())
    }

    /// Double-SHA-256 over the serialized header. This is both the squeak's
    /// identity and the message the author signs.
    fn header_digest(&self) -> sha256d::Hash {
        let mut buf = Vec::with_capacity(160 + self.author_address.len());

        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.author_address.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.author_address.as_bytes());
        buf.extend_from_slice(&self.block_height.to_le_bytes());
        buf.extend_from_slice(self.block_hash.as_byte_array());
        match &self.reply_to {
            Some(hash) => buf.extend_from_slice(hash.as_byte_array()),
            None => buf.extend_from_slice(&[0u8; 32]),
        }
        buf.extend_from_slice(&self.data_key);
        buf.extend_from_slice(&self.iv);
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(sha256d::Hash::hash(&self.encrypted_content).as_byte_array());

        sha256d::Hash::hash(&buf)
    }

    /// Verify that the signature recovers to the claimed author address.
    pub fn verify_signature(&self, network: Network) -> Result<(), SqueakError> {
        if self.signature.len() != SIGNATURE_SIZE {
            return Err(SqueakError::MalformedSignature);
        }

        let recovery_id = RecoveryId::from_i32(self.signature[0] as i32)
            .map_err(|_| SqueakError::MalformedSignature)?;
        let signature = RecoverableSignature::from_compact(&self.signature[1..], recovery_id)
            .map_err(|_| SqueakError::MalformedSignature)?;

        let digest = self.header_digest();
        let msg = Message::from_slice(digest.as_byte_array().as_ref())?;
        let pubkey = SECP.recover_ecdsa(&msg, &signature)?;

        if address_for_pubkey(&pubkey, network) != self.author_address {
            return Err(SqueakError::AuthorMismatch);
        }

        Ok(())
    }

    /// Whether the decryption key is known locally.
    pub fn is_unlocked(&self) -> bool {
        self.decryption_key.is_some()
    }

    /// Decrypt the content with the given key, without storing the key.
    pub fn decrypt_content(&self, key: &DecryptionKey) -> Result<String, SqueakError> {
        if sha256::Hash::hash(key).to_byte_array() != self.data_key {
            return Err(SqueakError::KeyCommitmentMismatch);
        }

        let cipher = Aes256Gcm::new_from_slice(key).expect("key length is fixed");
        let plain = cipher
            .decrypt(Nonce::from_slice(&self.iv), self.encrypted_content.as_ref())
            .map_err(|_| SqueakError::DecryptionFailed)?;

        let content = String::from_utf8(plain).map_err(|_| SqueakError::ContentNotUtf8)?;
        if content.is_empty() {
            return Err(SqueakError::EmptyContent);
        }

        Ok(content)
    }

    /// Unlock the squeak: validate the key against the commitment, store it,
    /// and return the decrypted content.
    pub fn set_decryption_key(&mut self, key: DecryptionKey) -> Result<String, SqueakError> {
        let content = self.decrypt_content(&key)?;
        self.decryption_key = Some(key);

        Ok(content)
    }

    /// Decrypted content, if the squeak is unlocked.
    pub fn content(&self) -> Option<String> {
        let key = self.decryption_key.as_ref()?;
        self.decrypt_content(key).ok()
    }

    /// A copy safe to put on the wire: identical squeak, no local secret.
    pub fn without_decryption_key(&self) -> Squeak {
        Squeak {
            decryption_key: None,
            ..self.clone()
        }
    }
}

/// Validate the block header stored alongside a squeak: the header must be
/// the block the squeak claims, and its proof of work must hold.
pub fn validate_block_header(squeak: &Squeak, header: &BlockHeader) -> Result<(), SqueakError> {
    if header.block_hash() != squeak.block_hash {
        return Err(SqueakError::BlockHashMismatch);
    }

    header
        .validate_pow(header.target())
        .map_err(|_| SqueakError::InvalidProofOfWork)?;

    Ok(())
}

/// A squeak travelling with the header of the block it is anchored to, so the
/// receiver can check the proof-of-work claim without its own chain access.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SqueakBundle {
    pub squeak: Squeak,
    pub header: BlockHeader,
}

impl SqueakBundle {
    pub fn new(squeak: Squeak, header: BlockHeader) -> Self {
        Self { squeak, header }
    }

    /// Full validation of a squeak arriving from the network: signature and
    /// block anchoring.
    pub fn validate(&self, network: Network) -> Result<(), SqueakError> {
        self.squeak.verify_signature(network)?;
        validate_block_header(&self.squeak, &self.header)
    }

    /// A copy safe to put on the wire.
    pub fn without_decryption_key(&self) -> SqueakBundle {
        SqueakBundle {
            squeak: self.squeak.without_decryption_key(),
            header: self.header,
        }
    }

    pub fn hash(&self) -> SqueakHash {
        self.squeak.hash()
    }
}

fn address_for_pubkey(pubkey: &secp256k1::PublicKey, network: Network) -> String {
    bitcoin::Address::p2pkh(
        &bitcoin::PublicKey::new(*pubkey),
        network.to_bitcoin_network(),
    )
    .to_string()
}

/// Inclusive block-height range used to scope sync queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockRange {
    pub min_block: u32,
    pub max_block: u32,
}

impl BlockRange {
    pub fn new(min_block: u32, max_block: u32) -> Self {
        Self {
            min_block,
            max_block,
        }
    }

    pub fn contains(&self, block_height: u32) -> bool {
        block_height >= self.min_block && block_height <= self.max_block
    }
}

/// Filter describing which squeaks a subscriber wants pushed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InterestFilter {
    /// Author addresses of interest; empty means any author.
    pub addresses: Vec<String>,
    pub min_block: u32,
    pub max_block: u32,
}

impl InterestFilter {
    pub fn matches(&self, squeak: &Squeak) -> bool {
        squeak.block_height >= self.min_block
            && squeak.block_height <= self.max_block
            && (self.addresses.is_empty()
                || self
                    .addresses
                    .iter()
                    .any(|addr| addr == &squeak.author_address))
    }
}

/// Squeak projection served to the admin surface and display subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SqueakEntry {
    pub squeak_hash: SqueakHash,
    pub author_address: String,
    /// Name of the local profile for the author, if one exists.
    pub author_name: Option<String>,
    pub reply_to: Option<SqueakHash>,
    pub block_height: u32,
    pub time: u32,
    pub is_unlocked: bool,
    /// Present only when the squeak is unlocked.
    pub content: Option<String>,
    pub liked_time_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::rand::thread_rng;

    fn test_squeak(content: &str) -> (Squeak, DecryptionKey) {
        let key = SecretKey::new(&mut thread_rng());
        Squeak::make(
            &key,
            Network::Simnet,
            content,
            7,
            BlockHash::all_zeros(),
            None,
            1_600_000_000,
        )
        .unwrap()
    }

    #[test]
    fn made_squeak_verifies_and_decrypts() {
        let (squeak, key) = test_squeak("hello world");

        squeak.verify_signature(Network::Simnet).unwrap();
        assert!(squeak.is_unlocked());
        assert_eq!(squeak.decrypt_content(&key).unwrap(), "hello world");
    }

    #[test]
    fn empty_content_is_rejected() {
        let key = SecretKey::new(&mut thread_rng());
        let result = Squeak::make(
            &key,
            Network::Simnet,
            "",
            0,
            BlockHash::all_zeros(),
            None,
            0,
        );

        assert!(matches!(result, Err(SqueakError::EmptyContent)));
    }

    #[test]
    fn tampered_content_changes_hash_and_breaks_signature() {
        let (squeak, _) = test_squeak("original");
        let mut forged = squeak.clone();
        forged.encrypted_content[0] ^= 0xff;

        assert_ne!(squeak.hash(), forged.hash());
        assert!(forged.verify_signature(Network::Simnet).is_err());
    }

    #[test]
    fn wrong_key_fails_commitment_check() {
        let (mut squeak, _) = test_squeak("locked");
        squeak.decryption_key = None;

        let wrong = [0x42u8; DECRYPTION_KEY_SIZE];
        assert!(matches!(
            squeak.set_decryption_key(wrong),
            Err(SqueakError::KeyCommitmentMismatch)
        ));
        assert!(!squeak.is_unlocked());
    }

    #[test]
    fn wire_copy_carries_no_key() {
        let (squeak, _) = test_squeak("secret");
        let wire = squeak.without_decryption_key();

        assert!(!wire.is_unlocked());
        assert_eq!(wire.hash(), squeak.hash());
    }

    #[test]
    fn filter_matches_on_range_and_author() {
        let (squeak, _) = test_squeak("filtered");

        let any_author = InterestFilter {
            addresses: vec![],
            min_block: 0,
            max_block: 100,
        };
        assert!(any_author.matches(&squeak));

        let wrong_author = InterestFilter {
            addresses: vec!["nobody".into()],
            min_block: 0,
            max_block: 100,
        };
        assert!(!wrong_author.matches(&squeak));

        let out_of_range = InterestFilter {
            addresses: vec![],
            min_block: 8,
            max_block: 100,
        };
        assert!(!out_of_range.matches(&squeak));
    }
}
