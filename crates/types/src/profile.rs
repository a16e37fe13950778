use bitcoin::secp256k1::{rand::thread_rng, Secp256k1, SecretKey};

use crate::network::Network;

/// A named authorial identity.
///
/// A *signing* profile carries a private key and can author squeaks; a
/// *contact* profile is only an address we follow or price for.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Profile {
    /// Store-assigned identifier; `None` until inserted.
    pub profile_id: Option<u64>,
    pub name: String,
    pub address: String,
    pub private_key: Option<[u8; 32]>,
    pub following: bool,
    pub use_custom_price: bool,
    pub custom_price_msat: u64,
    pub image: Option<Vec<u8>>,
}

impl Profile {
    /// Create a signing profile with a freshly generated key.
    pub fn new_signing(name: impl Into<String>, network: Network) -> Self {
        let secret_key = SecretKey::new(&mut thread_rng());

        Self::import_signing(name, network, secret_key)
    }

    /// Create a signing profile from an existing key.
    pub fn import_signing(
        name: impl Into<String>,
        network: Network,
        secret_key: SecretKey,
    ) -> Self {
        let secp = Secp256k1::new();
        let address = bitcoin::Address::p2pkh(
            &bitcoin::PublicKey::new(secret_key.public_key(&secp)),
            network.to_bitcoin_network(),
        )
        .to_string();

        Self {
            profile_id: None,
            name: name.into(),
            address,
            private_key: Some(secret_key.secret_bytes()),
            following: true,
            use_custom_price: false,
            custom_price_msat: 0,
            image: None,
        }
    }

    /// Create a contact profile for a known address.
    pub fn new_contact(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            profile_id: None,
            name: name.into(),
            address: address.into(),
            private_key: None,
            following: false,
            use_custom_price: false,
            custom_price_msat: 0,
            image: None,
        }
    }

    pub fn is_signing(&self) -> bool {
        self.private_key.is_some()
    }

    /// The signing key, if this is a signing profile.
    pub fn signing_key(&self) -> Option<SecretKey> {
        self.private_key
            .as_ref()
            .and_then(|bytes| SecretKey::from_slice(bytes).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_profile_has_key_and_follows_itself() {
        let profile = Profile::new_signing("alice", Network::Simnet);

        assert!(profile.is_signing());
        assert!(profile.signing_key().is_some());
        assert!(profile.following);
    }

    #[test]
    fn contact_profile_has_no_key() {
        let profile = Profile::new_contact("bob", "mfWxJ45yp2SFn7UciZyNpvDKrzbhyfKrY8");

        assert!(!profile.is_signing());
        assert!(profile.signing_key().is_none());
    }

    #[test]
    fn imported_key_round_trips_to_same_address() {
        let secret_key = SecretKey::new(&mut thread_rng());
        let a = Profile::import_signing("a", Network::Mainnet, secret_key);
        let b = Profile::import_signing("b", Network::Mainnet, secret_key);

        assert_eq!(a.address, b.address);
    }
}
