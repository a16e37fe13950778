//! Consensus (wire) encoding of squeak-domain types, built on the encoding
//! traits of the `bitcoin` crate.
use std::io;

use bitcoin::consensus::encode::Error as EncodeError;
use bitcoin::consensus::{encode, Decodable, Encodable};
use bitcoin::hashes::Hash;

use crate::offer::Offer;
use crate::squeak::{Squeak, SqueakBundle, SqueakHash};

#[cfg(feature = "messages")]
use crate::messages::p2p::Inventory;

/// Inventory type tag for a squeak hash.
#[cfg(feature = "messages")]
const INVENTORY_SQUEAK_FLAG: u32 = 1;

pub(crate) fn serialize_consensus<T: Encodable + ?Sized>(data: &T) -> Vec<u8> {
    let mut encoder = Vec::new();
    let len = data
        .consensus_encode(&mut encoder)
        .expect("in-memory writers don't error");
    debug_assert_eq!(len, encoder.len());
    encoder
}

pub(crate) struct OptionWrapper<T>(pub Option<T>);

impl<T> Encodable for OptionWrapper<T>
where
    T: Encodable,
{
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = 1;

        match &self.0 {
            Some(value) => {
                1u8.consensus_encode(writer)?;
                len += value.consensus_encode(writer)?
            }
            None => {
                0u8.consensus_encode(writer)?;
            }
        }

        Ok(len)
    }
}

impl<T> Decodable for OptionWrapper<T>
where
    T: Decodable,
{
    fn consensus_decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeError> {
        let value: u8 = Decodable::consensus_decode(reader)?;

        match value {
            0 => Ok(OptionWrapper(None)),
            _ => Ok(OptionWrapper(Some(T::consensus_decode(reader)?))),
        }
    }
}

pub(crate) struct StringVecWrapper(pub Vec<String>);

impl Encodable for StringVecWrapper {
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;

        len += (self.0.len() as u32).consensus_encode(writer)?;
        for item in &self.0 {
            len += item.consensus_encode(writer)?;
        }

        Ok(len)
    }
}

impl Decodable for StringVecWrapper {
    fn consensus_decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeError> {
        let len: u32 = Decodable::consensus_decode(reader)?;

        let mut items = Vec::new();
        for _ in 0..len {
            items.push(String::consensus_decode(reader)?);
        }

        Ok(StringVecWrapper(items))
    }
}

impl Encodable for SqueakHash {
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.to_raw_hash().consensus_encode(writer)
    }
}

impl Decodable for SqueakHash {
    fn consensus_decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeError> {
        Ok(SqueakHash::from_raw_hash(Decodable::consensus_decode(
            reader,
        )?))
    }
}

#[cfg(feature = "messages")]
impl Encodable for Inventory {
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            Inventory::Squeak(hash) => {
                let mut len = INVENTORY_SQUEAK_FLAG.consensus_encode(writer)?;
                len += hash.consensus_encode(writer)?;
                Ok(len)
            }
        }
    }
}

#[cfg(feature = "messages")]
impl Decodable for Inventory {
    fn consensus_decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeError> {
        let flag: u32 = Decodable::consensus_decode(reader)?;

        match flag {
            INVENTORY_SQUEAK_FLAG => Ok(Inventory::Squeak(Decodable::consensus_decode(reader)?)),
            _ => Err(encode::Error::ParseFailed("unknown inventory type")),
        }
    }
}

#[cfg(feature = "messages")]
pub(crate) struct InventoryWrapper(pub Vec<Inventory>);

#[cfg(feature = "messages")]
impl Encodable for InventoryWrapper {
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;

        len += (self.0.len() as u32).consensus_encode(writer)?;
        for inventory in &self.0 {
            len += inventory.consensus_encode(writer)?;
        }

        Ok(len)
    }
}

#[cfg(feature = "messages")]
impl Decodable for InventoryWrapper {
    fn consensus_decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeError> {
        let len: u32 = Decodable::consensus_decode(reader)?;

        let mut inventories = Vec::new();
        for _ in 0..len {
            inventories.push(Inventory::consensus_decode(reader)?);
        }

        Ok(InventoryWrapper(inventories))
    }
}

/// Wire encoding of a squeak. The local decryption key is deliberately not
/// part of the encoding.
impl Encodable for Squeak {
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;

        len += self.version.consensus_encode(writer)?;
        len += self.author_address.consensus_encode(writer)?;
        len += self.block_height.consensus_encode(writer)?;
        len += self.block_hash.consensus_encode(writer)?;
        len += OptionWrapper(self.reply_to).consensus_encode(writer)?;
        len += self.data_key.consensus_encode(writer)?;
        len += self.iv.consensus_encode(writer)?;
        len += self.time.consensus_encode(writer)?;
        len += self.nonce.consensus_encode(writer)?;
        len += self.encrypted_content.consensus_encode(writer)?;
        len += self.signature.consensus_encode(writer)?;

        Ok(len)
    }
}

impl Decodable for Squeak {
    fn consensus_decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeError> {
        Ok(Squeak {
            version: Decodable::consensus_decode(reader)?,
            author_address: Decodable::consensus_decode(reader)?,
            block_height: Decodable::consensus_decode(reader)?,
            block_hash: Decodable::consensus_decode(reader)?,
            reply_to: OptionWrapper::consensus_decode(reader)?.0,
            data_key: Decodable::consensus_decode(reader)?,
            iv: Decodable::consensus_decode(reader)?,
            time: Decodable::consensus_decode(reader)?,
            nonce: Decodable::consensus_decode(reader)?,
            encrypted_content: Decodable::consensus_decode(reader)?,
            signature: Decodable::consensus_decode(reader)?,
            decryption_key: None,
        })
    }
}

impl Encodable for SqueakBundle {
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;

        len += self.squeak.consensus_encode(writer)?;
        len += self.header.consensus_encode(writer)?;

        Ok(len)
    }
}

impl Decodable for SqueakBundle {
    fn consensus_decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeError> {
        Ok(SqueakBundle {
            squeak: Decodable::consensus_decode(reader)?,
            header: Decodable::consensus_decode(reader)?,
        })
    }
}

impl Encodable for Offer {
    fn consensus_encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;

        len += self.squeak_hash.consensus_encode(writer)?;
        len += self.price_msat.consensus_encode(writer)?;
        len += self.payment_request.consensus_encode(writer)?;
        len += self.host.consensus_encode(writer)?;
        len += self.port.consensus_encode(writer)?;
        len += self.node_pubkey.consensus_encode(writer)?;
        len += self.expiry.consensus_encode(writer)?;
        len += self.invoice_timestamp.consensus_encode(writer)?;

        Ok(len)
    }
}

impl Decodable for Offer {
    fn consensus_decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeError> {
        Ok(Offer {
            squeak_hash: Decodable::consensus_decode(reader)?,
            price_msat: Decodable::consensus_decode(reader)?,
            payment_request: Decodable::consensus_decode(reader)?,
            host: Decodable::consensus_decode(reader)?,
            port: Decodable::consensus_decode(reader)?,
            node_pubkey: Decodable::consensus_decode(reader)?,
            expiry: Decodable::consensus_decode(reader)?,
            invoice_timestamp: Decodable::consensus_decode(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use bitcoin::consensus::{deserialize, serialize};
    use bitcoin::secp256k1::{rand::thread_rng, SecretKey};
    use bitcoin::BlockHash;

    #[test]
    fn squeak_roundtrips_without_its_key() {
        let signing_key = SecretKey::new(&mut thread_rng());
        let (squeak, _) = Squeak::make(
            &signing_key,
            Network::Simnet,
            "wire format test",
            42,
            BlockHash::all_zeros(),
            Some(SqueakHash::from_byte_array([9u8; 32])),
            1_600_000_000,
        )
        .unwrap();

        let bytes = serialize(&squeak);
        let decoded: Squeak = deserialize(&bytes).unwrap();

        assert_eq!(decoded, squeak.without_decryption_key());
        assert_eq!(decoded.hash(), squeak.hash());
        decoded.verify_signature(Network::Simnet).unwrap();
    }

    #[test]
    fn offer_roundtrips() {
        let offer = Offer {
            squeak_hash: SqueakHash::from_byte_array([7u8; 32]),
            price_msat: 33_000,
            payment_request: "lnsb330u1p...".into(),
            host: "seller.example.com".into(),
            port: 9735,
            node_pubkey: "03abcdef".into(),
            expiry: 3600,
            invoice_timestamp: 1_600_000_000,
        };

        let bytes = serialize(&offer);
        let decoded: Offer = deserialize(&bytes).unwrap();

        assert_eq!(decoded, offer);
    }
}
