#[cfg(feature = "consensus")]
use std::io::{self, Read};

#[cfg(feature = "consensus")]
use crate::consensus::{serialize_consensus, InventoryWrapper, StringVecWrapper};

use crate::offer::Offer;
use crate::squeak::{InterestFilter, SqueakBundle, SqueakHash};

#[cfg(feature = "consensus")]
use bitcoin::consensus::{
    encode::{self, CheckedData},
    Decodable, Encodable,
};

use bitcoin::network::{message::CommandString, message_network::VersionMessage, Address, Magic};

/// Hard cap on a single message payload. Anything larger is a protocol
/// violation and the peer is disconnected.
#[cfg(feature = "consensus")]
const MAX_MSG_SIZE: u64 = 32 * 1024 * 1024;

/// One advertised item: a typed hash.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Inventory {
    /// A squeak known by its header hash.
    Squeak(SqueakHash),
}

/// Raw message which is sent between peers.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RawNetworkMessage {
    pub magic: Magic,
    pub payload: NetworkMessage,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NetworkMessage {
    /// VERSION method. Opens the handshake.
    Version(VersionMessage),

    /// VERACK method. Acknowledges a received version.
    Verack,

    /// PING method. Contains a random nonce.
    Ping(u64),

    /// PONG method. Echoes the nonce received in PING.
    Pong(u64),

    /// GETADDR method.
    GetAddr,

    /// ADDR method. Contains known peer addresses.
    Addr(Vec<(u32, Address)>),

    /// INV method. Advertises squeak hashes this node carries.
    Inv(Vec<Inventory>),

    /// GETSQUEAKS method. Requests the squeaks behind the listed hashes.
    GetSqueaks(Vec<Inventory>),

    /// SQUEAK method. Delivers one squeak with its anchoring block header.
    Squeak(SqueakBundle),

    /// GETOFFER method. Requests an offer for the listed squeak.
    GetOffer(SqueakHash),

    /// OFFER method. Delivers an offer.
    Offer(Offer),

    /// SUBSCRIBE method. Registers an interest filter with the remote.
    Subscribe(InterestFilter),

    /// UNSUBSCRIBE method. Withdraws an interest filter.
    Unsubscribe(InterestFilter),

    /// Any other message.
    Unknown {
        /// The command of this message.
        command: CommandString,
        /// The payload of this message.
        payload: Vec<u8>,
    },
}

impl NetworkMessage {
    pub fn cmd(&self) -> &'static str {
        match *self {
            NetworkMessage::Version(_) => "version",
            NetworkMessage::Verack => "verack",
            NetworkMessage::Ping(_) => "ping",
            NetworkMessage::Pong(_) => "pong",
            NetworkMessage::GetAddr => "getaddr",
            NetworkMessage::Addr(_) => "addr",
            NetworkMessage::Inv(_) => "inv",
            NetworkMessage::GetSqueaks(_) => "getsqueaks",
            NetworkMessage::Squeak(_) => "squeak",
            NetworkMessage::GetOffer(_) => "getoffer",
            NetworkMessage::Offer(_) => "offer",
            NetworkMessage::Subscribe(_) => "subscribe",
            NetworkMessage::Unsubscribe(_) => "unsubscribe",

            _ => "unknown",
        }
    }

    /// Return the CommandString for the message command.
    pub fn command(&self) -> CommandString {
        CommandString::try_from_static(self.cmd()).expect("cmd returns valid commands")
    }
}

impl RawNetworkMessage {
    /// Return the CommandString for the message command.
    pub fn command(&self) -> CommandString {
        self.payload.command()
    }
}

#[cfg(feature = "consensus")]
impl Encodable for RawNetworkMessage {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;
        len += self.magic.consensus_encode(w)?;
        len += self.command().consensus_encode(w)?;
        len += CheckedData(match self.payload {
            NetworkMessage::Version(ref dat) => serialize_consensus(dat),
            NetworkMessage::Ping(ref dat) => serialize_consensus(dat),
            NetworkMessage::Pong(ref dat) => serialize_consensus(dat),
            NetworkMessage::Addr(ref dat) => serialize_consensus(dat),
            NetworkMessage::Inv(ref dat) => serialize_consensus(&InventoryWrapper(dat.to_vec())),
            NetworkMessage::GetSqueaks(ref dat) => {
                serialize_consensus(&InventoryWrapper(dat.to_vec()))
            }
            NetworkMessage::Squeak(ref dat) => serialize_consensus(dat),
            NetworkMessage::GetOffer(ref dat) => serialize_consensus(dat),
            NetworkMessage::Offer(ref dat) => serialize_consensus(dat),
            NetworkMessage::Subscribe(ref dat) => serialize_consensus(dat),
            NetworkMessage::Unsubscribe(ref dat) => serialize_consensus(dat),
            NetworkMessage::Verack | NetworkMessage::GetAddr => vec![],
            NetworkMessage::Unknown {
                payload: ref dat, ..
            } => dat.clone(),
        })
        .consensus_encode(w)?;
        Ok(len)
    }
}

#[cfg(feature = "consensus")]
impl Decodable for RawNetworkMessage {
    fn consensus_decode_from_finite_reader<R: io::Read + ?Sized>(
        r: &mut R,
    ) -> Result<Self, encode::Error> {
        let magic = Decodable::consensus_decode(r)?;
        let cmd = CommandString::consensus_decode(r)?;
        let raw_payload = CheckedData::consensus_decode(r)?.0;

        let mut mem_d = io::Cursor::new(raw_payload);

        let payload = match &cmd.to_string()[..] {
            "version" => NetworkMessage::Version(Decodable::consensus_decode(&mut mem_d)?),
            "verack" => NetworkMessage::Verack,
            "ping" => NetworkMessage::Ping(Decodable::consensus_decode(&mut mem_d)?),
            "pong" => NetworkMessage::Pong(Decodable::consensus_decode(&mut mem_d)?),
            "getaddr" => NetworkMessage::GetAddr,
            "addr" => NetworkMessage::Addr(Decodable::consensus_decode(&mut mem_d)?),
            "inv" => NetworkMessage::Inv(InventoryWrapper::consensus_decode(&mut mem_d)?.0),
            "getsqueaks" => {
                NetworkMessage::GetSqueaks(InventoryWrapper::consensus_decode(&mut mem_d)?.0)
            }
            "squeak" => NetworkMessage::Squeak(Decodable::consensus_decode(&mut mem_d)?),
            "getoffer" => NetworkMessage::GetOffer(Decodable::consensus_decode(&mut mem_d)?),
            "offer" => NetworkMessage::Offer(Decodable::consensus_decode(&mut mem_d)?),
            "subscribe" => NetworkMessage::Subscribe(Decodable::consensus_decode(&mut mem_d)?),
            "unsubscribe" => NetworkMessage::Unsubscribe(Decodable::consensus_decode(&mut mem_d)?),
            _ => NetworkMessage::Unknown {
                command: cmd,
                payload: mem_d.into_inner(),
            },
        };
        Ok(RawNetworkMessage { magic, payload })
    }

    #[inline]
    fn consensus_decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Self::consensus_decode_from_finite_reader(r.take(MAX_MSG_SIZE).by_ref())
    }
}

#[cfg(feature = "consensus")]
impl Encodable for InterestFilter {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;
        len += StringVecWrapper(self.addresses.clone()).consensus_encode(w)?;
        len += self.min_block.consensus_encode(w)?;
        len += self.max_block.consensus_encode(w)?;
        Ok(len)
    }
}

#[cfg(feature = "consensus")]
impl Decodable for InterestFilter {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(InterestFilter {
            addresses: StringVecWrapper::consensus_decode(r)?.0,
            min_block: Decodable::consensus_decode(r)?,
            max_block: Decodable::consensus_decode(r)?,
        })
    }
}

#[cfg(all(test, feature = "consensus"))]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::squeak::Squeak;
    use bitcoin::block::{Header as BlockHeader, Version as BlockVersion};
    use bitcoin::consensus::{deserialize, serialize};
    use bitcoin::hashes::Hash;
    use bitcoin::network::constants::ServiceFlags;
    use bitcoin::hash_types::TxMerkleNode;
    use bitcoin::{BlockHash, CompactTarget};

    fn roundtrip(payload: NetworkMessage) {
        let msg = RawNetworkMessage {
            magic: Network::Simnet.magic(),
            payload,
        };

        let bytes = serialize(&msg);
        let decoded: RawNetworkMessage = deserialize(&bytes).expect("message must decode");

        assert_eq!(decoded, msg);
        assert_eq!(serialize(&decoded), bytes);
    }

    fn test_bundle() -> SqueakBundle {
        let squeak = Squeak {
            version: 1,
            author_address: "mfWxJ45yp2SFn7UciZyNpvDKrzbhyfKrY8".into(),
            block_height: 7,
            block_hash: BlockHash::all_zeros(),
            reply_to: Some(SqueakHash::from_byte_array([9u8; 32])),
            data_key: [4u8; 32],
            iv: [5u8; 12],
            time: 1_600_000_000,
            nonce: 77,
            encrypted_content: vec![1, 2, 3, 4],
            signature: vec![6u8; 65],
            decryption_key: None,
        };
        let header = BlockHeader {
            version: BlockVersion::from_consensus(4),
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_600_000_000,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: 0,
        };

        SqueakBundle::new(squeak, header)
    }

    #[test]
    fn all_message_kinds_roundtrip() {
        let hash = SqueakHash::from_byte_array([3u8; 32]);
        let sockaddr = "127.0.0.1:18666".parse().unwrap();

        roundtrip(NetworkMessage::Version(VersionMessage {
            version: 70002,
            services: ServiceFlags::NONE,
            timestamp: 1_600_000_000,
            receiver: Address::new(&sockaddr, ServiceFlags::NONE),
            sender: Address::new(&sockaddr, ServiceFlags::NONE),
            nonce: 42,
            user_agent: "/squeaknode:0.1.0/".into(),
            start_height: 0,
            relay: true,
        }));
        roundtrip(NetworkMessage::Verack);
        roundtrip(NetworkMessage::GetAddr);
        roundtrip(NetworkMessage::Ping(0xdeadbeef));
        roundtrip(NetworkMessage::Pong(0xdeadbeef));
        roundtrip(NetworkMessage::Addr(vec![(
            1234,
            Address::new(&sockaddr, ServiceFlags::NONE),
        )]));
        roundtrip(NetworkMessage::Inv(vec![Inventory::Squeak(hash)]));
        roundtrip(NetworkMessage::GetSqueaks(vec![Inventory::Squeak(hash)]));
        roundtrip(NetworkMessage::Squeak(test_bundle()));
        roundtrip(NetworkMessage::GetOffer(hash));
        roundtrip(NetworkMessage::Offer(Offer {
            squeak_hash: hash,
            price_msat: 33_000,
            payment_request: "lnsb330u1pexample".into(),
            host: "seller.example.com".into(),
            port: 9735,
            node_pubkey: "03abcdef".into(),
            expiry: 3600,
            invoice_timestamp: 1_600_000_000,
        }));
        roundtrip(NetworkMessage::Subscribe(InterestFilter {
            addresses: vec!["mfWxJ45yp2SFn7UciZyNpvDKrzbhyfKrY8".into()],
            min_block: 10,
            max_block: 20,
        }));
        roundtrip(NetworkMessage::Unsubscribe(InterestFilter {
            addresses: vec![],
            min_block: 0,
            max_block: u32::MAX,
        }));
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let msg = RawNetworkMessage {
            magic: Network::Simnet.magic(),
            payload: NetworkMessage::Ping(1),
        };

        let mut bytes = serialize(&msg);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        assert!(deserialize::<RawNetworkMessage>(&bytes).is_err());
    }

    #[test]
    fn unknown_command_is_preserved() {
        let msg = RawNetworkMessage {
            magic: Network::Mainnet.magic(),
            payload: NetworkMessage::Unknown {
                command: CommandString::try_from_static("sendheaders").unwrap(),
                payload: vec![1, 2, 3],
            },
        };

        let bytes = serialize(&msg);
        let decoded: RawNetworkMessage = deserialize(&bytes).unwrap();

        assert_eq!(decoded, msg);
    }
}
