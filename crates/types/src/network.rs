use core::{fmt::Display, str::FromStr};

use bitcoin::network::Magic;
use bitcoin::Network as BitcoinNetwork;

/// Mainnet wire magic.
const MAINNET_MAGIC: [u8; 4] = [0xA9, 0xC5, 0xE2, 0x8B];
/// Testnet wire magic.
const TESTNET_MAGIC: [u8; 4] = [0xB4, 0xD1, 0x07, 0x3E];
/// Simnet wire magic.
const SIMNET_MAGIC: [u8; 4] = [0xC6, 0x42, 0x9A, 0xF1];

/// Default peer port on mainnet.
const MAINNET_PORT: u16 = 8555;
/// Default peer port on testnet.
const TESTNET_PORT: u16 = 18555;
/// Default peer port on simnet.
const SIMNET_PORT: u16 = 18666;

/// Squeak network types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Network {
    Mainnet,
    Testnet,
    Simnet,
}

impl Network {
    /// Wire magic prefixing every message on this network.
    pub fn magic(&self) -> Magic {
        match self {
            Network::Mainnet => Magic::from_bytes(MAINNET_MAGIC),
            Network::Testnet => Magic::from_bytes(TESTNET_MAGIC),
            Network::Simnet => Magic::from_bytes(SIMNET_MAGIC),
        }
    }

    /// Default listen port for peers on this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Network::Mainnet => MAINNET_PORT,
            Network::Testnet => TESTNET_PORT,
            Network::Simnet => SIMNET_PORT,
        }
    }

    /// The Bitcoin network whose address encoding author addresses use.
    pub fn to_bitcoin_network(&self) -> BitcoinNetwork {
        match self {
            Network::Mainnet => BitcoinNetwork::Bitcoin,
            Network::Testnet => BitcoinNetwork::Testnet,
            Network::Simnet => BitcoinNetwork::Regtest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Simnet => "simnet",
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "simnet" => Ok(Network::Simnet),
            other => Err(UnknownNetworkError(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetworkError(String);

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Network {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        Network::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magics_are_distinct() {
        assert_ne!(Network::Mainnet.magic(), Network::Testnet.magic());
        assert_ne!(Network::Testnet.magic(), Network::Simnet.magic());
    }

    #[test]
    fn parses_case_insensitive() {
        assert_eq!(Network::from_str("MainNet").unwrap(), Network::Mainnet);
        assert!(Network::from_str("signet").is_err());
    }
}
