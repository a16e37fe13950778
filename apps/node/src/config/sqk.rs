use serde::Deserialize;

/// Default price of a decryption key, millisatoshi.
const DEFAULT_PRICE_MSAT: u64 = 10_000;

#[derive(Deserialize, Clone)]
pub struct SqkConfig {
    /// Price of a decryption key unless a profile overrides it. `0` disables
    /// selling.
    #[serde(default = "default_price_msat")]
    pub price_msat: u64,
}

fn default_price_msat() -> u64 {
    DEFAULT_PRICE_MSAT
}

impl Default for SqkConfig {
    fn default() -> Self {
        Self {
            price_msat: default_price_msat(),
        }
    }
}
