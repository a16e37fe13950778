use serde::Deserialize;

#[derive(Deserialize, Clone)]
pub struct LightningConfig {
    /// Which backend to use. Only `lnd-rest` is currently understood.
    #[serde(default = "default_backend")]
    pub backend: String,

    pub lnd: LndConfig,
}

fn default_backend() -> String {
    "lnd-rest".to_owned()
}

#[derive(Deserialize, Clone)]
pub struct LndConfig {
    /// Base URL of the LND REST endpoint, eg. `https://localhost:8080`.
    pub rest_url: String,

    /// Hex-encoded admin macaroon.
    pub macaroon_hex: String,

    /// Request timeout, seconds.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
}

fn default_timeout_s() -> u64 {
    30
}
