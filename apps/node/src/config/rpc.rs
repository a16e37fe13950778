use serde::Deserialize;

#[derive(Deserialize, Clone)]
pub struct RpcConfig {
    /// Host the admin server listens on.
    pub host: String,

    /// Port the admin server listens on.
    pub port: u16,

    /// Maximum request size in kilobytes.
    #[serde(default = "default_max_request_size_kb")]
    pub max_request_size_kb: u32,
}

fn default_max_request_size_kb() -> u32 {
    20480
}
