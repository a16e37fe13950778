use serde::Deserialize;

#[derive(Deserialize, Clone)]
pub struct StorageConfig {
    /// Backend connection string. The bundled engine accepts `memory://`.
    #[serde(default = "default_connection_string")]
    pub connection_string: String,

    /// Attempts to open the store before the node gives up and exits.
    #[serde(default = "default_init_attempts")]
    pub init_attempts: u32,

    /// Seconds between open attempts.
    #[serde(default = "default_init_retry_secs")]
    pub init_retry_secs: u64,
}

fn default_connection_string() -> String {
    "memory://".to_owned()
}

fn default_init_attempts() -> u32 {
    5
}

fn default_init_retry_secs() -> u64 {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            connection_string: default_connection_string(),
            init_attempts: default_init_attempts(),
            init_retry_secs: default_init_retry_secs(),
        }
    }
}
