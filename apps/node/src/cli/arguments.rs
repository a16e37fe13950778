use std::path::PathBuf;

use clap::Args;

#[derive(Args)]
pub struct Run {
    /// Path to the node's TOML configuration file.
    #[clap(short, long, default_value = "sqkd.toml")]
    pub config: PathBuf,
}
