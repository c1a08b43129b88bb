//! Command-line interface.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "watchtower-server", version, about = "Profile presence monitor daemon")]
pub struct Cli {
    /// Address to bind the control API on.
    #[arg(long, env = "WATCHTOWER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port for the control API.
    #[arg(long, env = "WATCHTOWER_PORT", default_value_t = 8070)]
    pub port: u16,

    /// Path to the JSON configuration file.
    #[arg(long, env = "WATCHTOWER_CONFIG", default_value = "watchtower.json")]
    pub config: PathBuf,

    /// Path to the sqlite event database.
    #[arg(long, env = "WATCHTOWER_DB", default_value = "watchtower.db")]
    pub db: PathBuf,

    /// Keep all state in memory; nothing touches disk.
    #[arg(long)]
    pub ephemeral: bool,
}
