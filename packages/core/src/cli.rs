use std::path::PathBuf;

use clap::Parser;

/// Order relay CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "order-relay",
    version,
    about = "Relays freelance orders from Telegram channels, VK groups and HH.ru to subscribers"
)]
pub struct Cli {
    /// SQLite database URL (e.g. sqlite://order-relay.db)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Path to the JSON rule file
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Seconds to sleep between cycles
    #[arg(long)]
    pub cycle_interval: Option<u64>,

    /// Log filter used when RUST_LOG is not set (e.g. debug)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Print delivery statistics and exit
    #[arg(long, conflicts_with = "once")]
    pub stats: bool,
}
