pub use clap::Parser;

use std::path::PathBuf;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "webrtc-live")]
#[command(about = "Encrypted WebRTC signaling over a key-value ledger")]
pub struct Args {
    /// Ledger service to talk to (defaults to the configured ledger_url)
    #[arg(long, global = true)]
    pub remote: Option<Url>,

    /// Path to the config directory (defaults to ~/.webrtc-live)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
