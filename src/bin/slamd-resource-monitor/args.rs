use std::path::PathBuf;

use clap::Parser;

/// CLI overrides for `ClientConfig`, reused as-is since the resource
/// monitor speaks the same
/// session protocol as the regular client.
#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Path to a `key = value` configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Address of the SLAMD server.
    #[arg(long)]
    pub server_address: Option<String>,
    /// Resource-monitor control port on the server.
    #[arg(long, default_value_t = 3002)]
    pub client_port: u16,
    /// Enables human-friendly, verbose logging.
    #[arg(short, long, default_value_t)]
    pub verbose: bool,
}
