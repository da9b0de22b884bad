use std::path::PathBuf;

use clap::Parser;

/// CLI overrides for `ClientConfig`.
/// Anything left `None` falls through to the config file, then to the
/// built-in default — the same precedence `ebeans` gives its own flags.
#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Path to a `key = value` configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Address of the SLAMD server.
    #[arg(long)]
    pub server_address: Option<String>,
    /// Job-control port on the server.
    #[arg(long)]
    pub client_port: Option<u16>,
    /// Real-time statistics port on the server.
    #[arg(long)]
    pub stat_port: Option<u16>,
    /// Disables the real-time stat reporter regardless of config.
    #[arg(long)]
    pub no_real_time_stats: bool,
    /// Enables writing periodic statistics snapshots to disk.
    #[arg(long)]
    pub persist_statistics: bool,
    /// Connect over TLS.
    #[arg(long)]
    pub use_ssl: bool,
    /// Accept any server certificate when `use_ssl` is set.
    #[arg(long)]
    pub blind_trust: bool,
    /// Reject job requests while one is already running.
    #[arg(long)]
    pub restricted_mode: bool,
    /// Enables human-friendly, verbose logging.
    #[arg(short, long, default_value_t)]
    pub verbose: bool,
    /// Suppresses all but warning/error logging.
    #[arg(short, long, default_value_t)]
    pub quiet: bool,
}
