use std::path::PathBuf;

use clap::Parser;

/// CLI overrides for `ManagerConfig` (the supervisor additionally recognizes
/// maxClients, autoCreateClients, startCommand, and autoReconnect).
#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Path to a `key = value` configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Address of the SLAMD server.
    #[arg(long)]
    pub server_address: Option<String>,
    /// Supervisor control port on the server.
    #[arg(long)]
    pub manager_port: Option<u16>,
    /// Maximum number of worker processes this supervisor will run.
    #[arg(long)]
    pub max_clients: Option<u32>,
    /// Number of clients to spawn immediately on connect.
    #[arg(long)]
    pub auto_create_clients: Option<u32>,
    /// Command line used to start a worker process.
    #[arg(long)]
    pub start_command: Option<String>,
    /// Enables human-friendly, verbose logging.
    #[arg(short, long, default_value_t)]
    pub verbose: bool,
}
