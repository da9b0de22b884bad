mod args;

use std::process::ExitCode;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn, Level};

use slamd_client::config::{self, ManagerConfig};
use slamd_client::supervisor;

use crate::args::Args;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let mut cfg: ManagerConfig = match config::load(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(error) => {
            error!(%error, "failed to load configuration");
            return ExitCode::from(2);
        }
    };
    apply_overrides(&mut cfg, &args);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            }
            cancel.cancel();
        });
    }

    match supervisor::run(cfg, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "encountered runtime error");
            ExitCode::FAILURE
        }
    }
}

fn apply_overrides(cfg: &mut ManagerConfig, args: &Args) {
    if let Some(v) = &args.server_address {
        cfg.server_address = v.clone();
    }
    if let Some(v) = args.manager_port {
        cfg.manager_port = v;
    }
    if let Some(v) = args.max_clients {
        cfg.max_clients = v;
    }
    if let Some(v) = args.auto_create_clients {
        cfg.auto_create_clients = v;
    }
    if let Some(v) = &args.start_command {
        cfg.start_command = v.clone();
    }
}
