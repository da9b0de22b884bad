mod args;

use std::process::ExitCode;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn, Level};

use slamd_client::config::{self, ClientConfig};
use slamd_client::plugin::{Catalog, NoopJob};
use slamd_client::session;

use crate::args::Args;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();
    } else if args.quiet {
        tracing_subscriber::fmt().with_max_level(Level::WARN).init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let mut cfg: ClientConfig = match config::load(args.config.as_deref()) {
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

    let mut catalog = Catalog::new();
    catalog.register("Noop", || Box::new(NoopJob::new()));

    match session::run(cfg, catalog, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "encountered runtime error");
            ExitCode::FAILURE
        }
    }
}

fn apply_overrides(cfg: &mut ClientConfig, args: &Args) {
    if let Some(v) = &args.server_address {
        cfg.server_address = v.clone();
    }
    if let Some(v) = args.client_port {
        cfg.client_port = v;
    }
    if let Some(v) = args.stat_port {
        cfg.stat_port = v;
    }
    if args.no_real_time_stats {
        cfg.enable_real_time_stats = false;
    }
    if args.persist_statistics {
        cfg.persist_statistics = true;
    }
    if args.use_ssl {
        cfg.use_ssl = true;
    }
    if args.blind_trust {
        cfg.blind_trust = true;
    }
    if args.restricted_mode {
        cfg.restricted_mode = true;
    }
    if args.verbose {
        cfg.verbose = true;
    }
    if args.quiet {
        cfg.quiet = true;
    }
}
