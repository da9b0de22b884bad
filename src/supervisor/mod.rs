//! The client supervisor: a separate daemon holding one
//! control connection to the server's manager port, spawning and reaping
//! worker processes on directive.
//!
//! Mirrors the `accept_loop`/`do_client_loop` split in spirit: one
//! task owns the control connection and reacts to inbound directives in a
//! `tokio::select!` loop, same as [`crate::session::run`] — but here there's
//! a single outbound connection instead of many inbound ones, and the
//! "jobs" it starts are whole child processes rather than threads.

pub mod worker;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::sink::SinkExt;
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ManagerConfig;
use crate::session::state::Session;
use crate::supervisor::worker::Worker;
use crate::wire::message::{Message, ResponseCode};
use crate::wire::{self, decoder};

const LIVENESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

type FramedManager = tokio_util::codec::Framed<TcpStream, wire::Codec>;

/// Runs the supervisor until `cancel` fires, reconnecting with a fixed
/// back-off on transport failure when `config.auto_reconnect` is set.
#[instrument(name = "supervisor", skip_all, fields(server = %config.server_address))]
pub async fn run(config: ManagerConfig, cancel: CancellationToken) -> Result<()> {
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            outcome = run_one_connection(&config, &cancel) => outcome,
        };

        match outcome {
            Ok(()) => return Ok(()),
            Err(e) if config.auto_reconnect && !cancel.is_cancelled() => {
                warn!(error = %e, backoff_secs = config.reconnect_backoff_secs, "supervisor connection lost, reconnecting");
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_secs(config.reconnect_backoff_secs)) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

async fn run_one_connection(config: &ManagerConfig, cancel: &CancellationToken) -> Result<()> {
    let addr = (config.server_address.as_str(), config.manager_port);
    let tcp = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to manager port {}:{}", config.server_address, config.manager_port))?;
    tcp.set_nodelay(true).ok();
    let local_port = tcp.local_addr().map(|a| a.port()).unwrap_or(0);
    let mut framed = wire::framed(tcp);

    let manager_id = Session::derive_client_id(local_port);
    let next_message_id = AtomicU64::new(0);
    let hello_id = next_message_id.fetch_add(2, Ordering::SeqCst);
    framed
        .send((
            hello_id,
            Message::ManagerHello {
                manager_id: manager_id.clone(),
                max_clients: config.max_clients,
                auto_create_clients: config.auto_create_clients,
            },
        ))
        .await
        .context("sending ManagerHello")?;
    info!(manager_id = %manager_id, max_clients = config.max_clients, "supervisor connected");

    let mut workers: HashMap<String, Worker> = HashMap::new();
    for i in 0..config.auto_create_clients {
        let client_id = format!("{manager_id}-auto-{i}");
        spawn_worker(&mut workers, config, client_id);
    }

    let mut liveness = tokio::time::interval(LIVENESS_POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                reap_all(workers).await;
                return Ok(());
            }
            _ = liveness.tick() => {
                workers.retain(|_, w| w.is_alive());
            }
            next = framed.next() => {
                match next {
                    None => return Err(anyhow!("manager connection closed by server")),
                    Some(Err(decoder::Error::Decode(e))) => {
                        warn!(error = %e, "malformed supervisor message, continuing");
                        continue;
                    }
                    Some(Err(e)) => return Err(anyhow!("transport error: {e}")),
                    Some(Ok((message_id, msg))) => {
                        handle_message(&mut framed, config, &mut workers, message_id, msg).await?;
                    }
                }
            }
        }
    }
}

async fn handle_message(
    framed: &mut FramedManager,
    config: &ManagerConfig,
    workers: &mut HashMap<String, Worker>,
    message_id: u64,
    msg: Message,
) -> Result<()> {
    match msg {
        Message::CreateClient { client_id } => {
            let response_code = if workers.len() >= config.max_clients as usize {
                warn!(client_id = %client_id, max_clients = config.max_clients, "rejecting CreateClient: at capacity");
                ResponseCode::JobRequestRefused
            } else {
                spawn_worker(workers, config, client_id.clone());
                ResponseCode::Success
            };
            framed
                .send((message_id, Message::CreateClientResponse { client_id, response_code }))
                .await?;
        }
        Message::DestroyClient { client_id } => {
            let response_code = if let Some(worker) = workers.remove(&client_id) {
                worker.stop().await;
                ResponseCode::Success
            } else {
                ResponseCode::NoSuchJob
            };
            framed
                .send((message_id, Message::DestroyClientResponse { client_id, response_code }))
                .await?;
        }
        Message::KeepAlive => debug!("keep-alive"),
        other => debug!(?other, "unhandled supervisor message variant"),
    }
    Ok(())
}

fn spawn_worker(workers: &mut HashMap<String, Worker>, config: &ManagerConfig, client_id: String) {
    match Worker::spawn(&config.start_command, client_id.clone()) {
        Ok(worker) => {
            workers.insert(client_id, worker);
        }
        Err(e) => warn!(client_id = %client_id, error = %e, "failed to spawn worker process"),
    }
}

async fn reap_all(workers: HashMap<String, Worker>) {
    for (_, worker) in workers {
        worker.stop().await;
    }
}
