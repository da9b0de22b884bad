//! The session controller: owns the server connection, performs the
//! hello handshake, and dispatches inbound messages.
//!
//! Modeled directly on `do_client_loop` in
//! `bin/ebeans/main.rs`: a `tokio::select!` loop reading framed messages
//! and reacting to a `CancellationToken`, with the same
//! connect/log/dispatch shape — outbound here instead of accepted inbound.

pub mod state;
pub mod tls;

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::sink::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::job::runtime::{JobRuntime, StartError};
use crate::job::state::Job;
use crate::plugin::Catalog;
use crate::session::state::{Session, SessionState};
use crate::stats::{self, ReporterHandle};
use crate::wire::message::{
    ClientStateValue, JobControlOp, Message, ResponseCode, ABSENT_I64,
};
use crate::wire::{self, decoder};

const HANDSHAKE_BUDGET: Duration = Duration::from_secs(5);
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// The boxed transport a session speaks the wire protocol over: either a
/// plain TCP stream, or one wrapped in TLS.
pub enum Transport {
    Tcp(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

async fn connect(config: &ClientConfig) -> Result<Transport> {
    let addr = (config.server_address.as_str(), config.client_port);
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(ClientError::Transport)
        .with_context(|| format!("connecting to {}:{}", config.server_address, config.client_port))?;
    tcp.set_nodelay(true)
        .map_err(ClientError::Transport)
        .context("setting NODELAY")?;

    if !config.use_ssl {
        return Ok(Transport::Tcp(tcp));
    }
    if !config.blind_trust {
        return Err(anyhow!(
            "use_ssl is set without blind_trust; a verified trust-store path is not yet implemented"
        ));
    }
    let connector = tls::blind_trust_connector();
    let server_name = rustls_pki_types::ServerName::try_from(config.server_address.clone())
        .map_err(|e| anyhow!("invalid server name for TLS: {e}"))?;
    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(ClientError::Transport)
        .context("TLS handshake failed")?;
    Ok(Transport::Tls(Box::new(tls)))
}

/// Runs one session end to end: connect, handshake, dispatch loop, until
/// cancelled or a fatal transport error.
#[instrument(name = "session", skip_all, fields(server = %config.server_address))]
pub async fn run(config: ClientConfig, catalog: Catalog, cancel: CancellationToken) -> Result<()> {
    let transport = connect(&config).await?;
    let local_port = match &transport {
        Transport::Tcp(s) => s.local_addr().map(|a| a.port()).unwrap_or(0),
        Transport::Tls(s) => s.get_ref().0.local_addr().map(|a| a.port()).unwrap_or(0),
    };
    let mut framed = wire::framed(transport);

    let client_id = Session::derive_client_id(local_port);
    let session = Session::new(client_id.clone(), config.restricted_mode);
    session.set_state(SessionState::NotConnected);

    let hello = Message::ClientHello {
        client_id: client_id.clone(),
        software_version: env!("CARGO_PKG_VERSION").to_string(),
        auth_type: config.auth_type as i64,
        auth_id: config.auth_id.clone(),
        auth_credentials: config.auth_credentials.as_bytes().to_vec(),
        restricted_mode: config.restricted_mode,
        supports_time_sync: true,
    };
    let hello_id = session.next_message_id();
    framed
        .send((hello_id, hello))
        .await
        .context("sending ClientHello")?;

    let mut session = session;
    match timeout(HANDSHAKE_BUDGET, framed.next()).await {
        Ok(Some(Ok((_, Message::HelloResponse { response_code, server_time_ms, .. })))) => {
            if response_code != ResponseCode::Success {
                return Err(anyhow!("server rejected ClientHello: {response_code:?}"));
            }
            if server_time_ms > 0 {
                session.server_time_offset_ms = server_time_ms - now_ms();
                if session.server_time_offset_ms.abs() > 2000 {
                    warn!(offset_ms = session.server_time_offset_ms, "large clock skew detected");
                }
            }
        }
        Ok(Some(Ok((_, other)))) => {
            return Err(anyhow!("expected HelloResponse, got {other:?}"));
        }
        Ok(Some(Err(e))) => return Err(ClientError::Decode(e).into()),
        Ok(None) => return Err(anyhow!("server closed connection during handshake")),
        Err(_) => return Err(anyhow!("handshake timed out after {HANDSHAKE_BUDGET:?}")),
    }
    session.set_state(SessionState::Idle);
    info!(client_id = %client_id, "session established");

    let mut current_job: Option<std::sync::Arc<JobRuntime>> = None;
    let mut current_reporter: Option<ReporterHandle> = None;
    let mut job_reported_done = true;
    let mut ticker = tokio::time::interval(STATUS_POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                graceful_shutdown(&mut framed, &session, &mut current_job, &mut current_reporter).await?;
                break;
            }
            _ = ticker.tick() => {
                if let Some(job) = &current_job {
                    if !job_reported_done && job.state().is_terminal() {
                        current_reporter.take();
                        stats::persistence::deregister();
                        send_job_completed(&mut framed, &session, job).await?;
                        job_reported_done = true;
                        session.set_state(SessionState::Idle);
                        current_job = None;
                    }
                }
            }
            next = framed.next() => {
                match next {
                    None => {
                        debug!("server closed connection");
                        break;
                    }
                    Some(Err(e @ decoder::Error::Decode(_))) => {
                        let error = ClientError::Decode(e);
                        warn!(error = %error, "malformed message, continuing");
                        continue;
                    }
                    Some(Err(e)) => return Err(ClientError::Decode(e).into()),
                    Some(Ok((message_id, msg))) => {
                        handle_message(
                            &mut framed,
                            &session,
                            &config,
                            &catalog,
                            &mut current_job,
                            &mut current_reporter,
                            &mut job_reported_done,
                            message_id,
                            msg,
                        )
                        .await?;
                    }
                }
            }
        }
    }

    Ok(())
}

type FramedTransport = tokio_util::codec::Framed<Transport, wire::Codec>;

#[allow(clippy::too_many_arguments)]
async fn handle_message(
    framed: &mut FramedTransport,
    session: &Session,
    config: &ClientConfig,
    catalog: &Catalog,
    current_job: &mut Option<std::sync::Arc<JobRuntime>>,
    current_reporter: &mut Option<ReporterHandle>,
    job_reported_done: &mut bool,
    message_id: u64,
    msg: Message,
) -> Result<()> {
    match msg {
        Message::JobRequest { .. } => {
            let (resp, maybe_probe) = handle_job_request(session, catalog, current_job, job_reported_done, msg);
            framed.send((message_id, resp)).await?;
            if let Some(probe) = maybe_probe {
                let probe_id = session.next_message_id();
                framed.send((probe_id, probe)).await?;
            }
        }
        Message::JobControlRequest { job_id, op } => {
            let resp = handle_job_control(session, config, current_job, current_reporter, job_id, op).await;
            framed.send((message_id, resp)).await?;
        }
        Message::StatusRequest { job_id } => {
            let resp = build_status_response(session, current_job, &job_id);
            framed.send((message_id, resp)).await?;
        }
        Message::ClassTransferResponse { .. } => {
            // The classpath-directory file write this used to trigger is
            // retired: the catalog already answered the equivalent
            // availability question synchronously at JobRequest time.
        }
        Message::KeepAlive => {
            debug!("keep-alive");
        }
        Message::ServerShutdown { reason } => {
            info!(%reason, "server requested shutdown");
            session.set_state(SessionState::ShuttingDown);
            current_reporter.take();
            if let Some(job) = current_job.take() {
                let job_for_blocking = job.clone();
                tokio::task::spawn_blocking(move || {
                    job_for_blocking.force_stop(crate::wire::message::JobState::StoppedByShutdown)
                })
                .await
                .ok();
                stats::persistence::deregister();
            }
            return Err(anyhow!("shut down by server: {reason}"));
        }
        other => {
            debug!(?other, "unhandled message variant");
        }
    }
    Ok(())
}

fn handle_job_request(
    session: &Session,
    catalog: &Catalog,
    current_job: &mut Option<std::sync::Arc<JobRuntime>>,
    job_reported_done: &mut bool,
    msg: Message,
) -> (Message, Option<Message>) {
    let Message::JobRequest {
        job_id,
        job_class_name,
        threads_per_client,
        client_number,
        scheduled_start_time_ms,
        stop_time_ms,
        duration_secs,
        collection_interval_secs,
        thread_startup_delay_ms,
        parameters,
    } = msg
    else {
        unreachable!("handle_job_request called with a non-JobRequest message")
    };

    if current_job.is_some() {
        return (
            Message::JobResponse { job_id, response_code: ResponseCode::JobRequestRefused },
            None,
        );
    }

    let job = Job {
        job_id: job_id.clone(),
        job_class_name: job_class_name.clone(),
        threads_per_client,
        client_number,
        scheduled_start_time_ms: session.to_local_time_ms(scheduled_start_time_ms),
        stop_time_ms: if stop_time_ms == ABSENT_I64 {
            None
        } else {
            Some(session.to_local_time_ms(stop_time_ms))
        },
        duration_secs,
        collection_interval_secs,
        thread_startup_delay_ms,
        parameters,
        state: crate::job::state::JobState::NotStarted,
        actual_start_time_ms: None,
        actual_stop_time_ms: None,
    };

    if let Err(e) = job.validate() {
        warn!(job_id = %job_id, error = %e, "rejecting invalid JobRequest");
        let response_code = ClientError::JobSetup(e).as_response_code();
        return (Message::JobResponse { job_id, response_code }, None);
    }

    if !catalog.has(&job_class_name) {
        warn!(job_id = %job_id, class = %job_class_name, "rejecting JobRequest for unavailable class");
        let probe = Message::ClassTransferRequest { class_name: job_class_name };
        return (
            Message::JobResponse { job_id, response_code: ResponseCode::ClassNotFound },
            Some(probe),
        );
    }

    *current_job = Some(std::sync::Arc::new(JobRuntime::new(job, catalog.clone())));
    *job_reported_done = true;
    session.set_state(SessionState::JobDefined);

    (Message::JobResponse { job_id, response_code: ResponseCode::Success }, None)
}

async fn handle_job_control(
    session: &Session,
    config: &ClientConfig,
    current_job: &mut Option<std::sync::Arc<JobRuntime>>,
    current_reporter: &mut Option<ReporterHandle>,
    job_id: String,
    op: JobControlOp,
) -> Message {
    let Some(job) = current_job.as_ref() else {
        return Message::JobControlResponse { job_id, response_code: ResponseCode::NoSuchJob };
    };
    if job.job_id() != job_id {
        return Message::JobControlResponse { job_id, response_code: ResponseCode::NoSuchJob };
    }

    match op {
        JobControlOp::Start => match job.start() {
            Ok(()) => {
                session.set_state(SessionState::JobRunning);
                start_stats_for_job(config, job, current_reporter);
                Message::JobControlResponse { job_id, response_code: ResponseCode::Success }
            }
            Err(StartError::AlreadyStarted) => {
                Message::JobControlResponse { job_id, response_code: ResponseCode::JobAlreadyStarted }
            }
            Err(StartError::ClassNotFound(_)) => {
                Message::JobControlResponse { job_id, response_code: ResponseCode::ClassNotFound }
            }
        },
        JobControlOp::Stop => {
            let already_requested = job.request_stop();
            if already_requested {
                let job = job.clone();
                tokio::task::spawn_blocking(move || job.force_stop(crate::wire::message::JobState::StoppedByUser))
                    .await
                    .ok();
            }
            Message::JobControlResponse { job_id, response_code: ResponseCode::Success }
        }
        JobControlOp::StopDueToShutdown => {
            let already_requested = job.request_stop();
            if already_requested {
                let job = job.clone();
                tokio::task::spawn_blocking(move || job.force_stop(crate::wire::message::JobState::StoppedByShutdown))
                    .await
                    .ok();
            }
            Message::JobControlResponse { job_id, response_code: ResponseCode::Success }
        }
        JobControlOp::StopAndWait => {
            let already_requested = job.request_stop();
            if already_requested {
                let job = job.clone();
                tokio::task::spawn_blocking(move || job.force_stop(crate::wire::message::JobState::StoppedByUser))
                    .await
                    .ok();
            } else {
                let job = job.clone();
                tokio::task::spawn_blocking(move || job.wait_until_stopped()).await.ok();
            }
            Message::JobControlResponse { job_id, response_code: ResponseCode::Success }
        }
    }
}

/// Starts the real-time reporter and/or persistence thread for a job that
/// just began running. The tracker list is read once here, but each
/// `StatTracker` is a cheap-to-clone handle over shared sample storage, so
/// samples a job thread appends after this call still show up the next
/// time the reporter or persistence worker ticks. A tracker a thread
/// registers only after this snapshot was taken won't appear until the
/// next `StatusRequest` or job completion re-reads `aggregated_trackers`.
fn start_stats_for_job(
    config: &ClientConfig,
    job: &std::sync::Arc<JobRuntime>,
    current_reporter: &mut Option<ReporterHandle>,
) {
    let trackers = job.aggregated_trackers();

    if config.enable_real_time_stats && config.stat_port != 0 {
        *current_reporter = Some(stats::reporter::spawn(
            config.server_address.clone(),
            config.stat_port,
            job.job_id(),
            trackers.clone(),
            Duration::from_secs(u64::from(config.stat_report_interval_secs.max(1))),
        ));
    }

    if config.persist_statistics {
        stats::persistence::register(
            job.job_id(),
            std::path::PathBuf::from(&config.persistence_directory),
            trackers,
            Duration::from_secs(u64::from(config.persistence_interval_secs.max(1))),
        );
    }
}

fn build_status_response(
    session: &Session,
    current_job: &Option<std::sync::Arc<JobRuntime>>,
    job_id: &str,
) -> Message {
    let client_state: ClientStateValue = session.state().to_client_state();
    match current_job {
        Some(job) if job_id.is_empty() || job.job_id() == job_id => {
            let trackers = job
                .aggregated_trackers()
                .iter()
                .map(|t| t.to_wire())
                .collect();
            Message::StatusResponse {
                client_state,
                job_id: job.job_id(),
                job_state: job.state().to_i64(),
                trackers,
                log_messages: job.log_entries(&session.client_id),
            }
        }
        _ => Message::StatusResponse {
            client_state,
            job_id: String::new(),
            job_state: ABSENT_I64,
            trackers: vec![],
            log_messages: vec![],
        },
    }
}

async fn send_job_completed(
    framed: &mut FramedTransport,
    session: &Session,
    job: &JobRuntime,
) -> Result<()> {
    let start_ms = job.actual_start_time_ms().unwrap_or_else(now_ms);
    let stop_ms = job.actual_stop_time_ms().unwrap_or_else(now_ms);
    let trackers = job.aggregated_trackers().iter().map(|t| t.to_wire()).collect();
    let msg = Message::JobCompleted {
        job_id: job.job_id(),
        final_state: job.state(),
        actual_start_time_ms: session.to_server_time_ms(start_ms),
        actual_stop_time_ms: session.to_server_time_ms(stop_ms),
        actual_duration_secs: (stop_ms - start_ms) / 1000,
        trackers,
        log_messages: job.log_entries(&session.client_id),
    };
    let id = session.next_message_id();
    framed.send((id, msg)).await.context("sending JobCompleted")?;
    Ok(())
}

/// Graceful shutdown: stop any in-progress job, wait for it to report
/// done, then let the caller close the socket by returning.
async fn graceful_shutdown(
    framed: &mut FramedTransport,
    session: &Session,
    current_job: &mut Option<std::sync::Arc<JobRuntime>>,
    current_reporter: &mut Option<ReporterHandle>,
) -> Result<()> {
    session.set_state(SessionState::ShuttingDown);
    current_reporter.take();
    if let Some(job) = current_job.take() {
        let job_for_blocking = job.clone();
        tokio::task::spawn_blocking(move || {
            job_for_blocking.force_stop(crate::wire::message::JobState::StoppedByShutdown)
        })
        .await
        .ok();
        stats::persistence::deregister();
        send_job_completed(framed, session, &job).await?;
    }
    Ok(())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
