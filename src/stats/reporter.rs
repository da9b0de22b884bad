//! The real-time reporter: a second connection to the server's
//! stat port, streaming per-interval samples while a job runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::sink::SinkExt;
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::job::tracker::StatTracker;
use crate::wire::message::Message;
use crate::wire::{self};

/// Runs for the lifetime of one job: registers every tracker by name, then
/// samples them on `report_interval` and emits `ReportStatistic`. Runs as
/// its own tokio task rather than a dedicated OS thread, since it only
/// ever does async I/O (no job-class callbacks run on it).
pub async fn run(
    server_address: String,
    stat_port: u16,
    job_id: String,
    trackers: Vec<StatTracker>,
    report_interval: Duration,
    mut stop: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let tcp = TcpStream::connect((server_address.as_str(), stat_port))
        .await
        .with_context(|| format!("connecting to stat port {stat_port}"))?;
    tcp.set_nodelay(true).ok();
    let mut framed = wire::framed(tcp);

    for tracker in &trackers {
        let msg = Message::RegisterStatistic {
            job_id: job_id.clone(),
            display_name: tracker.display_name(),
            thread_id: tracker.thread_id(),
            interval_seconds: tracker.interval_seconds(),
        };
        framed.send((0, msg)).await.context("registering tracker")?;
    }

    let mut interval = tokio::time::interval(report_interval);
    let mut last_lengths: Vec<usize> = vec![0; trackers.len()];

    loop {
        tokio::select! {
            _ = &mut stop => {
                debug!(job_id = %job_id, "real-time reporter stopping");
                return Ok(());
            }
            _ = interval.tick() => {
                if let Err(e) = report_once(&mut framed, &job_id, &trackers, &mut last_lengths).await {
                    warn!(error = %e, "failed to send ReportStatistic batch");
                }
            }
        }
    }
}

async fn report_once(
    framed: &mut tokio_util::codec::Framed<TcpStream, wire::Codec>,
    job_id: &str,
    trackers: &[StatTracker],
    last_lengths: &mut [usize],
) -> Result<()> {
    for (i, tracker) in trackers.iter().enumerate() {
        let samples = tracker.samples();
        for (index, value) in samples.iter().enumerate().skip(last_lengths[i]) {
            let msg = Message::ReportStatistic {
                job_id: job_id.to_string(),
                display_name: tracker.display_name(),
                thread_id: tracker.thread_id(),
                interval_index: index as u32,
                value: *value,
            };
            framed.send((0, msg)).await?;
        }
        last_lengths[i] = samples.len();
    }
    // Drain any inbound traffic on this connection without blocking; the
    // stat port is write-mostly from the client's side.
    if let Ok(Some(Ok(_))) = tokio::time::timeout(Duration::from_millis(1), framed.next()).await {
        debug!("received unexpected inbound message on stat connection");
    }
    Ok(())
}

/// Spawns the reporter task and returns a handle to stop it.
pub fn spawn(
    server_address: String,
    stat_port: u16,
    job_id: String,
    trackers: Vec<StatTracker>,
    report_interval: Duration,
) -> ReporterHandle {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move {
        if let Err(e) = run(server_address, stat_port, job_id, trackers, report_interval, rx).await {
            warn!(error = %e, "real-time reporter exited with an error");
        }
    });
    ReporterHandle { stop: Some(tx), handle: Arc::new(handle) }
}

pub struct ReporterHandle {
    stop: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Arc<tokio::task::JoinHandle<()>>,
}

impl ReporterHandle {
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reporter_handle_stop_is_idempotent() {
        let (tx, _rx) = tokio::sync::oneshot::channel();
        let mut handle = ReporterHandle {
            stop: Some(tx),
            handle: Arc::new(tokio::spawn(async {})),
        };
        handle.stop();
        handle.stop();
    }
}
