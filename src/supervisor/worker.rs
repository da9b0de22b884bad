//! A single spawned worker process: the supervisor treats it as a black
//! box, tracking only its handle and liveness.

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// One client process spawned from `start_command`, identified by the
/// `client_id` the server assigned when directing the create.
pub struct Worker {
    pub client_id: String,
    child: Child,
}

impl Worker {
    /// Spawns `start_command` via a platform shell, passing `client_id` as
    /// its sole argument — the worker script is responsible for using it
    /// (e.g. as `--client-id`) however its own `ClientConfig` expects.
    pub fn spawn(start_command: &str, client_id: String) -> Result<Self> {
        let mut command = shell_command(start_command);
        command.arg(&client_id);
        let child = command
            .spawn()
            .with_context(|| format!("spawning worker process for client {client_id}"))?;
        info!(client_id = %client_id, command = %start_command, "spawned worker process");
        Ok(Self { client_id, child })
    }

    /// Liveness check via periodic exit-status polling — never blocks.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                warn!(client_id = %self.client_id, ?status, "worker process exited");
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e, "failed to poll worker liveness");
                false
            }
        }
    }

    /// Sends a stop signal and reaps the process.
    pub async fn stop(mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(client_id = %self.client_id, error = %e, "failed to signal worker process");
        }
        if let Err(e) = self.child.wait().await {
            warn!(client_id = %self.client_id, error = %e, "failed to reap worker process");
        }
    }
}

#[cfg(unix)]
fn shell_command(start_command: &str) -> Command {
    let mut c = Command::new("/bin/sh");
    c.arg("-c").arg(start_command);
    c
}

#[cfg(not(unix))]
fn shell_command(start_command: &str) -> Command {
    let mut c = Command::new("cmd");
    c.arg("/C").arg(start_command);
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawned_worker_reports_alive_then_exits() {
        let mut worker = Worker::spawn("sleep 1", "client-test".into()).unwrap();
        assert!(worker.is_alive());
        worker.stop().await;
    }
}
