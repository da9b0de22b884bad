//! The `Session` data type: connection-scoped state that outlives
//! any single job.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    NotConnected,
    Idle,
    JobDefined,
    JobRunning,
    ShuttingDown,
}

impl SessionState {
    pub fn to_client_state(self) -> crate::wire::message::ClientStateValue {
        use crate::wire::message::ClientStateValue as C;
        match self {
            SessionState::NotConnected => C::NotConnected,
            SessionState::Idle => C::Idle,
            SessionState::JobDefined => C::JobNotYetStarted,
            SessionState::JobRunning => C::RunningJob,
            SessionState::ShuttingDown => C::ShuttingDown,
        }
    }
}

/// Owns the identity and clock-sync state of one connection to the server.
/// The transport itself lives in `session::run`'s local variables rather
/// than here, since `Framed<T, Codec>` isn't `Clone` and only one task
/// ever touches it.
pub struct Session {
    pub client_id: String,
    pub server_time_offset_ms: i64,
    pub restricted_mode: bool,
    next_client_message_id: AtomicU64,
    state: std::sync::Mutex<SessionState>,
}

impl Session {
    pub fn new(client_id: String, restricted_mode: bool) -> Self {
        Self {
            client_id,
            server_time_offset_ms: 0,
            restricted_mode,
            next_client_message_id: AtomicU64::new(0),
            state: std::sync::Mutex::new(SessionState::NotConnected),
        }
    }

    /// Allocates the next even client-originated message id.
    pub fn next_message_id(&self) -> u64 {
        self.next_client_message_id.fetch_add(2, Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap() = next;
    }

    /// Derives a client id as `hostname:localPort` when none was configured
    /// when none was configured.
    pub fn derive_client_id(local_port: u16) -> String {
        let hostname = hostname_best_effort();
        format!("{hostname}:{local_port}")
    }

    /// Adjusts an inbound server timestamp to local wall-clock time, using
    /// the offset recorded when the session's clock skew was measured.
    pub fn to_local_time_ms(&self, server_time_ms: i64) -> i64 {
        server_time_ms - self.server_time_offset_ms
    }

    /// Adjusts an outbound local timestamp to server time.
    pub fn to_server_time_ms(&self, local_time_ms: i64) -> i64 {
        local_time_ms + self.server_time_offset_ms
    }
}

fn hostname_best_effort() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::process::Command::new("hostname")
                .output()
                .ok()
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_monotonically_increasing_evens() {
        let session = Session::new("c1".into(), false);
        assert_eq!(session.next_message_id(), 0);
        assert_eq!(session.next_message_id(), 2);
        assert_eq!(session.next_message_id(), 4);
    }

    #[test]
    fn clock_skew_round_trips() {
        let mut session = Session::new("c1".into(), false);
        session.server_time_offset_ms = 1500;
        let local = session.to_local_time_ms(10_000);
        assert_eq!(local, 8_500);
        assert_eq!(session.to_server_time_ms(local), 10_000);
    }
}
