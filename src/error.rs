//! The cross-cutting error taxonomy, spanning the components a single
//! component's own error type (e.g. `wire::decoder::Error`) doesn't reach
//! across.

use thiserror::Error;

use crate::wire::message::ResponseCode;

/// A cross-cutting error surfaced by the session/job/supervisor layers.
///
/// Unlike the wire layer's hand-rolled `Error` enums (which exist purely to
/// distinguish "client sent something bad" from "the socket broke"), this
/// type carries a richer taxonomy than that and is what gets logged
/// and, where applicable, turned into a response code sent back to the
/// server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connect failure, read/write failure, TLS handshake failure. Fatal to
    /// the session; in the supervisor, triggers back-off reconnect.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// A malformed message was read. Logged and skipped; the session stays
    /// open.
    #[error("decode error: {0}")]
    Decode(#[source] crate::wire::decoder::Error),

    /// The server rejected the hello or the protocol didn't match. Fatal;
    /// the session exits with the server's response message.
    #[error("handshake rejected: {0}")]
    Handshake(String),

    /// Class not found, validation failure, or initialization exception.
    /// Reported via the job's own response message; the session stays
    /// healthy.
    #[error("job setup failed: {0}")]
    JobSetup(String),

    /// An exception inside a work unit, caught at the thread boundary.
    /// Logged against the job's message list; never fatal to the session.
    #[error("job runtime error in thread {thread_id}: {message}")]
    JobRuntime { thread_id: String, message: String },

    /// Forced-stop escalation exhausted all levels and a thread was
    /// abandoned. The job is still reported done.
    #[error("thread {thread_id} could not be stopped and was abandoned")]
    EscalationExhausted { thread_id: String },
}

impl ClientError {
    /// Maps a job-setup failure to the response code the server expects,
    /// from one response code to another.
    pub fn as_response_code(&self) -> ResponseCode {
        match self {
            ClientError::JobSetup(_) => ResponseCode::JobCreationFailure,
            ClientError::Transport(_) => ResponseCode::LocalError,
            ClientError::Decode(_) => ResponseCode::LocalError,
            ClientError::Handshake(_) => ResponseCode::LocalError,
            ClientError::JobRuntime { .. } => ResponseCode::LocalError,
            ClientError::EscalationExhausted { .. } => ResponseCode::Success,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(value: std::io::Error) -> Self {
        ClientError::Transport(value)
    }
}

impl From<crate::wire::decoder::Error> for ClientError {
    fn from(value: crate::wire::decoder::Error) -> Self {
        ClientError::Decode(value)
    }
}
