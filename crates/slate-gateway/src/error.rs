//! Gateway error types.

use slate_core::{Status, WireError};
use thiserror::Error;

/// Errors raised by session and peer machinery.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport or protocol failure on a peer connection.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The peer violated the opening handshake sequence.
    #[error("handshake violation: {0}")]
    Handshake(String),

    /// `select` named neither a registered backend nor a live session.
    #[error("no such backend or session: {0}")]
    UnknownTarget(String),

    /// The session already has an owner.
    #[error("session already owned")]
    AlreadyOwned,

    /// The session is no longer accepting peers.
    #[error("session is shutting down")]
    SessionClosed,

    /// A handle space is exhausted.
    #[error("handle space exhausted")]
    HandlesExhausted,

    /// An instruction arrived with missing or malformed arguments.
    #[error("malformed {0} instruction")]
    BadInstruction(&'static str),

    /// The backend worker failed.
    #[error("backend failure: {0}")]
    Backend(String),
}

impl GatewayError {
    /// The status code reported on the wire for this error.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Wire(WireError::Timeout) => Status::ClientTimeout,
            Self::Wire(WireError::Parse(_)) | Self::Handshake(_) | Self::BadInstruction(_) => {
                Status::ClientBadRequest
            }
            Self::Wire(_) => Status::ServerError,
            Self::UnknownTarget(_) => Status::ResourceNotFound,
            Self::AlreadyOwned => Status::SessionConflict,
            Self::SessionClosed => Status::SessionClosed,
            Self::HandlesExhausted => Status::ServerBusy,
            Self::Backend(_) => Status::UpstreamError,
        }
    }
}
