//! Error taxonomy shared by the registry, the pager and the HTTP surface.

use thiserror::Error;

use crate::ws::ConnectionId;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Unknown connection or room. Recoverable, returned to the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// Handshake or credential rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Read, write or deadline failure on a connection. Always fatal to it.
    #[error("transport error: {0}")]
    Transport(String),

    /// Outbound queue full. Handled exactly like a transport failure.
    #[error("outbound queue full")]
    Overloaded,

    /// Undecodable inbound frame. Logged and ignored.
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("connection {0} already registered")]
    DuplicateConnection(ConnectionId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl ChatError {
    /// True for the failures that tear a connection down.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Overloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_overload_end_a_connection() {
        assert!(ChatError::Transport("reset".into()).is_fatal_to_connection());
        assert!(ChatError::Overloaded.is_fatal_to_connection());
        assert!(!ChatError::Malformed("junk".into()).is_fatal_to_connection());
        assert!(!ChatError::NotFound("room".into()).is_fatal_to_connection());
    }
}
