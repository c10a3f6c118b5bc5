use hzrcon_proto::DecodeError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RconError>;

/// Failures surfaced by the transport and the session.
#[derive(Debug, Error)]
pub enum RconError {
    #[error("timed out connecting to {addr}")]
    ConnectTimeout { addr: String },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("command timed out: {command}")]
    CommandTimeout { command: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),
}

impl RconError {
    pub(crate) fn lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    pub(crate) fn auth(reason: impl Into<String>) -> Self {
        Self::AuthFailed {
            reason: reason.into(),
        }
    }

    /// Whether the connection that produced this error can no longer be
    /// trusted and must be re-established before the next command.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, Self::ConnectTimeout { .. } | Self::Connect { .. })
    }
}
