//! Error kinds for the net multiplexer.

use std::io;

use mio::Token;

/// Errors surfaced by [`crate::service::NetService`] and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Invalid timeout, missing implementation, or other misconfiguration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bind failure, or attempt to register an already-bound port.
    #[error("registration error: {0}")]
    Registration(String),

    /// Read/write/close failure on a channel.
    #[error("io error on channel {token:?}: {source}")]
    Io {
        /// Channel the error occurred on.
        token: Token,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// A consumer returned a null session, or a write targeted an unknown session.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The I/O worker pool rejected a task; the caller should retry on the next tick.
    #[error("backpressure: {0}")]
    Backpressure(String),
}

/// Result alias for fallible `netmux` operations.
pub type NetResult<T> = std::result::Result<T, NetError>;
