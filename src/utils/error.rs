//! The `error` module defines the error type shared across `subrelay`.
//!
//! Runtime failures of an established connection are not errors here: an
//! upstream that goes away is reported through `UpstreamHandler::on_close`,
//! and a downstream endpoint that stops accepting frames is evicted by the
//! broadcaster. `RelayError` covers what a caller can act on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The upstream endpoint could not be reached or refused the handshake.
    #[error("connection to {url} failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    /// A downstream endpoint no longer accepts frames.
    #[error("failed to send to endpoint {endpoint}")]
    SendFailure { endpoint: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("topic '{0}' already has a live subscription")]
    AlreadySubscribed(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("downstream server stopped")]
    ServerStopped,

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, RelayError>;
