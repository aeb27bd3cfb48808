//! Error types for the server crate.

use cncbridge_settings::SettingsError;
use std::io;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised while running the bridge server
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listener could not bind
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// WebSocket handshake or framing failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Invalid configuration
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Bridge error from a lower layer
    #[error(transparent)]
    Bridge(#[from] cncbridge_core::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for server operations
pub type ServerResult<T> = Result<T, ServerError>;
