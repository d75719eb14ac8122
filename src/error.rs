//! Error types
//!
//! Errors only surface at the edges of the hub: binding the listener, the
//! WebSocket handshake, decoding a client frame and calling the webhook.
//! Actor operations never fail towards their callers.

use std::io;

use tokio_tungstenite::tungstenite;

/// Crate error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket or listener I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// WebSocket transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Handshake did not complete within the configured timeout
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Connection refused by the handler or the connection limit
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// Malformed message envelope
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// Webhook request failed
    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),
}

/// Crate result type
pub type Result<T> = std::result::Result<T, Error>;
