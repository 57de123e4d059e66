//! Error types for the transport layer.

use std::net::SocketAddr;

use crate::ConnectionId;

/// Everything that can go wrong below the protocol layer.
///
/// Only `Bind` is fatal to the server. The others end one connection, or
/// just one accept attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The TCP peer connected but never completed a WebSocket upgrade.
    #[error("websocket upgrade from {peer} failed: {reason}")]
    Upgrade { peer: SocketAddr, reason: String },

    #[error("{0} send failed: {1}")]
    Send(ConnectionId, String),

    #[error("{0} receive failed: {1}")]
    Receive(ConnectionId, String),

    /// Used by the peer-gone paths; a clean close is `Ok(None)` from `recv`.
    #[error("{0} is closed")]
    Closed(ConnectionId),
}
