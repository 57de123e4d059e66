//! Transport layer for partyhall.
//!
//! The router above only ever sees two traits: [`Transport`] hands out
//! new clients and [`Connection`] moves [`WireMessage`] frames for one of
//! them. Control traffic travels as text, tick traffic as binary.
//!
//! Each connection also keeps a [`Liveness`] stamp, refreshed by every
//! inbound frame, which the router checks on its heartbeat interval.
//!
//! Cargo feature `websocket` (on by default) provides
//! [`WebSocketTransport`] on top of `tokio-tungstenite`.

#![allow(async_fn_in_trait)]

mod error;
mod liveness;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use liveness::Liveness;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;

/// Process-unique id of one accepted connection. Shown as `conn-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One frame on a connection.
///
/// JSON control and lobby messages travel as `Text`; compact tick input
/// and snapshot frames travel as `Binary`. The router decides which
/// decoder to use from the variant alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A UTF-8 control message.
    Text(String),
    /// A binary tick frame.
    Binary(Vec<u8>),
}

impl WireMessage {
    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Returns `true` for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A listener that produces connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next client. An error affects that client only; the
    /// caller keeps accepting.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// The bound address, with the real port when bound to port 0.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;

    /// Stops taking new clients. Open connections are not touched.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// One client. Methods take `&self` so a pending `recv` and a `send` can
/// run at the same time.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    async fn send(&self, msg: WireMessage) -> Result<(), Self::Error>;

    /// The next data frame, or `Ok(None)` once the peer has gone away.
    /// Every inbound frame, pings included, touches [`liveness`](Self::liveness).
    async fn recv(&self) -> Result<Option<WireMessage>, Self::Error>;

    /// Sends a close frame. Closing twice is not an error.
    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;

    fn liveness(&self) -> &Liveness;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_displays_with_prefix() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
        assert_eq!(ConnectionId::new(7).into_inner(), 7);
    }

    #[test]
    fn test_connection_id_orders_by_accept_sequence() {
        let mut ids = vec![ConnectionId::new(3), ConnectionId::new(1), ConnectionId::new(2)];
        ids.sort();
        assert_eq!(ids, [1, 2, 3].map(ConnectionId::new));
    }

    #[test]
    fn test_wire_message_len_counts_payload_bytes() {
        assert_eq!(WireMessage::Text("abc".into()).len(), 3);
        assert_eq!(WireMessage::Binary(vec![1, 2]).len(), 2);
        assert!(WireMessage::Binary(Vec::new()).is_empty());
    }
}
