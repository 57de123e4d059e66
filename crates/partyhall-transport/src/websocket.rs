//! WebSocket transport over `tokio-tungstenite`.
//!
//! Text frames carry JSON control traffic and binary frames carry tick
//! frames. Ping and pong are answered by tungstenite itself; they only
//! refresh liveness here.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::{Connection, ConnectionId, Liveness, Transport, TransportError, WireMessage};

/// A client that opens TCP but stalls the upgrade is dropped after this.
const UPGRADE_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// Listens for WebSocket clients.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds to `addr`. Port 0 picks a free port; see
    /// [`local_addr`](Transport::local_addr).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        tracing::info!(addr, "listening for websocket clients");
        Ok(Self { listener })
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (tcp, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "could not disable nagle");
        }

        let ws = match tokio::time::timeout(UPGRADE_TIMEOUT, tokio_tungstenite::accept_async(tcp)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                return Err(TransportError::Upgrade {
                    peer,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(TransportError::Upgrade {
                    peer,
                    reason: "timed out".into(),
                });
            }
        };

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %peer, "websocket client connected");

        // Reader and writer halves are locked separately so an idle
        // `recv` never holds up outbound traffic.
        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            peer,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            liveness: Liveness::new(),
        })
    }

    fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
        self.listener.local_addr().map_err(TransportError::Accept)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        tracing::info!("websocket listener closing");
        Ok(())
    }
}

/// One connected WebSocket client.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    liveness: Liveness,
}

impl WebSocketConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn send_error(&self, e: tungstenite::Error) -> TransportError {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed(self.id)
            }
            other => TransportError::Send(self.id, other.to_string()),
        }
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, msg: WireMessage) -> Result<(), Self::Error> {
        let frame = match msg {
            WireMessage::Text(text) => Message::Text(text.into()),
            WireMessage::Binary(data) => Message::Binary(data.into()),
        };
        self.sink
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|e| self.send_error(e))
    }

    async fn recv(&self) -> Result<Option<WireMessage>, Self::Error> {
        let mut stream = self.stream.lock().await;
        while let Some(next) = stream.next().await {
            let frame = match next {
                Ok(frame) => frame,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Ok(None);
                }
                Err(e) => return Err(TransportError::Receive(self.id, e.to_string())),
            };
            self.liveness.touch();

            match frame {
                Message::Text(text) => return Ok(Some(WireMessage::Text(text.as_str().to_owned()))),
                Message::Binary(data) => return Ok(Some(WireMessage::Binary(data.to_vec()))),
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        match self.sink.lock().await.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(self.send_error(e)),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn liveness(&self) -> &Liveness {
        &self.liveness
    }
}
