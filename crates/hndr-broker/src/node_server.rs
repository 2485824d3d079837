//! WebSocket listener for worker nodes.
//!
//! Each accepted socket gets its own task that runs the TLS and WebSocket
//! handshakes, authenticates the node, then pumps frames in both directions
//! until the connection ends. All routing decisions are made by the
//! [`Broker`]; this module only moves bytes.

use crate::broker::Broker;
use crate::handshake::authenticate;
use crate::node::ConnectionId;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use hndr_common::protocol::{BrokerError, PayloadSchema, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Accepts node connections for one broker.
///
/// Without TLS the listener speaks plain `ws://`, which is what tests and
/// deployments behind a TLS-terminating proxy use.
pub struct NodeServer<S: PayloadSchema> {
    listener: TcpListener,
    broker: Arc<Broker<S>>,
    tls: Option<TlsAcceptor>,
}

impl<S: PayloadSchema> NodeServer<S> {
    /// Binds the node listener.
    ///
    /// # Arguments
    /// * `addr` - Address to bind to (e.g., "0.0.0.0:6000")
    /// * `broker` - Broker that accepted connections register with
    pub async fn bind(addr: SocketAddr, broker: Arc<Broker<S>>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BrokerError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        Ok(Self {
            listener,
            broker,
            tls: None,
        })
    }

    /// Serves `wss://` using the given rustls config.
    pub fn with_tls(mut self, config: Arc<ServerConfig>) -> Self {
        self.tls = Some(TlsAcceptor::from(config));
        self
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| BrokerError::Transport(format!("Failed to get local addr: {}", e)))
    }

    /// Accepts connections until the task is dropped.
    ///
    /// A failed accept is logged and skipped; only the listener going away
    /// ends the loop.
    pub async fn run(self) -> Result<()> {
        info!(
            "{} node listener on {} ({})",
            S::NAME,
            self.local_addr()?,
            if self.tls.is_some() { "wss" } else { "ws" }
        );

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept node connection: {}", e);
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);

            let broker = self.broker.clone();
            let tls = self.tls.clone();
            tokio::spawn(async move {
                serve_socket(broker, tls, stream, peer).await;
            });
        }
    }
}

/// Runs the TLS and WebSocket upgrades, then drives the connection.
async fn serve_socket<S: PayloadSchema>(
    broker: Arc<Broker<S>>,
    tls: Option<TlsAcceptor>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let window = broker.config().handshake_timeout;
    match tls {
        Some(acceptor) => {
            let upgrade = async {
                let stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| BrokerError::Tls(e.to_string()))?;
                Ok::<_, BrokerError>(tokio_tungstenite::accept_async(stream).await?)
            };
            match tokio::time::timeout(window, upgrade).await {
                Ok(Ok(ws)) => drive_connection(broker, ws, peer).await,
                Ok(Err(e)) => debug!(peer = %peer, error = %e, "Node upgrade failed"),
                Err(_) => debug!(peer = %peer, "Node upgrade timed out"),
            }
        }
        None => match tokio::time::timeout(window, tokio_tungstenite::accept_async(stream)).await {
            Ok(Ok(ws)) => drive_connection(broker, ws, peer).await,
            Ok(Err(e)) => debug!(peer = %peer, error = %e, "Node upgrade failed"),
            Err(_) => debug!(peer = %peer, "Node upgrade timed out"),
        },
    }
}

/// Owns one node connection from registration to close.
///
/// Registers the connection, authenticates it, pumps frames, and on any exit
/// path hands it back to [`Broker::close_connection`] so its pending
/// requests are failed.
pub async fn drive_connection<S, IO>(broker: Arc<Broker<S>>, ws: WebSocketStream<IO>, peer: SocketAddr)
where
    S: PayloadSchema,
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let (outbound, mut frames) = mpsc::unbounded_channel();
    let id = broker.accept_connection(peer, outbound);

    let fault = match authenticate(&mut stream, broker.auth(), broker.config().handshake_timeout).await {
        Ok(init) => {
            broker.verify_connection(id, &init.ip);
            pump(&broker, id, &mut sink, &mut stream, &mut frames).await.err()
        }
        Err(e) => Some(e),
    };

    broker.close_connection(id, fault.as_ref());
    let _ = sink.close().await;
}

/// Moves frames until the node goes away or misbehaves.
///
/// Returns `Ok(())` on a clean close.
async fn pump<S, IO>(
    broker: &Broker<S>,
    id: ConnectionId,
    sink: &mut SplitSink<WebSocketStream<IO>, Message>,
    stream: &mut SplitStream<WebSocketStream<IO>>,
    frames: &mut mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<()>
where
    S: PayloadSchema,
    IO: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            Some(frame) = frames.recv() => {
                sink.send(Message::Binary(frame)).await?;
            }
            message = stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    broker.handle_result(id, &data)?;
                }
                Some(Ok(Message::Text(_))) => {
                    return Err(BrokerError::ProtocolViolation("text frame from node".to_string()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}
