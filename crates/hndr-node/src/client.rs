//! Worker node runtime.
//!
//! A node dials the broker, authenticates with its init message, then serves
//! tasks one at a time with a user-supplied handler until the connection
//! ends. [`NodeClient::run`] reconnects forever.

use crate::config::NodeClientConfig;
use futures::{SinkExt, StreamExt};
use hndr_common::protocol::{BrokerError, NodeInit, PayloadSchema, Result};
use hndr_common::transport::MsgpackCodec;
use std::future::Future;
use std::marker::PhantomData;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Client side of the broker's node protocol for one payload schema.
pub struct NodeClient<S: PayloadSchema> {
    config: NodeClientConfig,
    _schema: PhantomData<fn() -> S>,
}

impl<S: PayloadSchema> NodeClient<S> {
    pub fn new(config: NodeClientConfig) -> Self {
        Self {
            config,
            _schema: PhantomData,
        }
    }

    pub fn config(&self) -> &NodeClientConfig {
        &self.config
    }

    /// Serves tasks forever, reconnecting after every session.
    ///
    /// Sessions end on broker close, network failure or an unreportable
    /// handler error. Each is logged and followed by
    /// `reconnect_delay` of sleep.
    pub async fn run<F, Fut>(&self, handler: F)
    where
        F: Fn(S::Task) -> Fut,
        Fut: Future<Output = Result<S::Output>>,
    {
        loop {
            match self.connect_once(&handler).await {
                Ok(()) => info!("Broker closed the connection"),
                Err(e) => warn!("Broker session ended: {}", e),
            }
            debug!("Reconnecting in {:?}", self.config.reconnect_delay);
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Runs a single session against the broker.
    ///
    /// # Returns
    /// - `Ok(())` - The broker closed the connection
    /// - `Err(BrokerError::Transport)` / `Err(BrokerError::Tls)` - Dial or socket failure
    /// - `Err(BrokerError::Handler)` - The handler failed and the schema has no
    ///   way to report it; the session was closed
    pub async fn connect_once<F, Fut>(&self, handler: &F) -> Result<()>
    where
        F: Fn(S::Task) -> Fut,
        Fut: Future<Output = Result<S::Output>>,
    {
        let addr = &self.config.broker_addr;
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| BrokerError::Transport(format!("Failed to connect to {}: {}", addr, e)))?;
        let _ = tcp.set_nodelay(true);

        match &self.config.tls {
            Some(tls) => {
                let server_name = ServerName::try_from(self.config.server_name.clone())
                    .map_err(|e| BrokerError::Tls(format!("Invalid server name: {}", e)))?;
                let stream = TlsConnector::from(tls.clone())
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| BrokerError::Tls(e.to_string()))?;
                let (ws, _) = tokio_tungstenite::client_async(self.config.url(), stream).await?;
                self.serve(ws, handler).await
            }
            None => {
                let (ws, _) = tokio_tungstenite::client_async(self.config.url(), tcp).await?;
                self.serve(ws, handler).await
            }
        }
    }

    async fn serve<IO, F, Fut>(&self, mut ws: WebSocketStream<IO>, handler: &F) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
        F: Fn(S::Task) -> Fut,
        Fut: Future<Output = Result<S::Output>>,
    {
        let init = NodeInit::new(self.config.ip.clone(), self.config.token.clone());
        ws.send(Message::Binary(MsgpackCodec::encode_init(&init)?)).await?;
        info!("Connected to {} broker at {}", S::NAME, self.config.broker_addr);

        while let Some(message) = ws.next().await {
            let frame = match message? {
                Message::Binary(frame) => frame,
                Message::Close(_) => break,
                _ => continue,
            };
            let (id, task) = MsgpackCodec::decode_task::<S>(&frame)?;

            let output = match handler(task).await {
                Ok(output) => output,
                Err(e) => {
                    let message = match e {
                        BrokerError::Handler(message) => message,
                        other => other.to_string(),
                    };
                    match S::error_result(message.clone()) {
                        Some(output) => {
                            warn!(request_id = id, "Task failed: {}", message);
                            output
                        }
                        None => {
                            let _ = ws.close(None).await;
                            return Err(BrokerError::Handler(message));
                        }
                    }
                }
            };

            let reply = MsgpackCodec::encode_result::<S>(id, output)?;
            ws.send(Message::Binary(reply)).await?;
            debug!(request_id = id, "Task completed");
        }
        Ok(())
    }
}
