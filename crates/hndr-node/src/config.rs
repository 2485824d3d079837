use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::rustls::ClientConfig;

/// Delay between losing the broker and dialling it again.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// How a node reaches and authenticates with its broker.
#[derive(Clone)]
pub struct NodeClientConfig {
    /// Broker node listener as `host:port`
    pub broker_addr: String,
    /// Name checked against the broker's certificate
    pub server_name: String,
    pub token: String,
    /// Address the node reports about itself in its init message
    pub ip: String,
    /// `None` dials plain `ws://`
    pub tls: Option<Arc<ClientConfig>>,
    pub reconnect_delay: Duration,
}

impl NodeClientConfig {
    /// Creates a plaintext config. The TLS server name defaults to the host
    /// part of `broker_addr`.
    ///
    /// # Arguments
    /// * `broker_addr` - Broker address (e.g., "broker.internal:6000")
    /// * `token` - Shared secret
    /// * `ip` - Address to report in the init message
    pub fn new(broker_addr: impl Into<String>, token: impl Into<String>, ip: impl Into<String>) -> Self {
        let broker_addr = broker_addr.into();
        let server_name = host_of(&broker_addr).to_string();
        Self {
            broker_addr,
            server_name,
            token: token.into(),
            ip: ip.into(),
            tls: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_tls(mut self, tls: Arc<ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// WebSocket URL of the broker.
    pub fn url(&self) -> String {
        let scheme = if self.tls.is_some() { "wss" } else { "ws" };
        format!("{}://{}/", scheme, self.broker_addr)
    }
}

impl fmt::Debug for NodeClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeClientConfig")
            .field("broker_addr", &self.broker_addr)
            .field("server_name", &self.server_name)
            .field("token", &"*****")
            .field("ip", &self.ip)
            .field("tls", &self.tls.is_some())
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}
