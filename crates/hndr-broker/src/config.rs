use std::time::Duration;

/// Default window for a node to send its init message.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default cap on a caller's request body (100 MB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Broker configuration.
///
/// Loaded once at process start; the broker never mutates it.
#[derive(Clone)]
pub struct BrokerConfig {
    /// Shared secret every node must present in its init message.
    pub token: String,
    /// How long a freshly accepted connection may take to authenticate.
    pub handshake_timeout: Duration,
    /// Largest caller request body the front door will read.
    pub max_body_bytes: usize,
}

impl BrokerConfig {
    /// Creates a config with the given token and default limits.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("token", &"*****")
            .field("handshake_timeout", &self.handshake_timeout)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}
