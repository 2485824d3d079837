use thiserror::Error;

/// Every fault the broker or a node can raise.
///
/// Handshake faults (`AuthTimeout`, `InvalidToken`, `MalformedInitMessage`)
/// and `MalformedTaskResult` only ever tear down a node connection. The
/// caller-facing variants (`NoNodeAvailable`, `NodeDisconnected`,
/// `MalformedCallerRequest`) are rendered to HTTP callers with their
/// `Display` text, so those strings are part of the external interface.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Node did not authenticate within {0}ms")]
    AuthTimeout(u64),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Malformed init message: {0}")]
    MalformedInitMessage(String),

    #[error("Malformed task result: {0}")]
    MalformedTaskResult(String),

    #[error("No node available")]
    NoNodeAvailable,

    #[error("Node disconnected")]
    NodeDisconnected,

    #[error("Malformed request: {0}")]
    MalformedCallerRequest(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Node handler error: {0}")]
    Handler(String),
}

impl BrokerError {
    /// Whether this error is surfaced to an HTTP caller as a client error (400).
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, BrokerError::MalformedCallerRequest(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BrokerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BrokerError::Transport(err.to_string())
    }
}

impl From<rustls::Error> for BrokerError {
    fn from(err: rustls::Error) -> Self {
        BrokerError::Tls(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
