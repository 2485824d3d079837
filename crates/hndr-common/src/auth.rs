//! Node Authentication
//!
//! Worker nodes prove they belong to the fleet with a shared secret token sent
//! in their init message. There are no client certificates: TLS only protects
//! the channel, the token establishes identity.
//!
//! # Security Model
//!
//! - The token is a shared secret between the broker and every node
//! - Tokens are compared in constant time
//! - The token is never rendered by `Display` or `Debug`
//!
//! # Example
//!
//! ```
//! use hndr_common::auth::TokenAuth;
//!
//! let auth = TokenAuth::new("my-secret-token");
//! assert!(auth.validate("my-secret-token"));
//! assert!(!auth.validate("guess"));
//! ```

use std::fmt;

/// Shared-token validator used during the node handshake.
#[derive(Clone)]
pub struct TokenAuth {
    token: String,
}

impl TokenAuth {
    /// Creates a validator accepting exactly `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Checks a token presented by a node.
    ///
    /// Always walks the full length of equal-length inputs so the comparison
    /// time does not reveal the position of the first mismatch.
    pub fn validate(&self, provided: &str) -> bool {
        constant_time_eq(&self.token, provided)
    }
}

impl fmt::Display for TokenAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(*****)")
    }
}

impl fmt::Debug for TokenAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenAuth(*****)")
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}
