use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker-allocated identifier correlating a task with its result.
pub type RequestId = u64;

/// First (and only) message a node sends before it may receive tasks.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInit {
    pub ip: String,
    pub token: String,
}

impl NodeInit {
    pub fn new(ip: impl Into<String>, token: impl Into<String>) -> Self {
        NodeInit {
            ip: ip.into(),
            token: token.into(),
        }
    }
}

// The token never ends up in logs.
impl fmt::Debug for NodeInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInit")
            .field("ip", &self.ip)
            .field("token", &"*****")
            .finish()
    }
}
