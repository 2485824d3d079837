use hndr_common::protocol::RequestId;
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Stable identity of one accepted node connection.
///
/// Allocated by the broker from a process-wide counter and never reused, so
/// it can key the connection registry without relying on object identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a node connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, waiting for the init message
    Unverified,
    /// Token accepted; member of the node pool
    Verified,
    /// Terminal
    Closed,
}

/// Outbound half of a connection: encoded frames queued for its writer.
pub type FrameSender = mpsc::UnboundedSender<Vec<u8>>;

/// One authenticated (or authenticating) node connection.
///
/// Owns the set of request IDs currently dispatched to it. That set is the
/// only record of which callers must be failed when the connection goes away.
#[derive(Debug)]
pub struct NodeConnection {
    peer_addr: SocketAddr,
    state: ConnectionState,
    /// IP the node reported in its init message
    reported_ip: Option<String>,
    pending: HashSet<RequestId>,
    outbound: FrameSender,
    accepted_at: Instant,
}

impl NodeConnection {
    pub fn new(peer_addr: SocketAddr, outbound: FrameSender) -> Self {
        Self {
            peer_addr,
            state: ConnectionState::Unverified,
            reported_ip: None,
            pending: HashSet::new(),
            outbound,
            accepted_at: Instant::now(),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_verified(&self) -> bool {
        self.state == ConnectionState::Verified
    }

    pub fn reported_ip(&self) -> Option<&str> {
        self.reported_ip.as_deref()
    }

    /// Time since the socket was accepted.
    pub fn connected_for(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    /// Transition `Unverified` → `Verified`.
    ///
    /// Returns `false` (and changes nothing) from any other state.
    pub fn verify(&mut self, reported_ip: impl Into<String>) -> bool {
        if self.state != ConnectionState::Unverified {
            return false;
        }
        self.state = ConnectionState::Verified;
        self.reported_ip = Some(reported_ip.into());
        true
    }

    /// Transition to `Closed`, handing back the request IDs still assigned.
    pub fn close(&mut self) -> Vec<RequestId> {
        self.state = ConnectionState::Closed;
        self.pending.drain().collect()
    }

    pub fn track(&mut self, request_id: RequestId) {
        self.pending.insert(request_id);
    }

    pub fn untrack(&mut self, request_id: RequestId) -> bool {
        self.pending.remove(&request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Queue an encoded frame for the connection's writer.
    ///
    /// Never blocks. Returns `false` if the writer has already gone away; the
    /// connection's close handling will then fail whatever was tracked.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        self.outbound.send(frame).is_ok()
    }
}
