//! The broker core.
//!
//! [`Broker`] owns every piece of mutable routing state: the connection
//! registry, the node pool, the request table and the ID counter. All of it
//! lives behind one synchronous mutex that is never held across an `.await`,
//! so each operation below is a single uninterrupted step with respect to the
//! others. The network drivers in [`crate::node_server`] and
//! [`crate::http_server`] only ever call into it.

use crate::config::BrokerConfig;
use crate::correlation::{Completion, PendingRequest, RequestTable};
use crate::node::{ConnectionId, ConnectionState, FrameSender, NodeConnection};
use crate::node_pool::NodePool;
use hndr_common::auth::TokenAuth;
use hndr_common::protocol::{BrokerError, PayloadSchema, RequestId, Result};
use hndr_common::transport::MsgpackCodec;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::SocketAddr;
use tracing::{debug, info, warn};


struct BrokerState<T> {
    next_connection_id: u64,
    connections: HashMap<ConnectionId, NodeConnection>,
    pool: NodePool,
    requests: RequestTable<T>,
    rng: StdRng,
}

/// Compute broker for one payload schema.
///
/// Callers submit tasks with [`Broker::call`]; each task is sent to one
/// randomly chosen verified node and the caller is completed with that
/// node's result, or with [`BrokerError::NodeDisconnected`] if the node goes
/// away first. A task submitted while no node is connected fails immediately
/// with [`BrokerError::NoNodeAvailable`]; nothing is queued.
///
/// # Example
/// ```no_run
/// # use hndr_broker::{Broker, BrokerConfig};
/// # use hndr_common::protocol::EmbedSchema;
/// # async fn demo() -> hndr_common::protocol::Result<()> {
/// let broker = Broker::<EmbedSchema>::new(BrokerConfig::new("secret"));
/// let result = broker.call("hello world".to_string()).await?;
/// assert_eq!(result.dense.len(), 4096);
/// # Ok(())
/// # }
/// ```
pub struct Broker<S: PayloadSchema> {
    config: BrokerConfig,
    auth: TokenAuth,
    state: Mutex<BrokerState<S::Output>>,
    _schema: PhantomData<fn() -> S>,
}

impl<S: PayloadSchema> Broker<S> {
    /// Creates a broker with an entropy-seeded node picker.
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Creates a broker whose node picker draws from `rng`.
    ///
    /// Tests use a seeded generator to make node selection reproducible.
    pub fn with_rng(config: BrokerConfig, rng: StdRng) -> Self {
        let auth = TokenAuth::new(config.token.clone());
        Self {
            config,
            auth,
            state: Mutex::new(BrokerState {
                next_connection_id: 0,
                connections: HashMap::new(),
                pool: NodePool::new(),
                requests: RequestTable::new(),
                rng,
            }),
            _schema: PhantomData,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn auth(&self) -> &TokenAuth {
        &self.auth
    }

    /// Registers a freshly accepted connection in the `Unverified` state.
    ///
    /// # Arguments
    /// * `peer_addr` - Remote socket address, for logging
    /// * `outbound` - Queue drained by the connection's writer
    ///
    /// # Returns
    /// The new connection's ID. It is not in the node pool until
    /// [`Broker::verify_connection`] succeeds.
    pub fn accept_connection(&self, peer_addr: SocketAddr, outbound: FrameSender) -> ConnectionId {
        let mut state = self.state.lock();
        let id = ConnectionId(state.next_connection_id);
        state.next_connection_id += 1;
        state
            .connections
            .insert(id, NodeConnection::new(peer_addr, outbound));
        debug!(connection = %id, peer = %peer_addr, "Node connection accepted");
        id
    }

    /// Marks a connection as verified and adds it to the node pool.
    ///
    /// The caller has already checked the token; this only performs the
    /// state transition.
    ///
    /// # Returns
    /// `true` if the connection was `Unverified` and is now eligible for
    /// work, `false` if it is unknown, closed or already verified.
    pub fn verify_connection(&self, id: ConnectionId, reported_ip: &str) -> bool {
        let mut state = self.state.lock();
        let state = &mut *state;
        let Some(connection) = state.connections.get_mut(&id) else {
            return false;
        };
        if !connection.verify(reported_ip) {
            return false;
        }
        state.pool.add(id);
        info!(
            connection = %id,
            peer = %connection.peer_addr(),
            ip = reported_ip,
            nodes = state.pool.len(),
            "{} node verified",
            S::NAME
        );
        true
    }

    /// Sends `task` to a randomly chosen verified node.
    ///
    /// Selection, ID allocation and registration of the pending entry happen
    /// in one step, before the task frame is queued on the chosen connection.
    ///
    /// # Returns
    /// - `Ok(completion)` - Resolves with the node's result or with
    ///   [`BrokerError::NodeDisconnected`]
    /// - `Err(BrokerError::NoNodeAvailable)` - The pool was empty; no ID was
    ///   allocated and nothing was sent
    /// - `Err(BrokerError::Encode(_))` - The task could not be encoded
    pub fn dispatch(&self, task: S::Task) -> Result<Completion<S::Output>> {
        let mut state = self.state.lock();
        let state = &mut *state;

        let Some(owner) = state.pool.pick(&mut state.rng) else {
            return Err(BrokerError::NoNodeAvailable);
        };
        let Some(connection) = state.connections.get_mut(&owner) else {
            // Pool members are always registered; drop the stray one.
            state.pool.remove(owner);
            return Err(BrokerError::NoNodeAvailable);
        };

        let id = state.requests.allocate_id();
        let frame = MsgpackCodec::encode_task::<S>(id, task)?;
        let (pending, completion) = PendingRequest::new(owner);
        state.requests.insert(id, pending);
        connection.track(id);

        if !connection.send(frame) {
            // Writer is gone; the connection's close will fail this request.
            debug!(request_id = id, connection = %owner, "Task queued on closing connection");
        }
        debug!(request_id = id, connection = %owner, "Task dispatched");
        Ok(completion)
    }

    /// Dispatches `task` and waits for its outcome.
    ///
    /// There is no timeout: a node that never answers leaves the caller
    /// waiting until the node's connection closes. Dropping the returned
    /// future does not cancel the task; a late result is discarded.
    pub async fn call(&self, task: S::Task) -> Result<S::Output> {
        let completion = self.dispatch(task)?;
        // A dropped sender means the entry was discarded without resolution.
        completion
            .await
            .unwrap_or(Err(BrokerError::NodeDisconnected))
    }

    /// Handles one binary frame received from a verified connection.
    ///
    /// # Arguments
    /// * `connection` - The connection the frame arrived on
    /// * `frame` - Raw MessagePack bytes
    ///
    /// # Returns
    /// - `Ok(Some(id))` - The request `id` was completed
    /// - `Ok(None)` - The ID is not pending (already completed, failed by a
    ///   disconnect, or never issued); the frame is dropped
    /// - `Err(BrokerError::MalformedTaskResult(_))` - The frame is not a valid
    ///   result; the driver closes the connection
    pub fn handle_result(&self, connection: ConnectionId, frame: &[u8]) -> Result<Option<RequestId>> {
        let (id, output) = MsgpackCodec::decode_result::<S>(frame)?;

        let pending = {
            let mut state = self.state.lock();
            let state = &mut *state;
            let Some(pending) = state.requests.remove(id) else {
                debug!(request_id = id, connection = %connection, "Dropping result for unknown request");
                return Ok(None);
            };
            if pending.owner() != connection {
                debug!(
                    request_id = id,
                    connection = %connection,
                    owner = %pending.owner(),
                    "Result arrived on a different connection than the task"
                );
            }
            if let Some(owner) = state.connections.get_mut(&pending.owner()) {
                owner.untrack(id);
            }
            pending
        };

        let elapsed = pending.elapsed();
        if !pending.resolve(Ok(output)) {
            debug!(request_id = id, "Caller stopped waiting; result discarded");
        }
        debug!(request_id = id, elapsed_ms = elapsed.as_millis() as u64, "Request completed");
        Ok(Some(id))
    }

    /// Removes a connection and fails every request still assigned to it.
    ///
    /// Idempotent: closing an unknown or already closed connection is a no-op.
    ///
    /// # Arguments
    /// * `id` - The connection to close
    /// * `reason` - Why it closed, for logging only
    ///
    /// # Returns
    /// Number of callers failed with [`BrokerError::NodeDisconnected`]
    pub fn close_connection(&self, id: ConnectionId, reason: Option<&BrokerError>) -> usize {
        let (connection, failed, nodes) = {
            let mut state = self.state.lock();
            let state = &mut *state;
            let Some(mut connection) = state.connections.remove(&id) else {
                return 0;
            };
            let was_verified = connection.is_verified();
            state.pool.remove(id);
            let failed: Vec<_> = connection
                .close()
                .into_iter()
                .filter_map(|request_id| state.requests.remove(request_id))
                .collect();
            (was_verified.then_some(connection), failed, state.pool.len())
        };

        let count = failed.len();
        for pending in failed {
            pending.resolve(Err(BrokerError::NodeDisconnected));
        }

        match (connection, reason) {
            (Some(connection), None) => info!(
                connection = %id,
                ip = connection.reported_ip().unwrap_or_default(),
                failed = count,
                nodes,
                uptime = ?connection.connected_for(),
                "{} node disconnected",
                S::NAME
            ),
            (Some(connection), Some(reason)) => warn!(
                connection = %id,
                ip = connection.reported_ip().unwrap_or_default(),
                failed = count,
                nodes,
                uptime = ?connection.connected_for(),
                error = %reason,
                "{} node dropped",
                S::NAME
            ),
            (None, Some(reason)) => warn!(connection = %id, error = %reason, "Node handshake failed"),
            (None, None) => debug!(connection = %id, "Unverified connection closed"),
        }
        count
    }

    /// Number of verified connections eligible for work.
    pub fn node_count(&self) -> usize {
        self.state.lock().pool.len()
    }

    /// Number of registered connections, verified or not.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Number of requests awaiting a result.
    pub fn pending_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Number of requests awaiting a result from one connection.
    pub fn pending_on(&self, id: ConnectionId) -> usize {
        self.state
            .lock()
            .connections
            .get(&id)
            .map(NodeConnection::pending_count)
            .unwrap_or(0)
    }

    /// State of a registered connection. Removed connections report `Closed`.
    pub fn connection_state(&self, id: ConnectionId) -> ConnectionState {
        self.state
            .lock()
            .connections
            .get(&id)
            .map(NodeConnection::state)
            .unwrap_or(ConnectionState::Closed)
    }
}
