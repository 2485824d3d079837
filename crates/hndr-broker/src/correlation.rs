//! Request correlation.
//!
//! Every dispatched task gets a broker-assigned [`RequestId`] and an entry in
//! the [`RequestTable`]. The entry holds the caller's one-shot completion and
//! the connection the task went to. An entry is removed exactly once, either
//! by a matching result or by its connection closing, which is what makes
//! completion at-most-once.

use crate::node::ConnectionId;
use hndr_common::protocol::{RequestId, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Caller side of a pending request.
pub type Completion<T> = oneshot::Receiver<Result<T>>;

/// A dispatched task awaiting its result.
#[derive(Debug)]
pub struct PendingRequest<T> {
    owner: ConnectionId,
    completion: oneshot::Sender<Result<T>>,
    dispatched_at: Instant,
}

impl<T> PendingRequest<T> {
    /// Create a pending entry and the receiver its caller awaits.
    pub fn new(owner: ConnectionId) -> (Self, Completion<T>) {
        let (completion, rx) = oneshot::channel();
        let pending = Self {
            owner,
            completion,
            dispatched_at: Instant::now(),
        };
        (pending, rx)
    }

    /// Connection the task was sent to.
    pub fn owner(&self) -> ConnectionId {
        self.owner
    }

    pub fn elapsed(&self) -> Duration {
        self.dispatched_at.elapsed()
    }

    /// Complete the request.
    ///
    /// Consumes the entry. Returns `false` if the caller already stopped
    /// waiting, in which case the outcome is discarded.
    pub fn resolve(self, outcome: Result<T>) -> bool {
        self.completion.send(outcome).is_ok()
    }
}

/// Pending requests keyed by ID, plus the ID counter.
#[derive(Debug)]
pub struct RequestTable<T> {
    next_id: RequestId,
    pending: HashMap<RequestId, PendingRequest<T>>,
}

impl<T> Default for RequestTable<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
        }
    }
}

impl<T> RequestTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next request ID.
    ///
    /// Starts at 0 and increases by one per call. IDs are never reused within
    /// the life of the process (the counter would need 2^64 dispatches to wrap).
    pub fn allocate_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    pub fn insert(&mut self, id: RequestId, pending: PendingRequest<T>) {
        self.pending.insert(id, pending);
    }

    /// Take the entry for `id`, if it is still pending.
    pub fn remove(&mut self, id: RequestId) -> Option<PendingRequest<T>> {
        self.pending.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hndr_common::protocol::BrokerError;

    #[test]
    fn test_ids_start_at_zero_and_increase() {
        let mut table: RequestTable<u32> = RequestTable::new();
        assert_eq!(table.allocate_id(), 0);
        assert_eq!(table.allocate_id(), 1);
        assert_eq!(table.allocate_id(), 2);
    }

    #[test]
    fn test_insert_and_remove_once() {
        let mut table: RequestTable<u32> = RequestTable::new();
        let id = table.allocate_id();
        let (pending, _rx) = PendingRequest::new(ConnectionId(1));
        table.insert(id, pending);

        assert_eq!(table.len(), 1);

        let entry = table.remove(id).unwrap();
        assert_eq!(entry.owner(), ConnectionId(1));
        assert!(table.remove(id).is_none());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_delivers_outcome() {
        let (pending, rx) = PendingRequest::<u32>::new(ConnectionId(1));
        assert!(pending.resolve(Ok(5)));
        assert_eq!(rx.await.unwrap().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_resolve_delivers_error() {
        let (pending, rx) = PendingRequest::<u32>::new(ConnectionId(1));
        assert!(pending.resolve(Err(BrokerError::NodeDisconnected)));
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, BrokerError::NodeDisconnected));
    }

    #[test]
    fn test_resolve_after_caller_gone() {
        let (pending, rx) = PendingRequest::<u32>::new(ConnectionId(1));
        drop(rx);
        assert!(!pending.resolve(Ok(1)));
    }
}
