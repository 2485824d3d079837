use crate::node::ConnectionId;
use rand::seq::SliceRandom;
use rand::Rng;

/// Set of verified connections eligible to receive work.
///
/// Selection is uniformly random. There is no per-node capacity or
/// in-flight limit; a slow node still gets its share.
#[derive(Debug, Default)]
pub struct NodePool {
    members: Vec<ConnectionId>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the pool. Duplicates are ignored.
    pub fn add(&mut self, id: ConnectionId) {
        if !self.members.contains(&id) {
            self.members.push(id);
        }
    }

    /// Remove a connection from the pool.
    ///
    /// Returns whether it was a member.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        let before = self.members.len();
        self.members.retain(|member| *member != id);
        self.members.len() != before
    }

    /// Pick a member uniformly at random, or `None` if the pool is empty.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ConnectionId> {
        self.members.choose(rng).copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_empty_pool_picks_none() {
        let pool = NodePool::new();
        assert!(pool.is_empty());
        assert_eq!(pool.pick(&mut rng()), None);
    }

    #[test]
    fn test_single_member() {
        let mut pool = NodePool::new();
        pool.add(ConnectionId(3));
        let mut rng = rng();
        assert_eq!(pool.pick(&mut rng), Some(ConnectionId(3)));
        assert_eq!(pool.pick(&mut rng), Some(ConnectionId(3)));
    }

    #[test]
    fn test_add_duplicate() {
        let mut pool = NodePool::new();
        pool.add(ConnectionId(1));
        pool.add(ConnectionId(1));
        // duplicate
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut pool = NodePool::new();
        pool.add(ConnectionId(1));
        pool.add(ConnectionId(2));
        pool.add(ConnectionId(3));

        assert!(pool.remove(ConnectionId(2)));
        assert!(!pool.remove(ConnectionId(2)));
        assert_eq!(pool.len(), 2);

        let mut rng = rng();
        let seen: HashSet<_> = (0..200).filter_map(|_| pool.pick(&mut rng)).collect();
        assert_eq!(seen, HashSet::from([ConnectionId(1), ConnectionId(3)]));
    }

    #[test]
    fn test_pick_only_returns_members() {
        let mut pool = NodePool::new();
        pool.add(ConnectionId(1));
        pool.add(ConnectionId(2));
        pool.remove(ConnectionId(1));

        let mut rng = rng();
        for _ in 0..50 {
            assert_eq!(pool.pick(&mut rng), Some(ConnectionId(2)));
        }
    }

    #[test]
    fn test_pick_reaches_every_member() {
        let mut pool = NodePool::new();
        for i in 0..4 {
            pool.add(ConnectionId(i));
        }

        let mut rng = rng();
        let seen: HashSet<_> = (0..500).filter_map(|_| pool.pick(&mut rng)).collect();
        assert_eq!(seen.len(), 4);
    }
}
