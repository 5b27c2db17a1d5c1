//! The bounded post ring.
//!
//! Posts are kept in arrival order; when the ring is full the oldest
//! arrival is dropped. Sync queries look for the oldest post *by post
//! timestamp* that a given client still needs — arrival order and
//! timestamp order can differ when messages cross on the mesh.

use std::collections::VecDeque;
use std::sync::RwLock;

use meshcore_crypto::NodeId;

/// Default post capacity.
pub const DEFAULT_POST_CAPACITY: usize = 256;

/// One stored post.
#[derive(Debug, Clone)]
pub struct PostInfo {
    /// The author's message timestamp.
    pub timestamp: u32,
    /// The author.
    pub sender: NodeId,
    /// Message bytes.
    pub content: Vec<u8>,
}

/// The post ring.
pub struct PostStore {
    posts: RwLock<VecDeque<PostInfo>>,
    capacity: usize,
}

impl PostStore {
    /// Create a store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POST_CAPACITY)
    }

    /// Create a store with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            posts: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, VecDeque<PostInfo>> {
        match self.posts.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Store a post, dropping the oldest arrival when full.
    pub fn add(&self, post: PostInfo) {
        let mut posts = match self.posts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if posts.len() >= self.capacity {
            if let Some(dropped) = posts.pop_front() {
                tracing::debug!(timestamp = dropped.timestamp, "post ring full, dropped oldest");
            }
        }
        posts.push_back(post);
    }

    /// Number of stored posts.
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// The post with the smallest timestamp satisfying the predicate.
    pub fn oldest_where(&self, mut pred: impl FnMut(&PostInfo) -> bool) -> Option<PostInfo> {
        self.read()
            .iter()
            .filter(|p| pred(p))
            .min_by_key(|p| p.timestamp)
            .cloned()
    }

    /// Visit every post under the read lock, oldest arrival first.
    pub fn for_each(&self, mut f: impl FnMut(&PostInfo)) {
        for post in self.read().iter() {
            f(post);
        }
    }
}

impl Default for PostStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(timestamp: u32, sender_byte: u8) -> PostInfo {
        PostInfo {
            timestamp,
            sender: NodeId::from_bytes([sender_byte; 32]),
            content: vec![sender_byte],
        }
    }

    #[test]
    fn test_overflow_drops_oldest_arrival() {
        let store = PostStore::with_capacity(2);
        store.add(post(10, 1));
        store.add(post(20, 2));
        store.add(post(30, 3));

        assert_eq!(store.count(), 2);
        let mut timestamps = Vec::new();
        store.for_each(|p| timestamps.push(p.timestamp));
        assert_eq!(timestamps, vec![20, 30]);
    }

    #[test]
    fn test_oldest_where_uses_timestamp_not_arrival() {
        let store = PostStore::new();
        store.add(post(30, 1));
        store.add(post(10, 2));
        store.add(post(20, 3));

        let oldest = store.oldest_where(|_| true).expect("post");
        assert_eq!(oldest.timestamp, 10);
    }

    #[test]
    fn test_oldest_where_filters() {
        let store = PostStore::new();
        let excluded = NodeId::from_bytes([1; 32]);
        store.add(post(10, 1));
        store.add(post(20, 2));

        let oldest = store
            .oldest_where(|p| p.sender != excluded)
            .expect("post");
        assert_eq!(oldest.timestamp, 20);

        assert!(store.oldest_where(|p| p.timestamp > 99).is_none());
    }
}
