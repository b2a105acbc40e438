//! Recovery cache keyed by session id.
//!
//! Entries expire after a TTL and the cache holds a bounded number of
//! sessions, evicting the least recently used one when full. Inserts for an
//! existing session replace the previous entry.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::reconciler::ReconstructedState;
use crate::snapshot::SessionId;

#[derive(Debug)]
struct Entry {
    state: ReconstructedState,
    inserted_at: Instant,
}

#[derive(Debug)]
pub struct RecoveryCache {
    ttl: Duration,
    entries: Mutex<LruCache<SessionId, Entry>>,
}

impl RecoveryCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fresh entry for `session_id`, dropping it if expired.
    pub fn get(&self, session_id: &SessionId) -> Option<ReconstructedState> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match entries.get(session_id) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                return Some(entry.state.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            tracing::debug!(session = %session_id, "Dropping expired cached recovery");
            entries.pop(session_id);
        }
        None
    }

    pub fn insert(&self, state: ReconstructedState) {
        let session = state.session_id.clone();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let displaced = entries.push(
            session.clone(),
            Entry {
                state,
                inserted_at: Instant::now(),
            },
        );
        match displaced {
            Some((evicted, _)) if evicted != session => {
                tracing::debug!(session = %evicted, "Evicting least recently used recovery");
            }
            _ => {}
        }
    }

    pub fn invalidate(&self, session_id: &SessionId) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(session_id);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::Reconciler;
    use pretty_assertions::assert_eq;

    fn state(id: &str) -> ReconstructedState {
        Reconciler::default().reconstruct(&SessionId::new(id), &[])
    }

    #[test]
    fn returns_fresh_entries() {
        let cache = RecoveryCache::new(Duration::from_secs(60), 4);
        cache.insert(state("a"));
        assert_eq!(
            cache.get(&SessionId::new("a")).map(|s| s.session_id),
            Some(SessionId::new("a"))
        );
        assert!(cache.get(&SessionId::new("b")).is_none());
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = RecoveryCache::new(Duration::from_millis(5), 4);
        cache.insert(state("a"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&SessionId::new("a")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_evicts_least_recently_used() {
        let cache = RecoveryCache::new(Duration::from_secs(60), 2);
        cache.insert(state("a"));
        cache.insert(state("b"));
        assert!(cache.get(&SessionId::new("a")).is_some());
        cache.insert(state("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&SessionId::new("b")).is_none());
        assert!(cache.get(&SessionId::new("a")).is_some());
        assert!(cache.get(&SessionId::new("c")).is_some());
    }

    #[test]
    fn reinsert_replaces_without_eviction() {
        let cache = RecoveryCache::new(Duration::from_secs(60), 2);
        cache.insert(state("a"));
        cache.insert(state("b"));
        cache.insert(state("a"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&SessionId::new("b")).is_some());
    }
}
