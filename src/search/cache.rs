//! Short-lived memo of search responses.
//!
//! Collapses repeated identical queries (double submits, scroll-throughs)
//! into one engine call. Entries expire a fixed TTL after insertion and are
//! evicted lazily on read; the LRU bound caps memory between reads. Index
//! mutations never invalidate entries, so results may be stale for up to one
//! TTL.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use fxhash::FxBuildHasher;
use lru::LruCache;
use parking_lot::Mutex;

use crate::model::{Actor, ResourceReference, SearchRequest, SearchResponse};

/// Everything that distinguishes one response from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: String,
    pub page_size: i32,
    pub reference: ResourceReference,
    pub page_token: String,
    pub include_trashed: bool,
    pub actor_id: String,
}

impl CacheKey {
    pub fn new(request: &SearchRequest, actor: &Actor) -> Self {
        Self {
            query: request.query.clone(),
            page_size: request.page_size,
            reference: request.reference.clone(),
            page_token: request.page_token.clone(),
            include_trashed: request.include_trashed,
            actor_id: actor.id.clone(),
        }
    }
}

struct Entry {
    inserted_at: Instant,
    response: SearchResponse,
}

pub struct ResultCache {
    ttl: Duration,
    entries: Mutex<LruCache<CacheKey, Entry, FxBuildHasher>>,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::with_hasher(capacity, FxBuildHasher::default())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh response for `key`, evicting it if expired.
    pub fn get(&self, key: &CacheKey) -> Option<SearchResponse> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                return Some(entry.response.clone());
            }
            Some(_) => {}
            None => return None,
        }
        entries.pop(key);
        None
    }

    pub fn put(&self, key: CacheKey, response: SearchResponse) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.lock().put(
            key,
            Entry {
                inserted_at: Instant::now(),
                response,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(id: &str) -> Actor {
        Actor {
            id: id.into(),
            username: id.into(),
            ..Actor::default()
        }
    }

    fn response(total: i64) -> SearchResponse {
        SearchResponse {
            total_matches: total,
            ..SearchResponse::default()
        }
    }

    #[test]
    fn hit_within_ttl_and_miss_after() {
        let cache = ResultCache::new(Duration::from_millis(50), 16);
        let key = CacheKey::new(&SearchRequest::new("q", 10), &actor("a"));
        cache.put(key.clone(), response(3));
        assert_eq!(cache.get(&key).map(|r| r.total_matches), Some(3));
        std::thread::sleep(Duration::from_millis(80));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty(), "expired entry evicted on read");
    }

    #[test]
    fn keys_separate_actors_pages_and_scopes() {
        let cache = ResultCache::new(Duration::from_secs(60), 16);
        let request = SearchRequest::new("q", 10);
        cache.put(CacheKey::new(&request, &actor("a")), response(1));

        assert!(cache.get(&CacheKey::new(&request, &actor("b"))).is_none());

        let mut next_page = request.clone();
        next_page.page_token = "tok".into();
        assert!(cache.get(&CacheKey::new(&next_page, &actor("a"))).is_none());

        let mut scoped = request.clone();
        scoped.reference = ResourceReference::space("s1");
        assert!(cache.get(&CacheKey::new(&scoped, &actor("a"))).is_none());

        let mut sized = request;
        sized.page_size = 11;
        assert!(cache.get(&CacheKey::new(&sized, &actor("a"))).is_none());
    }

    #[test]
    fn separator_characters_cannot_collide() {
        let cache = ResultCache::new(Duration::from_secs(60), 16);
        let a = CacheKey::new(&SearchRequest::new("x|1", 1), &actor("a"));
        let b = CacheKey::new(&SearchRequest::new("x", 1), &actor("1|a"));
        cache.put(a, response(1));
        assert!(cache.get(&b).is_none());
    }

    #[test]
    fn capacity_bounds_entries() {
        let cache = ResultCache::new(Duration::from_secs(60), 2);
        for i in 0..5 {
            cache.put(
                CacheKey::new(&SearchRequest::new(format!("q{i}"), 1), &actor("a")),
                response(i),
            );
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = ResultCache::new(Duration::ZERO, 2);
        let key = CacheKey::new(&SearchRequest::new("q", 1), &actor("a"));
        cache.put(key.clone(), response(1));
        assert!(cache.get(&key).is_none());
    }
}
