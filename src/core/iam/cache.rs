//! LRU cache of compiled condition expressions
//!
//! Keyed by expression source text. Safe for concurrent lookups and inserts:
//! parsing happens outside the lock and only fully compiled expressions are
//! inserted, so a reader never observes a partial entry.

use super::condition::Expr;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Shared cache of parsed expressions
pub struct ConditionCache {
    cache: Option<Mutex<LruCache<String, Arc<Expr>>>>,
}

impl ConditionCache {
    /// Create a cache holding at most `capacity` expressions
    ///
    /// A capacity of zero disables caching entirely.
    pub fn new(capacity: usize) -> Self {
        ConditionCache {
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Return the cached expression for `source`, compiling it on a miss
    ///
    /// Compilation errors are returned and never cached.
    pub fn get_or_compile<E, F>(&self, source: &str, compile: F) -> Result<Arc<Expr>, E>
    where
        F: FnOnce(&str) -> Result<Expr, E>,
    {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return compile(source).map(Arc::new),
        };

        if let Some(hit) = cache.lock().get(source) {
            return Ok(Arc::clone(hit));
        }

        let compiled = Arc::new(compile(source)?);

        // Another thread may have inserted the same source meanwhile; both
        // entries are equivalent so last write wins
        cache.lock().put(source.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Clear the cache
    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }

    /// Number of cached expressions
    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::iam::condition::{parse, ConditionError, ConditionLimits};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn compile(source: &str) -> Result<Expr, ConditionError> {
        parse(source, &ConditionLimits::default())
    }

    #[test]
    fn test_cache_basic() {
        let cache = ConditionCache::new(10);
        assert_eq!(cache.len(), 0);

        let first = cache.get_or_compile("a == 1", compile).unwrap();
        let second = cache.get_or_compile("a == 1", compile).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_compiles_once_per_source() {
        let cache = ConditionCache::new(10);
        let compilations = AtomicUsize::new(0);

        for _ in 0..5 {
            cache
                .get_or_compile("a == 1", |s| {
                    compilations.fetch_add(1, Ordering::SeqCst);
                    compile(s)
                })
                .unwrap();
        }

        assert_eq!(compilations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let cache = ConditionCache::new(2);

        cache.get_or_compile("a == 1", compile).unwrap();
        cache.get_or_compile("a == 2", compile).unwrap();
        cache.get_or_compile("a == 3", compile).unwrap(); // Should evict `a == 1`

        assert_eq!(cache.len(), 2);

        let compilations = AtomicUsize::new(0);
        cache
            .get_or_compile("a == 1", |s| {
                compilations.fetch_add(1, Ordering::SeqCst);
                compile(s)
            })
            .unwrap();
        assert_eq!(compilations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = ConditionCache::new(10);

        assert!(cache.get_or_compile("a ==", compile).is_err());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = ConditionCache::new(0);

        assert!(cache.get_or_compile("a == 1", compile).is_ok());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_cache_clear() {
        let cache = ConditionCache::new(10);
        cache.get_or_compile("a == 1", compile).unwrap();
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_concurrent_get_or_compile() {
        let cache = Arc::new(ConditionCache::new(16));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let source = format!("a == {}", (i + t) % 8);
                        assert!(cache.get_or_compile(&source, compile).is_ok());
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.len(), 8);
    }
}
