//! Bounded cache from source text to parsed trees.
//!
//! Small sources parse often (configuration snippets, templated
//! expressions), so the engine keeps an LRU of prepared trees. Sources
//! longer than the threshold bypass the cache entirely; a non-positive
//! capacity disables it. Reads and writes synchronize on one internal
//! lock, so the cache is safe to share across evaluating threads.

use std::sync::{Arc, Mutex};

use ahash::RandomState;
use indexmap::IndexMap;

use crate::expressions::Ast;

/// Default length above which sources are not cached.
pub const DEFAULT_CACHE_THRESHOLD: usize = 64;

/// Default number of cached trees.
pub const DEFAULT_CACHE_SIZE: i32 = 256;

pub(crate) struct SourceCache {
    inner: Option<Mutex<CacheInner>>,
    threshold: usize,
}

struct CacheInner {
    /// Insertion order doubles as recency order: front is the eviction
    /// candidate, back the most recently used.
    map: IndexMap<String, Arc<Ast>, RandomState>,
    capacity: usize,
}

impl SourceCache {
    /// A cache of `capacity` entries; non-positive disables caching.
    pub fn new(capacity: i32, threshold: usize) -> Self {
        let inner = usize::try_from(capacity).ok().filter(|&c| c > 0).map(|capacity| {
            Mutex::new(CacheInner {
                map: IndexMap::default(),
                capacity,
            })
        });
        Self { inner, threshold }
    }

    /// Looks up a source, refreshing its recency on a hit.
    pub fn get(&self, source: &str) -> Option<Arc<Ast>> {
        if source.len() > self.threshold {
            return None;
        }
        let inner = self.inner.as_ref()?;
        let mut inner = inner.lock().expect("source cache lock");
        let ast = inner.map.shift_remove(source)?;
        inner.map.insert(source.to_string(), Arc::clone(&ast));
        Some(ast)
    }

    /// Stores a parsed tree, evicting the least recently used entry.
    pub fn put(&self, source: &str, ast: &Arc<Ast>) {
        if source.len() > self.threshold {
            return;
        }
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let mut inner = inner.lock().expect("source cache lock");
        if inner.map.shift_remove(source).is_none() {
            while inner.map.len() >= inner.capacity {
                inner.map.shift_remove_index(0);
            }
        }
        inner.map.insert(source.to_string(), Arc::clone(ast));
    }

    /// Number of cached entries; for tests.
    pub fn len(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.lock().expect("source cache lock").map.len())
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expressions::Block,
        frame::FrameTemplate,
    };

    fn dummy_ast(source: &str) -> Arc<Ast> {
        Arc::new(Ast {
            body: Block::default(),
            frame: FrameTemplate::default(),
            lambdas: Vec::new(),
            pragmas: Vec::new(),
            source: source.to_string(),
            name: None,
        })
    }

    #[test]
    fn lru_eviction() {
        let cache = SourceCache::new(2, DEFAULT_CACHE_THRESHOLD);
        cache.put("a", &dummy_ast("a"));
        cache.put("b", &dummy_ast("b"));
        assert!(cache.get("a").is_some()); // refresh 'a'
        cache.put("c", &dummy_ast("c"));
        assert!(cache.get("b").is_none(), "b was least recently used");
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn threshold_bypass() {
        let cache = SourceCache::new(8, 4);
        cache.put("a long source", &dummy_ast("a long source"));
        assert_eq!(cache.len(), 0);
        assert!(cache.get("a long source").is_none());
    }

    #[test]
    fn non_positive_capacity_disables() {
        let cache = SourceCache::new(0, DEFAULT_CACHE_THRESHOLD);
        assert!(!cache.is_enabled());
        cache.put("a", &dummy_ast("a"));
        assert!(cache.get("a").is_none());
    }
}
