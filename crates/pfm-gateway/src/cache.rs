//! Response cache keyed by request shape.
//!
//! Entries expire by TTL only. Stores do not invalidate, so a cached answer
//! can trail a write by up to `ttl_secs`.

use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use serde_json::json;

use crate::config::CacheConfig;
use crate::types::{GatewayQuery, GatewayResponse};

/// Stable key for a request: BLAKE3 over `{type, target, parameters}`.
/// The request `context` is not part of the key.
pub fn cache_key(query: &GatewayQuery) -> String {
    let canonical = json!({
        "type": query.query_type,
        "target": query.target,
        "parameters": query.parameters,
    });
    blake3::hash(canonical.to_string().as_bytes()).to_hex().to_string()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

pub struct ResponseCache {
    cache: Cache<String, GatewayResponse>,
    min_cacheable_ms: f64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.ttl())
                .build(),
            min_cacheable_ms: config.min_cacheable_ms,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<GatewayResponse> {
        match self.cache.get(key) {
            Some(hit) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(hit)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Successful responses slower than the floor are worth keeping.
    pub fn should_cache(&self, response: &GatewayResponse) -> bool {
        response.success && response.metadata.execution_time_ms > self.min_cacheable_ms
    }

    pub fn insert(&self, key: String, response: GatewayResponse) {
        self.cache.insert(key, response);
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QueryType, RequestContext};

    fn response(ms: f64, success: bool) -> GatewayResponse {
        let mut r = GatewayResponse::failure(QueryType::Similarity, "x");
        r.success = success;
        r.metadata.execution_time_ms = ms;
        r
    }

    #[test]
    fn test_key_ignores_context_and_param_order() {
        let a = GatewayQuery::new(QueryType::Similarity)
            .target("observer")
            .param("limit", 5)
            .param("minScore", 0.2);
        let mut b = GatewayQuery::new(QueryType::Similarity)
            .target("observer")
            .param("minScore", 0.2)
            .param("limit", 5);
        b.context = Some(RequestContext {
            session_id: Some("s".into()),
            ..RequestContext::default()
        });
        assert_eq!(cache_key(&a), cache_key(&b));

        let c = GatewayQuery::new(QueryType::Relationship).target("observer");
        assert_ne!(cache_key(&a), cache_key(&c));
    }

    #[test]
    fn test_should_cache_floor() {
        let cache = ResponseCache::new(&CacheConfig::default());
        assert!(cache.should_cache(&response(25.0, true)));
        assert!(!cache.should_cache(&response(2.0, true)));
        assert!(!cache.should_cache(&response(25.0, false)));
    }

    #[test]
    fn test_hit_miss_counters_and_clear() {
        let cache = ResponseCache::new(&CacheConfig::default());
        assert!(cache.get("k").is_none());
        cache.insert("k".into(), response(25.0, true));
        assert!(cache.get("k").is_some());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));

        cache.clear();
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().entries, 0);
    }
}
