//! Query result storage.

use std::collections::BTreeSet;
use std::sync::RwLock;

use lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::config::CacheConfig;
use super::keys::QueryKey;
use super::lock::{rw_read, rw_write};
use super::registry::TypeRegistry;
use super::result::QueryResult;

const SOURCE: &str = "cache::store";
const METRIC_STORE_EVICT_TOTAL: &str = "querycache_store_evict_total";

/// Shared region holding query results, keyed by [`QueryKey`].
///
/// Implementations must be safe to call from many threads at once; the
/// manager adds no locking of its own.
pub trait QueryCacheStore: Send + Sync {
    fn get(&self, key: &QueryKey) -> Option<QueryResult>;

    fn put(&self, key: QueryKey, result: QueryResult);

    /// Drop every result tagged with the type name.
    fn invalidate_type(&self, type_name: &str);

    fn invalidate_types(&self, type_names: &BTreeSet<String>) {
        for type_name in type_names {
            self.invalidate_type(type_name);
        }
    }

    fn invalidate_all(&self);
}

/// In-process LRU store with type-tag bookkeeping.
///
/// Lock order is always results, then registry.
pub struct InMemoryQueryStore {
    results: RwLock<LruCache<QueryKey, QueryResult>>,
    registry: TypeRegistry,
}

impl InMemoryQueryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            results: RwLock::new(LruCache::new(config.query_result_limit_non_zero())),
            registry: TypeRegistry::new(),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.results, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Type names the key is currently filed under.
    pub fn tags_for(&self, key: &QueryKey) -> BTreeSet<String> {
        self.registry.types_for_key(key)
    }

    fn evict_keys_for<'a>(&self, type_names: impl IntoIterator<Item = &'a str>, op: &'static str) {
        let mut results = rw_write(&self.results, SOURCE, op);
        let keys = self.registry.take_keys_for_types(type_names);
        for key in &keys {
            results.pop(key);
        }
        debug!(removed = keys.len(), op, "Invalidated query results by type");
    }
}

impl QueryCacheStore for InMemoryQueryStore {
    fn get(&self, key: &QueryKey) -> Option<QueryResult> {
        rw_write(&self.results, SOURCE, "get").get(key).cloned()
    }

    fn put(&self, key: QueryKey, result: QueryResult) {
        let tags: Vec<String> = result.type_tags().map(str::to_string).collect();

        let mut results = rw_write(&self.results, SOURCE, "put");
        // `push` also hands back the old entry when the key was already present.
        let displaced = results.push(key.clone(), result);
        if let Some((evicted, _)) = displaced.filter(|(evicted, _)| *evicted != key) {
            self.registry.unregister(&evicted);
            counter!(METRIC_STORE_EVICT_TOTAL).increment(1);
            debug!(evicted = %evicted, "Evicted least recently used query result");
        }
        self.registry.register(&key, tags.iter().map(String::as_str));
    }

    fn invalidate_type(&self, type_name: &str) {
        self.evict_keys_for([type_name], "invalidate_type");
    }

    fn invalidate_types(&self, type_names: &BTreeSet<String>) {
        self.evict_keys_for(type_names.iter().map(String::as_str), "invalidate_types");
    }

    fn invalidate_all(&self) {
        let mut results = rw_write(&self.results, SOURCE, "invalidate_all");
        results.clear();
        self.registry.clear();
    }
}
