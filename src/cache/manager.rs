//! Query cache manager.
//!
//! Stores the identifiers produced by a query under its [`QueryKey`] and turns
//! them back into entities on later lookups. When every cached id is resident
//! in the entity cache each one is point-loaded; otherwise the ids are reloaded
//! in bounded batches and put back into their original order. Ids that no
//! longer resolve are dropped without error.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, instrument, warn};

use super::adapters::{EntityCache, EntityLoader, FetchSpec, ResultItem, TypeHierarchy};
use super::config::CacheConfig;
use super::error::QueryCacheError;
use super::keys::QueryKey;
use super::result::{CapturedFailure, QueryResult};
use super::store::QueryCacheStore;
use super::value::EntityId;

const METRIC_HIT_TOTAL: &str = "querycache_hit_total";
const METRIC_MISS_TOTAL: &str = "querycache_miss_total";
const METRIC_FAST_PATH_TOTAL: &str = "querycache_fast_path_total";
const METRIC_SLOW_PATH_TOTAL: &str = "querycache_slow_path_total";
const METRIC_BATCH_LOAD_TOTAL: &str = "querycache_batch_load_total";
const METRIC_STALE_ID_DROPPED_TOTAL: &str = "querycache_stale_id_dropped_total";
const METRIC_INVALIDATE_TOTAL: &str = "querycache_invalidate_total";
const METRIC_SLOW_PATH_MS: &str = "querycache_slow_path_ms";

/// Outcome of a cache lookup.
///
/// `Miss` tells the caller to run the real query and store its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Hit(T),
    Miss,
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    pub fn hit(self) -> Option<T> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Self::Hit(value) => Lookup::Hit(f(value)),
            Self::Miss => Lookup::Miss,
        }
    }
}

pub struct QueryCacheManager<L: EntityLoader> {
    config: CacheConfig,
    store: Arc<dyn QueryCacheStore>,
    entity_cache: Arc<dyn EntityCache>,
    loader: Arc<L>,
    hierarchy: Arc<dyn TypeHierarchy>,
}

impl<L: EntityLoader> QueryCacheManager<L> {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn QueryCacheStore>,
        entity_cache: Arc<dyn EntityCache>,
        loader: Arc<L>,
        hierarchy: Arc<dyn TypeHierarchy>,
    ) -> Self {
        Self {
            config,
            store,
            entity_cache,
            loader,
            hierarchy,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Look up a cached list query.
    #[instrument(skip_all, fields(query = %key))]
    pub fn lookup_list(
        &self,
        key: &QueryKey,
        fetch: &FetchSpec,
    ) -> Result<Lookup<Vec<L::Entity>>, QueryCacheError> {
        let Some(cached) = self.cached(key) else {
            return Ok(Lookup::Miss);
        };
        if let Some(failure) = cached.failure() {
            return Err(QueryCacheError::replay(failure));
        }
        self.resolve(cached.type_name(), cached.ids(), fetch)
            .map(Lookup::Hit)
    }

    /// Look up a cached single-result query.
    ///
    /// `Hit(None)` records that the query found nothing, which is different
    /// from `Miss`. A failure captured when the result was stored is raised
    /// again on every lookup.
    #[instrument(skip_all, fields(query = %key))]
    pub fn lookup_single(
        &self,
        key: &QueryKey,
        fetch: &FetchSpec,
    ) -> Result<Lookup<Option<L::Entity>>, QueryCacheError> {
        let Some(cached) = self.cached(key) else {
            return Ok(Lookup::Miss);
        };
        if let Some(failure) = cached.failure() {
            return Err(QueryCacheError::replay(failure));
        }

        let ids = cached.ids();
        if ids.len() > 1 {
            debug!(
                ignored = ids.len() - 1,
                "Single-result query cached several ids; using the first"
            );
        }
        let entity = self
            .resolve(cached.type_name(), &ids[..ids.len().min(1)], fetch)?
            .into_iter()
            .next();
        Ok(Lookup::Hit(entity))
    }

    /// Store the ids of a list query's result.
    #[instrument(skip_all, fields(query = %key, type_name = %type_name))]
    pub fn put_list<R: ResultItem>(
        &self,
        key: &QueryKey,
        items: &[R],
        type_name: &str,
        related_types: &[&str],
    ) {
        if !self.config.enabled {
            return;
        }
        let ids: Vec<EntityId> = items.iter().filter_map(ResultItem::entity_id).collect();
        let tags = self.expand_tags(type_name, related_types);
        debug!(ids = ids.len(), tags = tags.len(), "Caching query result");
        self.store
            .put(key.clone(), QueryResult::new(ids, type_name, tags));
    }

    /// Store a single-result query's outcome, or the failure it raised.
    #[instrument(skip_all, fields(query = %key, type_name = %type_name))]
    pub fn put_single<R: ResultItem>(
        &self,
        key: &QueryKey,
        item: Option<&R>,
        type_name: &str,
        related_types: &[&str],
        failure: Option<CapturedFailure>,
    ) {
        if !self.config.enabled {
            return;
        }
        let tags = self.expand_tags(type_name, related_types);
        let ids: Vec<EntityId> = item.and_then(ResultItem::entity_id).into_iter().collect();

        let result = match failure {
            Some(failure) if key.single_result() => {
                debug!(kind = failure.kind(), "Caching single-result failure");
                QueryResult::failed(type_name, tags, failure)
            }
            Some(failure) => {
                warn!(
                    kind = failure.kind(),
                    "Dropped captured failure for a query that is not single-result"
                );
                QueryResult::new(ids, type_name, tags)
            }
            None => QueryResult::new(ids, type_name, tags),
        };
        self.store.put(key.clone(), result);
    }

    /// Evict every result tagged with the type or one of its descendants.
    #[instrument(skip(self))]
    pub fn invalidate(&self, type_name: &str) {
        self.invalidate_types(&[type_name]);
    }

    #[instrument(skip(self))]
    pub fn invalidate_types(&self, type_names: &[&str]) {
        if !self.config.enabled {
            return;
        }
        let mut targets = BTreeSet::new();
        for type_name in type_names {
            targets.insert(type_name.to_string());
            targets.extend(self.hierarchy.descendants_of(type_name));
        }
        debug!(targets = ?targets, "Invalidating query results");
        self.store.invalidate_types(&targets);
        counter!(METRIC_INVALIDATE_TOTAL, "scope" => "types").increment(1);
    }

    #[instrument(skip(self))]
    pub fn invalidate_all(&self) {
        if !self.config.enabled {
            return;
        }
        self.store.invalidate_all();
        counter!(METRIC_INVALIDATE_TOTAL, "scope" => "all").increment(1);
    }

    fn cached(&self, key: &QueryKey) -> Option<QueryResult> {
        if !self.config.enabled {
            return None;
        }
        match self.store.get(key) {
            Some(result) => {
                counter!(METRIC_HIT_TOTAL).increment(1);
                Some(result)
            }
            None => {
                counter!(METRIC_MISS_TOTAL).increment(1);
                debug!("Query cache miss");
                None
            }
        }
    }

    fn expand_tags(&self, type_name: &str, related_types: &[&str]) -> BTreeSet<String> {
        let mut tags = BTreeSet::new();
        for name in std::iter::once(&type_name).chain(related_types) {
            tags.insert(name.to_string());
            tags.extend(self.hierarchy.descendants_of(name));
        }
        tags.remove(type_name);
        tags
    }

    fn resolve(
        &self,
        type_name: &str,
        ids: &[EntityId],
        fetch: &FetchSpec,
    ) -> Result<Vec<L::Entity>, QueryCacheError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids
            .iter()
            .all(|id| self.entity_cache.contains(type_name, id))
        {
            counter!(METRIC_FAST_PATH_TOTAL).increment(1);
            self.load_each(type_name, ids, fetch)
        } else {
            counter!(METRIC_SLOW_PATH_TOTAL).increment(1);
            self.load_in_batches(type_name, ids, fetch)
        }
    }

    fn load_each(
        &self,
        type_name: &str,
        ids: &[EntityId],
        fetch: &FetchSpec,
    ) -> Result<Vec<L::Entity>, QueryCacheError> {
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            match self.loader.find(type_name, id, fetch)? {
                Some(entity) => entities.push(entity),
                None => stale_id(type_name, id, "fast"),
            }
        }
        Ok(entities)
    }

    fn load_in_batches(
        &self,
        type_name: &str,
        ids: &[EntityId],
        fetch: &FetchSpec,
    ) -> Result<Vec<L::Entity>, QueryCacheError> {
        let started_at = Instant::now();
        let batch_size = self.config.max_batch_size_non_zero().get();

        let mut loaded: HashMap<EntityId, L::Entity> = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(batch_size) {
            counter!(METRIC_BATCH_LOAD_TOTAL).increment(1);
            for entity in self.loader.load_by_ids(type_name, chunk, fetch)? {
                if let Some(id) = entity.entity_id() {
                    loaded.insert(id, entity);
                }
            }
        }

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            match loaded.get(id) {
                Some(entity) => entities.push(entity.clone()),
                None => stale_id(type_name, id, "slow"),
            }
        }

        histogram!(METRIC_SLOW_PATH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        debug!(
            requested = ids.len(),
            resolved = entities.len(),
            batch_size,
            "Reloaded cached ids in batches"
        );
        Ok(entities)
    }
}

fn stale_id(type_name: &str, id: &EntityId, path: &'static str) {
    counter!(METRIC_STALE_ID_DROPPED_TOTAL, "path" => path).increment(1);
    debug!(type_name, id = %id, path, "Dropped cached id that no longer resolves");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_helpers() {
        let hit: Lookup<Vec<u8>> = Lookup::Hit(vec![1]);
        assert!(hit.is_hit());
        assert_eq!(hit.clone().map(|v| v.len()), Lookup::Hit(1));
        assert_eq!(hit.hit(), Some(vec![1]));

        let miss: Lookup<Vec<u8>> = Lookup::Miss;
        assert!(miss.is_miss());
        assert_eq!(miss.hit(), None);
    }
}
