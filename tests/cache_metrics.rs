use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use querycache::cache::{
    CacheConfig, EntityCache, EntityId, EntityLoader, FetchSpec, InMemoryQueryStore,
    PersistenceError, QueryCacheManager, QueryKey, ResultItem, StaticTypeHierarchy, TypeKind,
};

#[derive(Debug, Clone)]
struct Row(i64);

impl ResultItem for Row {
    fn entity_id(&self) -> Option<EntityId> {
        Some(EntityId::from(self.0))
    }
}

/// Only even ids are resident in the entity cache.
struct EvenResident;

impl EntityCache for EvenResident {
    fn contains(&self, _type_name: &str, id: &EntityId) -> bool {
        matches!(id, EntityId::Int(value) if value % 2 == 0)
    }
}

/// Resolves every id except 3.
struct TableLoader {
    rows: HashMap<EntityId, Row>,
}

impl TableLoader {
    fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            rows: ids
                .into_iter()
                .filter(|id| *id != 3)
                .map(|id| (EntityId::from(id), Row(id)))
                .collect(),
        }
    }
}

impl EntityLoader for TableLoader {
    type Entity = Row;

    fn find(
        &self,
        _type_name: &str,
        id: &EntityId,
        _fetch: &FetchSpec,
    ) -> Result<Option<Row>, PersistenceError> {
        Ok(self.rows.get(id).cloned())
    }

    fn load_by_ids(
        &self,
        _type_name: &str,
        ids: &[EntityId],
        _fetch: &FetchSpec,
    ) -> Result<Vec<Row>, PersistenceError> {
        Ok(ids.iter().filter_map(|id| self.rows.get(id).cloned()).collect())
    }
}

fn key(text: &str) -> QueryKey {
    QueryKey::builder(text).build().expect("key")
}

#[test]
fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let config = CacheConfig {
        query_result_limit: 2,
        max_batch_size: 2,
        ..Default::default()
    };
    let store = Arc::new(InMemoryQueryStore::new(&config));
    let hierarchy = StaticTypeHierarchy::new().with_type("Row", None, TypeKind::Concrete);
    let manager = QueryCacheManager::new(
        config,
        store,
        Arc::new(EvenResident),
        Arc::new(TableLoader::new(1..=6)),
        Arc::new(hierarchy),
    );
    let fetch = FetchSpec::default();

    // Miss, then a slow-path hit that drops the deleted id 3.
    let odd = key("select r from Row r where mod(r.id, 2) = 1");
    assert!(manager.lookup_list(&odd, &fetch).expect("lookup").is_miss());
    manager.put_list(&odd, &[Row(1), Row(3), Row(5)], "Row", &[]);
    let resolved = manager
        .lookup_list(&odd, &fetch)
        .expect("lookup")
        .hit()
        .expect("hit");
    assert_eq!(resolved.len(), 2);

    // Fast-path hit over resident ids.
    let even = key("select r from Row r where mod(r.id, 2) = 0");
    manager.put_list(&even, &[Row(2), Row(4)], "Row", &[]);
    assert!(manager.lookup_list(&even, &fetch).expect("lookup").is_hit());

    // Third key overflows the store.
    manager.put_list(&key("select r from Row r"), &[Row(6)], "Row", &[]);

    manager.invalidate("Row");
    manager.invalidate_all();

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "querycache_hit_total",
        "querycache_miss_total",
        "querycache_fast_path_total",
        "querycache_slow_path_total",
        "querycache_batch_load_total",
        "querycache_stale_id_dropped_total",
        "querycache_store_evict_total",
        "querycache_invalidate_total",
        "querycache_slow_path_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
