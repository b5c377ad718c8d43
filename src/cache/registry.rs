//! Bidirectional type registry.
//!
//! Records which cached query keys depend on which entity type names, so an
//! invalidation by type can find every affected key and an evicted key can
//! be removed from every type it was filed under.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use super::keys::QueryKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

#[derive(Default)]
struct Maps {
    type_to_keys: HashMap<String, HashSet<QueryKey>>,
    key_to_types: HashMap<QueryKey, BTreeSet<String>>,
}

impl Maps {
    fn unlink(&mut self, key: &QueryKey) -> bool {
        let Some(types) = self.key_to_types.remove(key) else {
            return false;
        };
        for type_name in types {
            if let Some(keys) = self.type_to_keys.get_mut(&type_name) {
                keys.remove(key);
                if keys.is_empty() {
                    self.type_to_keys.remove(&type_name);
                }
            }
        }
        true
    }
}

/// Tracks type → keys and key → types.
///
/// Both directions live behind one lock so they never disagree.
#[derive(Default)]
pub struct TypeRegistry {
    maps: RwLock<Maps>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a key under the given type names, replacing any earlier filing.
    pub fn register<'a>(&self, key: &QueryKey, type_names: impl IntoIterator<Item = &'a str>) {
        let mut maps = rw_write(&self.maps, SOURCE, "register");
        maps.unlink(key);

        let types: BTreeSet<String> = type_names.into_iter().map(str::to_string).collect();
        for type_name in &types {
            maps.type_to_keys
                .entry(type_name.clone())
                .or_default()
                .insert(key.clone());
        }
        maps.key_to_types.insert(key.clone(), types);
    }

    /// Remove a key from every type it was filed under.
    ///
    /// Returns false when the key was not registered.
    pub fn unregister(&self, key: &QueryKey) -> bool {
        rw_write(&self.maps, SOURCE, "unregister").unlink(key)
    }

    /// Remove and return every key filed under any of the given type names.
    pub fn take_keys_for_types<'a>(
        &self,
        type_names: impl IntoIterator<Item = &'a str>,
    ) -> HashSet<QueryKey> {
        let mut maps = rw_write(&self.maps, SOURCE, "take_keys_for_types");

        let mut affected = HashSet::new();
        for type_name in type_names {
            if let Some(keys) = maps.type_to_keys.get(type_name) {
                affected.extend(keys.iter().cloned());
            }
        }
        for key in &affected {
            maps.unlink(key);
        }
        affected
    }

    pub fn types_for_key(&self, key: &QueryKey) -> BTreeSet<String> {
        rw_read(&self.maps, SOURCE, "types_for_key")
            .key_to_types
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        let mut maps = rw_write(&self.maps, SOURCE, "clear");
        maps.type_to_keys.clear();
        maps.key_to_types.clear();
    }

    pub fn type_count(&self) -> usize {
        rw_read(&self.maps, SOURCE, "type_count").type_to_keys.len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.maps, SOURCE, "key_count").key_to_types.len()
    }
}
