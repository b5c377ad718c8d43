//! Seams between the query cache and the persistence layer around it.

use std::collections::{BTreeMap, BTreeSet};

use super::error::PersistenceError;
use super::value::EntityId;

/// An item returned by a query.
///
/// Items that are not persistent entities (scalars, projections) report no id
/// and are left out of cached results.
pub trait ResultItem {
    fn entity_id(&self) -> Option<EntityId>;
}

/// Membership view of the second-level entity cache.
pub trait EntityCache: Send + Sync {
    fn contains(&self, type_name: &str, id: &EntityId) -> bool;
}

/// Loads entities by identifier.
pub trait EntityLoader: Send + Sync {
    type Entity: ResultItem + Clone;

    /// Point load. `Ok(None)` means the entity no longer exists.
    fn find(
        &self,
        type_name: &str,
        id: &EntityId,
        fetch: &FetchSpec,
    ) -> Result<Option<Self::Entity>, PersistenceError>;

    /// Batch load. Order of the returned entities is not guaranteed and
    /// missing ids are simply absent.
    fn load_by_ids(
        &self,
        type_name: &str,
        ids: &[EntityId],
        fetch: &FetchSpec,
    ) -> Result<Vec<Self::Entity>, PersistenceError>;
}

/// Answers which concrete types sit at or below a type name.
pub trait TypeHierarchy: Send + Sync {
    fn descendants_of(&self, type_name: &str) -> BTreeSet<String>;
}

/// Fetch plan handed through to the loader untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSpec {
    pub group: Option<String>,
    pub eager_paths: Vec<String>,
}

impl FetchSpec {
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            group: Some(name.into()),
            eager_paths: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.eager_paths.push(path.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Concrete,
    Abstract,
}

#[derive(Debug, Clone)]
struct TypeEntry {
    parent: Option<String>,
    kind: TypeKind,
}

/// Type hierarchy declared up front.
///
/// ```
/// use querycache::cache::{StaticTypeHierarchy, TypeHierarchy, TypeKind};
///
/// let hierarchy = StaticTypeHierarchy::new()
///     .with_type("Order", None, TypeKind::Abstract)
///     .with_type("OnlineOrder", Some("Order"), TypeKind::Concrete);
///
/// assert!(hierarchy.descendants_of("Order").contains("OnlineOrder"));
/// assert!(!hierarchy.descendants_of("Order").contains("Order"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticTypeHierarchy {
    types: BTreeMap<String, TypeEntry>,
}

impl StaticTypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, name: &str, parent: Option<&str>, kind: TypeKind) -> Self {
        self.types.insert(
            name.to_string(),
            TypeEntry {
                parent: parent.map(str::to_string),
                kind,
            },
        );
        self
    }

    fn is_below(&self, name: &str, ancestor: &str) -> bool {
        let mut current = Some(name);
        // Bounded by the table size so a cyclic declaration cannot spin.
        for _ in 0..=self.types.len() {
            match current {
                Some(type_name) if type_name == ancestor => return true,
                Some(type_name) => {
                    current = self
                        .types
                        .get(type_name)
                        .and_then(|entry| entry.parent.as_deref());
                }
                None => return false,
            }
        }
        false
    }
}

impl TypeHierarchy for StaticTypeHierarchy {
    fn descendants_of(&self, type_name: &str) -> BTreeSet<String> {
        self.types
            .iter()
            .filter(|(_, entry)| entry.kind == TypeKind::Concrete)
            .filter(|(name, _)| self.is_below(name, type_name))
            .map(|(name, _)| name.clone())
            .collect()
    }
}
