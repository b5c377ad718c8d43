//! Query result cache.
//!
//! Caches the identifiers returned by parameterized entity queries and
//! rebuilds entities from them on later lookups:
//!
//! - [`QueryKey`] canonicalizes a query invocation into a stable identity
//! - [`QueryCacheStore`] holds results and invalidates them by entity type
//! - [`QueryCacheManager`] ties the store to the entity cache and loader
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_batch_size = 1000
//! query_result_limit = 1000
//! ```

mod adapters;
mod config;
mod error;
mod keys;
mod lock;
mod manager;
mod registry;
mod result;
mod store;
mod value;

pub use adapters::{
    EntityCache, EntityLoader, FetchSpec, ResultItem, StaticTypeHierarchy, TypeHierarchy,
    TypeKind,
};
pub use config::{CacheConfig, DEFAULT_MAX_BATCH_SIZE, DEFAULT_QUERY_RESULT_LIMIT};
pub use error::{PersistenceError, QueryCacheError};
pub use keys::{KeyDescription, MAX_POSITIONAL_PARAMETER, QueryKey, QueryKeyBuilder};
pub use manager::{Lookup, QueryCacheManager};
pub use registry::TypeRegistry;
pub use result::{CapturedFailure, QueryResult};
pub use store::{InMemoryQueryStore, QueryCacheStore};
pub use value::{CanonicalFloat, EntityId, ParamValue};
