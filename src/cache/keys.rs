//! Query cache key definitions.
//!
//! A [`QueryKey`] is the canonical identity of one parameterized query
//! invocation. Named parameters are rewritten positionally in order of
//! textual occurrence, so two invocations that differ only in parameter
//! naming, or in the iteration order of the maps they were bound from, end up
//! with equal keys and equal hashes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::QueryCacheError;
use super::value::{ParamValue, Polynomial, array_hash, bool_hash, text_hash};

const PLACEHOLDER_PREFIX: &str = ":normalized_param_";
/// Highest accepted 1-based positional parameter.
pub const MAX_POSITIONAL_PARAMETER: u32 = 65_535;

/// Fields that take part in equality and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CanonicalQuery {
    query_text: String,
    first_row: u32,
    max_rows: Option<u32>,
    soft_deletion: bool,
    single_result: bool,
    normalized_params: Vec<ParamValue>,
    positional_params: Vec<ParamValue>,
    criteria: Vec<ParamValue>,
}

impl CanonicalQuery {
    fn stable_hash(&self) -> u64 {
        Polynomial::new()
            .mix(text_hash(&self.query_text))
            .mix(u64::from(self.first_row))
            .mix(self.max_rows.map_or(0, |rows| u64::from(rows) + 1))
            .mix(bool_hash(self.soft_deletion))
            .mix(bool_hash(self.single_result))
            .mix(array_hash(&self.positional_params))
            .mix(array_hash(&self.normalized_params))
            .mix(array_hash(&self.criteria))
            .finish()
    }
}

/// Diagnostic view of the invocation a key was built from.
///
/// Never compared or hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescription {
    pub original_text: String,
    pub named_params: BTreeMap<String, ParamValue>,
}

impl fmt::Display for KeyDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original_text)?;
        if self.named_params.is_empty() {
            return Ok(());
        }
        f.write_str(" {")?;
        for (index, (name, value)) in self.named_params.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

/// Canonical, hashable identity of a parameterized query invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredKey", into = "StoredKey")]
pub struct QueryKey {
    canonical: CanonicalQuery,
    hash_code: u64,
    description: KeyDescription,
}

/// Wire form of a key. The hash is recomputed on the way back in.
#[derive(Serialize, Deserialize)]
struct StoredKey {
    key: CanonicalQuery,
    description: KeyDescription,
}

impl From<StoredKey> for QueryKey {
    fn from(stored: StoredKey) -> Self {
        Self::from_parts(stored.key, stored.description)
    }
}

impl From<QueryKey> for StoredKey {
    fn from(key: QueryKey) -> Self {
        Self {
            key: key.canonical,
            description: key.description,
        }
    }
}

impl QueryKey {
    /// Start building a key for the given query text.
    pub fn builder(query_text: impl Into<String>) -> QueryKeyBuilder {
        QueryKeyBuilder::new(query_text)
    }

    fn from_parts(canonical: CanonicalQuery, description: KeyDescription) -> Self {
        let hash_code = canonical.stable_hash();
        Self {
            canonical,
            hash_code,
            description,
        }
    }

    /// Query text with named parameters rewritten as `:normalized_param_i`.
    pub fn query_text(&self) -> &str {
        &self.canonical.query_text
    }

    pub fn first_row(&self) -> u32 {
        self.canonical.first_row
    }

    pub fn max_rows(&self) -> Option<u32> {
        self.canonical.max_rows
    }

    pub fn soft_deletion(&self) -> bool {
        self.canonical.soft_deletion
    }

    pub fn single_result(&self) -> bool {
        self.canonical.single_result
    }

    /// Named parameter values in order of textual occurrence.
    pub fn normalized_params(&self) -> &[ParamValue] {
        &self.canonical.normalized_params
    }

    /// Positional parameter values indexed by position - 1.
    pub fn positional_params(&self) -> &[ParamValue] {
        &self.canonical.positional_params
    }

    /// Additional criteria as an alternating key/value array sorted by key.
    pub fn criteria(&self) -> &[ParamValue] {
        &self.canonical.criteria
    }

    pub fn hash_code(&self) -> u64 {
        self.hash_code
    }

    pub fn description(&self) -> &KeyDescription {
        &self.description
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash_code == other.hash_code && self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code);
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:016x}]", self.canonical.query_text, self.hash_code)
    }
}

/// Collects the inputs of one query invocation.
#[derive(Debug, Clone, Default)]
pub struct QueryKeyBuilder {
    query_text: String,
    first_row: u32,
    max_rows: Option<u32>,
    soft_deletion: bool,
    single_result: bool,
    named: BTreeMap<String, ParamValue>,
    positional: BTreeMap<u32, ParamValue>,
    criteria: BTreeMap<String, ParamValue>,
}

impl QueryKeyBuilder {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            ..Default::default()
        }
    }

    /// Set the pagination window.
    pub fn window(mut self, first_row: u32, max_rows: Option<u32>) -> Self {
        self.first_row = first_row;
        self.max_rows = max_rows;
        self
    }

    pub fn soft_deletion(mut self, enabled: bool) -> Self {
        self.soft_deletion = enabled;
        self
    }

    pub fn single_result(mut self, enabled: bool) -> Self {
        self.single_result = enabled;
        self
    }

    /// Bind a named parameter; the name is given without its leading colon.
    pub fn named(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Bind every entry of a name/value map.
    pub fn named_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        self.named
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Bind a 1-based positional parameter.
    pub fn positional(mut self, position: u32, value: impl Into<ParamValue>) -> Self {
        self.positional.insert(position, value.into());
        self
    }

    pub fn criterion(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.criteria.insert(key.into(), value.into());
        self
    }

    /// Take criteria from a JSON hint bag, keeping scalar entries only.
    pub fn criteria_from_json(mut self, hints: &serde_json::Map<String, serde_json::Value>) -> Self {
        for (key, value) in hints {
            match ParamValue::from_json_scalar(value) {
                Some(scalar) => {
                    self.criteria.insert(key.clone(), scalar);
                }
                None => debug!(criterion = %key, "Dropped non-scalar query criterion"),
            }
        }
        self
    }

    pub fn build(self) -> Result<QueryKey, QueryCacheError> {
        let (query_text, normalized_params) = normalize(&self.query_text, &self.named)?;
        let positional_params = densify(self.positional)?;
        let criteria = self
            .criteria
            .into_iter()
            .flat_map(|(key, value)| [ParamValue::Text(key), value])
            .collect();

        let canonical = CanonicalQuery {
            query_text,
            first_row: self.first_row,
            max_rows: self.max_rows,
            soft_deletion: self.soft_deletion,
            single_result: self.single_result,
            normalized_params,
            positional_params,
            criteria,
        };
        let description = KeyDescription {
            original_text: self.query_text,
            named_params: self.named,
        };
        Ok(QueryKey::from_parts(canonical, description))
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Rewrite `:name` tokens positionally, skipping string literals and `::` casts.
fn normalize(
    text: &str,
    named: &BTreeMap<String, ParamValue>,
) -> Result<(String, Vec<ParamValue>), QueryCacheError> {
    let mut canonical = String::with_capacity(text.len());
    let mut params = Vec::new();
    let mut referenced = BTreeSet::new();
    let mut chars = text.char_indices().peekable();
    let mut in_literal = false;

    while let Some((_, ch)) = chars.next() {
        if in_literal {
            canonical.push(ch);
            if ch == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    canonical.push('\'');
                    chars.next();
                } else {
                    in_literal = false;
                }
            }
            continue;
        }

        match ch {
            '\'' => {
                in_literal = true;
                canonical.push(ch);
            }
            ':' => match chars.peek().copied() {
                Some((_, ':')) => {
                    canonical.push_str("::");
                    chars.next();
                }
                Some((start, next)) if is_ident_start(next) => {
                    let mut end = start;
                    while let Some(&(index, c)) = chars.peek() {
                        if !is_ident_continue(c) {
                            break;
                        }
                        end = index + c.len_utf8();
                        chars.next();
                    }
                    let name = &text[start..end];
                    let value = named
                        .get(name)
                        .ok_or_else(|| QueryCacheError::unbound_parameter(name))?;
                    canonical.push_str(PLACEHOLDER_PREFIX);
                    canonical.push_str(&params.len().to_string());
                    params.push(value.clone());
                    referenced.insert(name);
                }
                _ => canonical.push(ch),
            },
            _ => canonical.push(ch),
        }
    }

    for name in named.keys().filter(|name| !referenced.contains(name.as_str())) {
        debug!(parameter = %name, "Ignored named parameter not referenced by the query text");
    }

    Ok((canonical, params))
}

fn densify(positional: BTreeMap<u32, ParamValue>) -> Result<Vec<ParamValue>, QueryCacheError> {
    if positional.contains_key(&0) {
        return Err(QueryCacheError::configuration(
            "positional parameters are 1-based; position 0 is not valid",
        ));
    }
    if let Some(position) = positional
        .keys()
        .next_back()
        .filter(|position| **position > MAX_POSITIONAL_PARAMETER)
    {
        return Err(QueryCacheError::configuration(format!(
            "positional parameter ?{position} exceeds the maximum of {MAX_POSITIONAL_PARAMETER}"
        )));
    }
    let len = positional.keys().next_back().copied().unwrap_or(0) as usize;
    let mut dense = vec![ParamValue::Null; len];
    for (position, value) in positional {
        dense[position as usize - 1] = value;
    }
    Ok(dense)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    const ORDER_QUERY: &str =
        "select o from Order o where o.customer = :customer and o.status = :status";

    fn std_hash(key: &QueryKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn map_iteration_order_does_not_matter() {
        let mut forward = HashMap::new();
        forward.insert("customer", ParamValue::from(42));
        forward.insert("status", ParamValue::from("OPEN"));

        let mut backward = HashMap::new();
        backward.insert("status", ParamValue::from("OPEN"));
        backward.insert("customer", ParamValue::from(42));

        let a = QueryKey::builder(ORDER_QUERY)
            .named_params(forward)
            .build()
            .expect("key");
        let b = QueryKey::builder(ORDER_QUERY)
            .named_params(backward)
            .build()
            .expect("key");

        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());
        assert_eq!(std_hash(&a), std_hash(&b));
    }

    #[test]
    fn parameter_names_do_not_matter() {
        let a = QueryKey::builder("select o from Order o where o.customer = :c")
            .named("c", 42)
            .build()
            .expect("key");
        let b = QueryKey::builder("select o from Order o where o.customer = :customerId")
            .named("customerId", 42)
            .build()
            .expect("key");

        assert_eq!(a, b);
        assert_ne!(a.description(), b.description());
    }

    #[test]
    fn pagination_changes_the_key() {
        let base = || {
            QueryKey::builder(ORDER_QUERY)
                .named("customer", 42)
                .named("status", "OPEN")
        };
        let first = base().window(0, Some(20)).build().expect("key");
        let shifted = base().window(20, Some(20)).build().expect("key");
        let wider = base().window(0, Some(50)).build().expect("key");
        let unbounded = base().window(0, None).build().expect("key");

        assert_ne!(first, shifted);
        assert_ne!(first, wider);
        assert_ne!(first, unbounded);
        assert_ne!(first.hash_code(), shifted.hash_code());
        assert_ne!(first.hash_code(), wider.hash_code());
    }

    #[test]
    fn flags_and_values_change_the_key() {
        let base = || QueryKey::builder(ORDER_QUERY).named("status", "OPEN");
        let plain = base().named("customer", 42).build().expect("key");

        assert_ne!(
            plain,
            base().named("customer", 43).build().expect("key")
        );
        assert_ne!(
            plain,
            base()
                .named("customer", 42)
                .soft_deletion(true)
                .build()
                .expect("key")
        );
        assert_ne!(
            plain,
            base()
                .named("customer", 42)
                .single_result(true)
                .build()
                .expect("key")
        );
    }

    #[test]
    fn repeated_parameter_gets_a_slot_per_occurrence() {
        let key = QueryKey::builder("select p from Person p where p.first = :name or p.last = :name")
            .named("name", "Ada")
            .build()
            .expect("key");

        assert_eq!(
            key.normalized_params(),
            &[ParamValue::from("Ada"), ParamValue::from("Ada")]
        );
        insta::assert_snapshot!(
            key.query_text(),
            @"select p from Person p where p.first = :normalized_param_0 or p.last = :normalized_param_1"
        );
    }

    #[test]
    fn literals_and_casts_are_not_parameters() {
        let key = QueryKey::builder(
            "select * from notes where body = 'it''s :not_a_param' and created::date = :day",
        )
        .named("day", "2024-01-01")
        .build()
        .expect("key");

        insta::assert_snapshot!(
            key.query_text(),
            @"select * from notes where body = 'it''s :not_a_param' and created::date = :normalized_param_0"
        );
        assert_eq!(key.normalized_params().len(), 1);
    }

    #[test]
    fn unbound_parameter_is_a_configuration_error() {
        let err = QueryKey::builder(ORDER_QUERY)
            .named("customer", 42)
            .build()
            .expect_err("status is unbound");

        assert!(err.is_configuration());
        assert!(err.to_string().contains(":status"));
    }

    #[test]
    fn unreferenced_parameters_are_ignored() {
        let a = QueryKey::builder("select o from Order o where o.id = :id")
            .named("id", 1)
            .build()
            .expect("key");
        let b = QueryKey::builder("select o from Order o where o.id = :id")
            .named("id", 1)
            .named("unused", 2)
            .build()
            .expect("key");

        assert_eq!(a, b);
    }

    #[test]
    fn positional_parameters_are_dense_with_null_gaps() {
        let key = QueryKey::builder("select o from Order o where o.a = ?1 and o.c = ?3")
            .positional(3, "c")
            .positional(1, "a")
            .build()
            .expect("key");

        assert_eq!(
            key.positional_params(),
            &[
                ParamValue::from("a"),
                ParamValue::Null,
                ParamValue::from("c")
            ]
        );
    }

    #[test]
    fn position_zero_is_rejected() {
        let err = QueryKey::builder("select 1")
            .positional(0, 1)
            .build()
            .expect_err("position zero");
        assert!(err.is_configuration());
    }

    #[test]
    fn positions_beyond_the_maximum_are_rejected() {
        let err = QueryKey::builder("select 1")
            .positional(4_000_000_000, 1)
            .build()
            .expect_err("position out of range");
        assert!(err.is_configuration());

        let key = QueryKey::builder("select 1")
            .positional(MAX_POSITIONAL_PARAMETER, 1)
            .build()
            .expect("highest position");
        assert_eq!(
            key.positional_params().len(),
            MAX_POSITIONAL_PARAMETER as usize
        );
    }

    #[test]
    fn criteria_are_sorted_and_flattened() {
        let a = QueryKey::builder("select 1")
            .criterion("timeout", 30)
            .criterion("cacheRegion", "orders")
            .build()
            .expect("key");
        let b = QueryKey::builder("select 1")
            .criterion("cacheRegion", "orders")
            .criterion("timeout", 30)
            .build()
            .expect("key");

        assert_eq!(a, b);
        assert_eq!(
            a.criteria(),
            &[
                ParamValue::from("cacheRegion"),
                ParamValue::from("orders"),
                ParamValue::from("timeout"),
                ParamValue::from(30),
            ]
        );
    }

    #[test]
    fn json_criteria_drop_non_scalars() {
        let hints = serde_json::json!({
            "readOnly": true,
            "fetchSize": 100,
            "graph": {"paths": ["lines"]},
        });
        let key = QueryKey::builder("select 1")
            .criteria_from_json(hints.as_object().expect("object literal"))
            .build()
            .expect("key");

        assert_eq!(
            key.criteria(),
            &[
                ParamValue::from("fetchSize"),
                ParamValue::from(100),
                ParamValue::from("readOnly"),
                ParamValue::from(true),
            ]
        );
    }

    #[test]
    fn primitive_array_bindings_match_across_static_types() {
        let narrow: &[i32] = &[1, 2, 3];
        let a = QueryKey::builder("select o from Order o where o.id in :ids")
            .named("ids", narrow)
            .build()
            .expect("key");
        let b = QueryKey::builder("select o from Order o where o.id in :ids")
            .named("ids", vec![1i64, 2, 3])
            .build()
            .expect("key");

        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());
    }

    #[test]
    fn json_round_trip_preserves_equality_and_hash() {
        let key = QueryKey::builder(ORDER_QUERY)
            .named("customer", 42)
            .named("status", ParamValue::enumeration("OrderStatus", "Open"))
            .positional(2, 1.5)
            .criterion("region", "eu")
            .window(10, Some(5))
            .soft_deletion(true)
            .build()
            .expect("key");

        let json = serde_json::to_string(&key).expect("serialize key");
        let decoded: QueryKey = serde_json::from_str(&json).expect("deserialize key");

        assert_eq!(decoded, key);
        assert_eq!(decoded.hash_code(), key.hash_code());
        assert_eq!(decoded.description(), key.description());
    }

    #[test]
    fn non_finite_float_bindings_survive_json_round_trip() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0] {
            let key = QueryKey::builder("select p from Point p where p.r = :r")
                .named("r", value)
                .positional(1, value)
                .criterion("threshold", value)
                .build()
                .expect("key");

            let json = serde_json::to_string(&key).expect("serialize key");
            let decoded: QueryKey = serde_json::from_str(&json).expect("deserialize key");

            assert_eq!(decoded, key, "binding {value}");
            assert_eq!(decoded.hash_code(), key.hash_code(), "binding {value}");
        }
    }

    #[test]
    fn hash_is_deterministic_across_builds() {
        let build = || {
            QueryKey::builder(ORDER_QUERY)
                .named("customer", 42)
                .named("status", "OPEN")
                .build()
                .expect("key")
                .hash_code()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn description_shows_original_invocation() {
        let key = QueryKey::builder("select o from Order o where o.id = :id")
            .named("id", 7)
            .build()
            .expect("key");
        assert_eq!(
            key.description().to_string(),
            "select o from Order o where o.id = :id {id=7}"
        );
    }
}
