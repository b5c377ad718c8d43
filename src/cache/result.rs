//! Cached query outcome: identifiers plus type metadata, never live objects.

use std::collections::BTreeSet;
use std::error::Error as StdError;

use serde::{Deserialize, Serialize};

use super::value::EntityId;

/// A single-result failure recorded in place of an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFailure {
    kind: String,
    message: String,
}

impl CapturedFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Capture an error chain under the given kind.
    pub fn from_error(kind: impl Into<String>, error: &dyn StdError) -> Self {
        let mut message = error.to_string();
        let mut current = error.source();
        while let Some(inner) = current {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            current = inner.source();
        }
        Self::new(kind, message)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    ids: Vec<EntityId>,
    type_name: String,
    related_types: BTreeSet<String>,
    failure: Option<CapturedFailure>,
}

impl QueryResult {
    pub fn new(
        ids: Vec<EntityId>,
        type_name: impl Into<String>,
        related_types: BTreeSet<String>,
    ) -> Self {
        Self {
            ids,
            type_name: type_name.into(),
            related_types,
            failure: None,
        }
    }

    /// A result carrying no ids and a captured single-result failure.
    pub fn failed(
        type_name: impl Into<String>,
        related_types: BTreeSet<String>,
        failure: CapturedFailure,
    ) -> Self {
        Self {
            ids: Vec::new(),
            type_name: type_name.into(),
            related_types,
            failure: Some(failure),
        }
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn related_types(&self) -> &BTreeSet<String> {
        &self.related_types
    }

    pub fn failure(&self) -> Option<&CapturedFailure> {
        self.failure.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Owning type followed by every related type, for invalidation bookkeeping.
    pub fn type_tags(&self) -> impl Iterator<Item = &str> + '_ {
        std::iter::once(self.type_name.as_str())
            .chain(self.related_types.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error)]
    #[error("query returned 3 rows")]
    struct Inner;

    #[derive(Debug, Error)]
    #[error("non unique result")]
    struct Outer(#[source] Inner);

    #[test]
    fn id_order_survives_json_round_trip() {
        let result = QueryResult::new(
            vec![EntityId::from(3), EntityId::from(1), EntityId::from(2)],
            "Order",
            BTreeSet::from(["OnlineOrder".to_string()]),
        );

        let json = serde_json::to_string(&result).expect("serialize result");
        let decoded: QueryResult = serde_json::from_str(&json).expect("deserialize result");

        assert_eq!(decoded, result);
        assert_eq!(
            decoded.ids(),
            &[EntityId::from(3), EntityId::from(1), EntityId::from(2)]
        );
    }

    #[test]
    fn failed_result_has_no_ids() {
        let result = QueryResult::failed(
            "Order",
            BTreeSet::new(),
            CapturedFailure::new("NonUniqueResult", "boom"),
        );
        assert!(result.is_empty());
        assert_eq!(result.failure().map(CapturedFailure::kind), Some("NonUniqueResult"));
    }

    #[test]
    fn type_tags_start_with_owner() {
        let result = QueryResult::new(
            Vec::new(),
            "Order",
            BTreeSet::from(["Customer".to_string(), "OnlineOrder".to_string()]),
        );
        let tags: Vec<&str> = result.type_tags().collect();
        assert_eq!(tags, vec!["Order", "Customer", "OnlineOrder"]);
    }

    #[test]
    fn captured_failure_flattens_error_chain() {
        let failure = CapturedFailure::from_error("NonUniqueResult", &Outer(Inner));
        assert_eq!(failure.message(), "non unique result: query returned 3 rows");
    }
}
