//! Bound parameter values and entity identifiers.
//!
//! Both types are closed, serializable enums so that anything folded into a
//! [`QueryKey`](super::QueryKey) survives a serialize/deserialize round trip
//! with identical equality and hash.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const NULL_HASH: u64 = 0;
const TRUE_HASH: u64 = 1231;
const FALSE_HASH: u64 = 1237;
const HASH_SEED: u64 = 17;
const HASH_FACTOR: u64 = 31;

/// Base-31 polynomial accumulator used for every hashed key component.
///
/// Unlike `DefaultHasher` the result does not depend on the process, the
/// Rust release or a random seed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Polynomial(u64);

impl Polynomial {
    pub(crate) fn new() -> Self {
        Self(HASH_SEED)
    }

    pub(crate) fn mix(self, component: u64) -> Self {
        Self(self.0.wrapping_mul(HASH_FACTOR).wrapping_add(component))
    }

    pub(crate) fn finish(self) -> u64 {
        self.0
    }
}

pub(crate) fn text_hash(text: &str) -> u64 {
    text.bytes().fold(0u64, |acc, byte| {
        acc.wrapping_mul(HASH_FACTOR).wrapping_add(u64::from(byte))
    })
}

pub(crate) fn bool_hash(value: bool) -> u64 {
    if value { TRUE_HASH } else { FALSE_HASH }
}

/// Deep hash of a parameter array; nested lists recurse through the same path.
pub(crate) fn array_hash(values: &[ParamValue]) -> u64 {
    values
        .iter()
        .fold(Polynomial::new(), |acc, value| acc.mix(value.stable_hash()))
        .finish()
}

fn fold_wide(bits: u64) -> u64 {
    bits ^ (bits >> 32)
}

/// An `f64` stored by canonical bit pattern.
///
/// `-0.0` collapses to `0.0` and every NaN collapses to one NaN, so equality
/// and hashing are total. Finite values serialize as plain numbers; NaN and
/// the infinities are spelled out as `"NaN"`, `"inf"` and `"-inf"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FloatRepr", into = "FloatRepr")]
pub struct CanonicalFloat(u64);

const NAN_TOKEN: &str = "NaN";
const INFINITY_TOKEN: &str = "inf";
const NEG_INFINITY_TOKEN: &str = "-inf";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FloatRepr {
    Finite(f64),
    Special(String),
}

impl From<CanonicalFloat> for FloatRepr {
    fn from(value: CanonicalFloat) -> Self {
        let value = value.get();
        if value.is_nan() {
            Self::Special(NAN_TOKEN.to_string())
        } else if value == f64::INFINITY {
            Self::Special(INFINITY_TOKEN.to_string())
        } else if value == f64::NEG_INFINITY {
            Self::Special(NEG_INFINITY_TOKEN.to_string())
        } else {
            Self::Finite(value)
        }
    }
}

impl TryFrom<FloatRepr> for CanonicalFloat {
    type Error = String;

    fn try_from(repr: FloatRepr) -> Result<Self, Self::Error> {
        match repr {
            FloatRepr::Finite(value) => Ok(Self::from(value)),
            FloatRepr::Special(token) => match token.as_str() {
                NAN_TOKEN => Ok(Self::from(f64::NAN)),
                INFINITY_TOKEN => Ok(Self::from(f64::INFINITY)),
                NEG_INFINITY_TOKEN => Ok(Self::from(f64::NEG_INFINITY)),
                _ => Err(format!("unrecognized float `{token}`")),
            },
        }
    }
}

impl CanonicalFloat {
    pub fn get(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl From<f64> for CanonicalFloat {
    fn from(value: f64) -> Self {
        let canonical = if value.is_nan() {
            f64::NAN
        } else if value == 0.0 {
            0.0
        } else {
            value
        };
        Self(canonical.to_bits())
    }
}

impl From<CanonicalFloat> for f64 {
    fn from(value: CanonicalFloat) -> Self {
        value.get()
    }
}

/// A value bound to a query parameter or stored as an additional criterion.
///
/// Integer widths widen to `i64` and every slice or vector of convertible
/// values becomes a [`ParamValue::List`], so equal primitive arrays compare
/// and hash the same regardless of their static element type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(CanonicalFloat),
    Text(String),
    Uuid(Uuid),
    Enum { type_name: String, variant: String },
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Bind an enum constant by its type and variant names.
    pub fn enumeration(type_name: impl Into<String>, variant: impl Into<String>) -> Self {
        Self::Enum {
            type_name: type_name.into(),
            variant: variant.into(),
        }
    }

    /// Convert a JSON scalar. Arrays and objects yield `None`.
    pub fn from_json_scalar(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(flag) => Some(Self::Bool(*flag)),
            Value::Number(number) => number
                .as_i64()
                .map(Self::Int)
                .or_else(|| number.as_f64().map(Self::from)),
            Value::String(text) => Some(Self::Text(text.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub(crate) fn stable_hash(&self) -> u64 {
        match self {
            Self::Null => NULL_HASH,
            Self::Bool(flag) => bool_hash(*flag),
            Self::Int(value) => fold_wide(*value as u64),
            Self::Float(value) => fold_wide(value.0),
            Self::Text(text) => text_hash(text),
            Self::Uuid(uuid) => {
                let bits = uuid.as_u128();
                fold_wide((bits >> 64) as u64 ^ bits as u64)
            }
            Self::Enum { type_name, variant } => Polynomial::new()
                .mix(text_hash(type_name))
                .mix(text_hash(variant))
                .finish(),
            Self::List(items) => array_hash(items),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{}", value.get()),
            Self::Text(text) => write!(f, "'{text}'"),
            Self::Uuid(uuid) => write!(f, "{uuid}"),
            Self::Enum { type_name, variant } => write!(f, "{type_name}.{variant}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

macro_rules! widen_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(value: $ty) -> Self {
                    Self::Int(i64::from(value))
                }
            }
        )*
    };
}

widen_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for ParamValue {
    fn from(value: f32) -> Self {
        Self::Float(CanonicalFloat::from(f64::from(value)))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(CanonicalFloat::from(value))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Uuid> for ParamValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ParamValue> + Clone> From<&[T]> for ParamValue {
    fn from(values: &[T]) -> Self {
        Self::List(values.iter().cloned().map(Into::into).collect())
    }
}

/// Identifier of a persisted entity as recorded in a cached id list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityId {
    Int(i64),
    Uuid(Uuid),
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Uuid(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for EntityId {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<Uuid> for EntityId {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}
