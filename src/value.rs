//! Values a store can hold.

use std::collections::{BTreeMap, BTreeSet};

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;

/// A value stored under a key.
///
/// The variants cover exactly what the default codec round-trips: JSON's
/// scalars and containers plus arbitrary-precision decimals, zone-naive
/// timestamps and sets. There is no float variant; non-integer numbers are
/// [`Decimal`](Self::Decimal), so numeric round-trips are exact at any
/// precision and `Value` keeps a total order. That total order is what lets
/// values themselves be set members and keeps encodings deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// Arbitrary-precision decimal number.
    Decimal(BigDecimal),
    /// UTF-8 string.
    String(String),
    /// Timestamp without a zone.
    Timestamp(NaiveDateTime),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Sorted set of values.
    Set(BTreeSet<Value>),
    /// String-keyed mapping, sorted by key.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns `true` if this is [`Value::Null`].
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean if this is [`Value::Bool`].
    #[inline]
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer if this is [`Value::Int`].
    #[inline]
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the decimal if this is [`Value::Decimal`].
    #[inline]
    #[must_use]
    pub fn as_decimal(&self) -> Option<&BigDecimal> {
        match self {
            Self::Decimal(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the string slice if this is [`Value::String`].
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the timestamp if this is [`Value::Timestamp`].
    #[inline]
    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Returns the elements if this is [`Value::Array`].
    #[inline]
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Returns the set if this is [`Value::Set`].
    #[inline]
    #[must_use]
    pub fn as_set(&self) -> Option<&BTreeSet<Value>> {
        match self {
            Self::Set(values) => Some(values),
            _ => None,
        }
    }

    /// Returns the mapping if this is [`Value::Map`].
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<BigDecimal> for Value {
    fn from(d: BigDecimal) -> Self {
        Self::Decimal(d)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(t: NaiveDateTime) -> Self {
        Self::Timestamp(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::Array(values)
    }
}

impl From<BTreeSet<Value>> for Value {
    fn from(values: BTreeSet<Value>) -> Self {
        Self::Set(values)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self::Map(entries)
    }
}
