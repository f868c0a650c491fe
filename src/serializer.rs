//! Pluggable value codec.
//!
//! Stores never look inside a value; they persist whatever text the codec
//! hands them and feed the same text back on reads. [`JsonSerializer`] is the
//! default; anything implementing [`Serializer`] can take its place at
//! construction time.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::error::{Result, StoreError};
use crate::value::Value;

/// Wire tag for decimal values.
const TAG_DECIMAL: &str = "$decimal";
/// Wire tag for timestamps.
const TAG_TIMESTAMP: &str = "$timestamp";
/// Wire tag for sets.
const TAG_SET: &str = "$set";

/// Timestamps travel as ISO 8601 without a zone; fractional seconds are
/// emitted only when present.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Codec turning [`Value`]s into stored text and back.
///
/// Implementations must round-trip every value exactly
/// (`deserialize(&serialize(v)?)? == v`) and must be deterministic: equal
/// values encode to identical text. Both failure directions map to
/// [`StoreError::Serialization`].
pub trait Serializer {
    /// Encode `value` as text.
    fn serialize(&self, value: &Value) -> Result<String>;

    /// Decode text previously produced by [`serialize`](Self::serialize).
    fn deserialize(&self, text: &str) -> Result<Value>;
}

/// Default codec: JSON, with tag objects for the types JSON lacks.
///
/// Decimals, timestamps and sets are wrapped in single-entry objects such as
/// `{"$decimal": "1234.56"}`; everything else maps straight onto JSON. Map
/// entries are emitted in key order, so equal values always produce identical
/// text. Decimals travel as strings and never pass through a float.
///
/// The tag keys are reserved: a map whose only entry is named like one of
/// them would be read back as the tagged type.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<String> {
        let json = encode(value)?;
        Ok(serde_json::to_string(&json)?)
    }

    fn deserialize(&self, text: &str) -> Result<Value> {
        let json: Json = serde_json::from_str(text)?;
        decode(&json)
    }
}

fn encode(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number(Number::from(*i)),
        Value::Decimal(d) => tagged(TAG_DECIMAL, Json::String(d.to_string())),
        Value::String(s) => Json::String(s.clone()),
        Value::Timestamp(t) => {
            tagged(TAG_TIMESTAMP, Json::String(t.format(TIMESTAMP_FORMAT).to_string()))
        }
        Value::Array(values) => {
            Json::Array(values.iter().map(encode).collect::<Result<Vec<Json>>>()?)
        }
        Value::Set(values) => tagged(
            TAG_SET,
            Json::Array(values.iter().map(encode).collect::<Result<Vec<Json>>>()?),
        ),
        Value::Map(entries) => {
            let mut map = JsonMap::new();
            for (key, val) in entries {
                map.insert(key.clone(), encode(val)?);
            }
            Json::Object(map)
        }
    })
}

fn tagged(tag: &str, payload: Json) -> Json {
    let mut map = JsonMap::new();
    map.insert(tag.to_owned(), payload);
    Json::Object(map)
}

fn decode(json: &Json) -> Result<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => decode_number(n)?,
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => {
            Value::Array(items.iter().map(decode).collect::<Result<Vec<Value>>>()?)
        }
        Json::Object(map) => decode_object(map)?,
    })
}

/// Integers stay integers; anything else numeric (fractions, numbers beyond
/// i64) becomes a decimal. Such numbers only appear in text written by other
/// producers, this codec always emits decimals tagged.
fn decode_number(n: &Number) -> Result<Value> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::Int(i));
    }
    BigDecimal::from_str(&n.to_string())
        .map(Value::Decimal)
        .map_err(|e| StoreError::Serialization(format!("unreadable number {n}: {e}")))
}

fn decode_object(map: &JsonMap<String, Json>) -> Result<Value> {
    if map.len() == 1 {
        if let Some((tag, payload)) = map.iter().next() {
            match tag.as_str() {
                TAG_DECIMAL => return decode_decimal(payload),
                TAG_TIMESTAMP => return decode_timestamp(payload),
                TAG_SET => return decode_set(payload),
                _ => {}
            }
        }
    }
    let mut entries = BTreeMap::new();
    for (key, val) in map {
        entries.insert(key.clone(), decode(val)?);
    }
    Ok(Value::Map(entries))
}

fn decode_decimal(payload: &Json) -> Result<Value> {
    let text = payload.as_str().ok_or_else(|| {
        StoreError::Serialization(format!("{TAG_DECIMAL} payload must be a string"))
    })?;
    BigDecimal::from_str(text)
        .map(Value::Decimal)
        .map_err(|e| StoreError::Serialization(format!("bad decimal {text:?}: {e}")))
}

fn decode_timestamp(payload: &Json) -> Result<Value> {
    let text = payload.as_str().ok_or_else(|| {
        StoreError::Serialization(format!("{TAG_TIMESTAMP} payload must be a string"))
    })?;
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map(Value::Timestamp)
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {text:?}: {e}")))
}

fn decode_set(payload: &Json) -> Result<Value> {
    let items = payload.as_array().ok_or_else(|| {
        StoreError::Serialization(format!("{TAG_SET} payload must be an array"))
    })?;
    let mut set = BTreeSet::new();
    for item in items {
        set.insert(decode(item)?);
    }
    Ok(Value::Set(set))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) {
        let codec = JsonSerializer;
        let text = codec.serialize(&value).expect("serialize");
        let back = codec.deserialize(&text).expect("deserialize");
        assert_eq!(back, value, "round-trip through {text}");
    }

    fn timestamp(secs: i64, nanos: u32) -> NaiveDateTime {
        chrono::DateTime::from_timestamp(secs, nanos).unwrap().naive_utc()
    }

    #[test]
    fn roundtrips_scalars() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::from("value"));
        roundtrip(Value::from(""));
        roundtrip(Value::Int(123));
        roundtrip(Value::Int(-7));
        roundtrip(Value::Int(i64::MAX));
    }

    #[test]
    fn roundtrips_decimals() {
        roundtrip(Value::Decimal(BigDecimal::from_str("1234.56").unwrap()));
        roundtrip(Value::Decimal(BigDecimal::from_str("-0.00000000000000000001").unwrap()));
        roundtrip(Value::Decimal(
            BigDecimal::from_str("123456789012345678901234567890.123456789").unwrap(),
        ));
    }

    #[test]
    fn roundtrips_timestamps() {
        roundtrip(Value::Timestamp(timestamp(12_325, 0)));
        roundtrip(Value::Timestamp(timestamp(12_325, 500_000_000)));
    }

    #[test]
    fn roundtrips_containers() {
        roundtrip(Value::Array(vec![Value::Int(1), Value::from("two"), Value::Null]));
        roundtrip(Value::Set((0_i64..10).map(Value::from).collect()));

        let mut inner = BTreeMap::new();
        inner.insert("d".to_owned(), Value::Decimal(BigDecimal::from_str("1234.58").unwrap()));
        inner.insert("n".to_owned(), Value::Timestamp(timestamp(12_325, 0)));
        roundtrip(Value::Map(inner));
    }

    #[test]
    fn encoding_is_deterministic() {
        let codec = JsonSerializer;

        let mut a = BTreeMap::new();
        a.insert("x".to_owned(), Value::Int(1));
        a.insert("y".to_owned(), Value::Int(2));

        let mut b = BTreeMap::new();
        b.insert("y".to_owned(), Value::Int(2));
        b.insert("x".to_owned(), Value::Int(1));

        assert_eq!(
            codec.serialize(&Value::Map(a)).unwrap(),
            codec.serialize(&Value::Map(b)).unwrap(),
        );
    }

    #[test]
    fn tagged_wire_shapes() {
        let codec = JsonSerializer;
        assert_eq!(
            codec.serialize(&Value::Decimal(BigDecimal::from_str("1234.56").unwrap())).unwrap(),
            r#"{"$decimal":"1234.56"}"#,
        );
        assert_eq!(
            codec.serialize(&Value::Timestamp(timestamp(12_325, 0))).unwrap(),
            r#"{"$timestamp":"1970-01-01T03:25:25"}"#,
        );
        assert_eq!(
            codec.serialize(&Value::Set([Value::Int(1)].into_iter().collect())).unwrap(),
            r#"{"$set":[1]}"#,
        );
    }

    #[test]
    fn foreign_numbers_decode_without_loss_of_kind() {
        let codec = JsonSerializer;
        assert_eq!(codec.deserialize("123").unwrap(), Value::Int(123));
        assert_eq!(
            codec.deserialize("2.5").unwrap(),
            Value::Decimal(BigDecimal::from_str("2.5").unwrap()),
        );
    }

    #[test]
    fn rejects_malformed_text() {
        let codec = JsonSerializer;
        for text in ["not json", r#"{"$decimal": 5}"#, r#"{"$timestamp": "yesterday"}"#, r#"{"$set": 3}"#] {
            match codec.deserialize(text) {
                Err(StoreError::Serialization(_)) => {}
                other => panic!("expected serialization error for {text:?}, got {other:?}"),
            }
        }
    }
}
