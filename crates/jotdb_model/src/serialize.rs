//! Single-line document codec.
//!
//! Documents serialize to one line of JSON with no raw newline anywhere
//! (escapes inside strings are produced by the JSON writer). Datetimes
//! travel as `{"$$date": <ms>}` envelopes and are rehydrated on read.
//! `Undefined` fields are omitted entirely.

use crate::error::{ModelError, ModelResult};
use crate::value::Value;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Key of the datetime envelope.
pub const DATE_KEY: &str = "$$date";
/// Key of a deletion tombstone record.
pub const DELETED_KEY: &str = "$$deleted";
/// Key of an index-creation record.
pub const INDEX_CREATED_KEY: &str = "$$indexCreated";
/// Key of an index-removal record.
pub const INDEX_REMOVED_KEY: &str = "$$indexRemoved";

/// Validates a single field name against its value.
///
/// Names beginning with `$` are forbidden except for the persisted-log
/// sentinels; names containing `.` are always forbidden.
pub fn check_key(key: &str, value: &Value) -> ModelResult<()> {
    if key.starts_with('$') {
        let exempt = match key {
            DATE_KEY => matches!(value, Value::Number(_)),
            DELETED_KEY => matches!(value, Value::Bool(true)),
            INDEX_CREATED_KEY | INDEX_REMOVED_KEY => true,
            _ => false,
        };
        if !exempt {
            return Err(ModelError::invalid_field_name(
                key,
                "field names cannot begin with the $ character",
            ));
        }
    }
    if key.contains('.') {
        return Err(ModelError::invalid_field_name(
            key,
            "field names cannot contain a .",
        ));
    }
    Ok(())
}

/// Recursively validates every field name in a document.
pub fn check_object(value: &Value) -> ModelResult<()> {
    match value {
        Value::Object(fields) => {
            for (key, field) in fields {
                check_key(key, field)?;
                check_object(field)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check_object(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Serializes a value to its one-line text form.
///
/// Fails with an invalid field name error before writing anything if the
/// document contains a forbidden key.
pub fn serialize(value: &Value) -> ModelResult<String> {
    check_object(value)?;
    Ok(serde_json::to_string(value)?)
}

/// Parses a line previously produced by [`serialize`].
pub fn deserialize(raw: &str) -> ModelResult<Value> {
    Ok(serde_json::from_str(raw)?)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Undefined and predicates have no wire form; standalone they
            // degrade to null, as object fields they are skipped below.
            Value::Undefined | Value::Null | Value::Where(_) => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::DateTime(ms) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(DATE_KEY, ms)?;
                map.end()
            }
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(fields) => {
                let mut map = serializer.serialize_map(None)?;
                for (key, value) in fields {
                    if matches!(value, Value::Undefined | Value::Where(_)) {
                        continue;
                    }
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, n: i64) -> Result<Value, E> {
        Ok(Value::Number(n as f64))
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> Result<Value, E> {
        Ok(Value::Number(n as f64))
    }

    fn visit_f64<E: de::Error>(self, n: f64) -> Result<Value, E> {
        Ok(Value::Number(n))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Value, E> {
        Ok(Value::String(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> Result<Value, E> {
        Ok(Value::String(s))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Value, D::Error> {
        d.deserialize_any(ValueVisitor)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut fields: Vec<(String, Value)> = Vec::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            fields.push((key, value));
        }
        // A bare {"$$date": ms} envelope rehydrates to a datetime.
        if let [(key, Value::Number(ms))] = fields.as_slice() {
            if key == DATE_KEY {
                return Ok(Value::DateTime(*ms as i64));
            }
        }
        Ok(Value::Object(fields))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
