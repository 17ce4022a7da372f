//! The data model a [`Reactor`](crate::Reactor) mediates access to.
//!
//! Per `SPEC_FULL.md` §1's redesign decision, a "source object" here is a
//! [`serde_json::Value`]: a small, well-understood, already-ordered (via
//! `serde_json`'s `preserve_order`-independent `Map` insertion order on
//! `Object`) tree that naturally supports the spec's three access kinds
//! (value, existence, own-key enumeration) for both object and array
//! shapes, which is what lets a wrapped array answer host-type checks the
//! same way a wrapped object does (spec scenario 8).

pub use serde_json::Value;
use serde_json::Map;

/// Returns the own-key set of `value`, as the spec's `OWN_KEYS` sentinel
/// would observe it: property names for an object, stringified indices for
/// an array, and the empty set for anything else.
pub(crate) fn own_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map.keys().cloned().collect(),
        Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

/// Whether `key` currently exists on `value`, per the spec's `HAS` sentinel.
pub(crate) fn has_key(value: &Value, key: &str) -> bool {
    match value {
        Value::Object(map) => map.contains_key(key),
        Value::Array(items) => key.parse::<usize>().is_ok_and(|i| i < items.len()),
        _ => false,
    }
}

/// Reads the raw value at `key`, or `Value::Null` if absent (mirroring a
/// plain JS property read of a missing key).
pub(crate) fn get_key(value: &Value, key: &str) -> Value {
    match value {
        Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
        Value::Array(items) => key
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Writes `new_value` at `key`. Returns `true` if the write changed the
/// observable value (spec §4.1 step 3's strict-equality check). Arrays grow
/// to accommodate a numeric key one past their current length (matching JS
/// array-index assignment); any larger gap, or a non-numeric key on an
/// array, is the crate's one "non-writable property" trap failure.
pub(crate) fn set_key(
    value: &mut Value,
    key: &str,
    new_value: Value,
) -> Result<bool, crate::error::ReactorError> {
    match value {
        Value::Object(map) => {
            let changed = map.get(key) != Some(&new_value);
            map.insert(key.to_string(), new_value);
            Ok(changed)
        }
        Value::Array(items) => {
            let index: usize = key
                .parse()
                .map_err(|_| crate::error::ReactorError::NotWritable { key: key.to_string() })?;
            if index < items.len() {
                let changed = items[index] != new_value;
                items[index] = new_value;
                Ok(changed)
            } else if index == items.len() {
                items.push(new_value);
                Ok(true)
            } else {
                Err(crate::error::ReactorError::NotWritable { key: key.to_string() })
            }
        }
        Value::Null => {
            let mut map = Map::new();
            map.insert(key.to_string(), new_value);
            *value = Value::Object(map);
            Ok(true)
        }
        _ => Err(crate::error::ReactorError::NotWritable { key: key.to_string() }),
    }
}

/// Deletes `key`. Returns `true` if the own-key set actually shrank.
pub(crate) fn delete_key(value: &mut Value, key: &str) -> Result<bool, crate::error::ReactorError> {
    match value {
        Value::Object(map) => Ok(map.shift_remove(key).is_some()),
        Value::Array(items) => {
            let index: usize = key
                .parse()
                .map_err(|_| crate::error::ReactorError::NotWritable { key: key.to_string() })?;
            if index < items.len() {
                items[index] = Value::Null;
                Ok(false)
            } else {
                Ok(false)
            }
        }
        _ => Ok(false),
    }
}
