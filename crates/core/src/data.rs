use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

pub const CID_KEY: &str = "cid";
pub const NEW_ROW_PREFIX: &str = "c";
pub const EXISTING_ROW_PREFIX: &str = "nn";

static UNIQUE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique id with the given prefix (`c1`, `nn2`, ...).
#[must_use]
pub fn unique_id(prefix: &str) -> String {
    let next = UNIQUE_ID_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{prefix}{next}")
}

#[must_use]
pub fn is_new_row_cid(cid: &str) -> bool {
    cid.starts_with(NEW_ROW_PREFIX) && !cid.starts_with(EXISTING_ROW_PREFIX)
}

/// Stamps a correlation id on every object found inside an array, at any
/// depth. Rows loaded from storage get `nn` ids, rows created in the session
/// get `c` ids.
pub fn prepare_data(value: &mut Value, create_mode: bool) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                if child.is_object() || child.is_array() {
                    prepare_data(child, create_mode);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                if let Value::Object(row) = item {
                    let prefix = if create_mode {
                        NEW_ROW_PREFIX
                    } else {
                        EXISTING_ROW_PREFIX
                    };
                    row.insert(CID_KEY.to_string(), Value::String(unique_id(prefix)));
                    prepare_data(item, create_mode);
                }
            }
        }
        _ => {}
    }
}

/// Removes the correlation id from each row of a collection array.
#[must_use]
pub fn clean_cid(rows: &Value, keep_cid: bool) -> Value {
    match rows {
        Value::Array(items) if !keep_cid => Value::Array(
            items
                .iter()
                .map(|row| match row {
                    Value::Object(map) => Value::Object(without_cid(map)),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Recursive variant of [`clean_cid`] for whole documents.
#[must_use]
pub fn strip_cids(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => Value::Object(
                        without_cid(map)
                            .iter()
                            .map(|(key, child)| (key.clone(), strip_cids(child)))
                            .collect(),
                    ),
                    other => strip_cids(other),
                })
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, child)| (key.clone(), strip_cids(child)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn without_cid(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter(|(key, _)| key.as_str() != CID_KEY)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[must_use]
pub fn row_cid(row: &Value) -> Option<&str> {
    row.get(CID_KEY).and_then(Value::as_str)
}

/// Shallow merge of object layers, later layers winning. Non-object layers
/// are ignored.
#[must_use]
pub fn merge_objects<'a>(layers: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut merged = Map::new();
    for layer in layers {
        if let Value::Object(map) = layer {
            for (key, value) in map {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(merged)
}
