/// Portable-value coercion applied at the store boundary
///
/// The `result` column is plain JSON text with no date or decimal types. Everything
/// written there goes through `to_portable_value`: serde renders dates as ISO strings,
/// and integers that do not fit in an i64 are stored as strings so SQLite's JSON
/// functions and JavaScript clients read them back unchanged.

use serde::Serialize;
use serde_json::Value;

pub fn to_portable_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(value).map(normalize)
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Number(n) if n.as_i64().is_none() && n.as_u64().is_some() => Value::String(n.to_string()),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Object(fields) => Value::Object(fields.into_iter().map(|(k, v)| (k, normalize(v))).collect()),
        other => other,
    }
}
