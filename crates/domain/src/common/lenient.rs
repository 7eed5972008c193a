//! Lenient readers for loosely typed JSON.
//!
//! The `deserialize_with` helpers never fail on a wrongly typed value: they
//! yield `None` so that one bad field cannot reject a whole token record.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Reads a JSON number as an integer, truncating fractional values.
///
/// ```
/// use serde_json::json;
/// use tabletop_domain::common::value_as_int;
///
/// assert_eq!(value_as_int(&json!(7)), Some(7));
/// assert_eq!(value_as_int(&json!(6.9)), Some(6));
/// assert_eq!(value_as_int(&json!("7")), None);
/// ```
pub fn value_as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        _ => None,
    }
}

/// Reads a finite JSON number as a float.
pub fn value_as_float(value: &Value) -> Option<f64> {
    value.as_f64().filter(|f| f.is_finite())
}

/// Integer field of a JSON object, or `default` when absent or not numeric.
pub fn int_or(map: &Map<String, Value>, key: &str, default: i64) -> i64 {
    map.get(key).and_then(value_as_int).unwrap_or(default)
}

/// `deserialize_with` helper: any value that does not fit `T` becomes `None`.
pub fn optional<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// `deserialize_with` helper for integer fields that may arrive as floats.
pub fn optional_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_int))
}

/// `deserialize_with` helper for float fields; non-finite values are dropped.
pub fn optional_float<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_float))
}

/// `deserialize_with` helper distinguishing an explicit `null` from absence.
///
/// Use together with `#[serde(default)]`: absent → `None`, `null` →
/// `Some(None)`, a fitting value → `Some(Some(v))`. A value of the wrong type
/// counts as absent.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Some(None)),
        other => Ok(serde_json::from_value(other).ok().map(Some)),
    }
}
