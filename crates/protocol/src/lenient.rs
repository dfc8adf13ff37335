//! Forgiving field decoders and sparse-encoding predicates.
//!
//! The control plane occasionally sends a field with an unexpected JSON
//! type.  These helpers map anything unusable to the field's "absent"
//! value so one bad field never discards a whole frame.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

/// Positive 32-bit integer, otherwise `None`.
pub fn positive_i32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
    Ok(Value::deserialize(d)?
        .as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .filter(|n| *n > 0))
}

/// Positive 64-bit integer, otherwise `None`.
pub fn positive_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(Value::deserialize(d)?.as_i64().filter(|n| *n > 0))
}

/// Any integer, otherwise `None`.  Used for status codes.
pub fn any_i32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
    Ok(Value::deserialize(d)?
        .as_i64()
        .and_then(|n| i32::try_from(n).ok()))
}

pub fn boolean<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(Value::deserialize(d)?.as_bool().unwrap_or(false))
}

pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

pub fn string_map<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    })
}

/// Array of `T`, skipping elements that fail to decode.
pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Nested object, default when missing or malformed.
pub fn object<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned + Default,
{
    Ok(serde_json::from_value(Value::deserialize(d)?).unwrap_or_default())
}

// ── Sparse-encoding predicates ───────────────────────────────────────

pub fn not_positive_i32(v: &Option<i32>) -> bool {
    !matches!(v, Some(n) if *n > 0)
}

pub fn not_positive_i64(v: &Option<i64>) -> bool {
    !matches!(v, Some(n) if *n > 0)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize, Default)]
    struct Lenient {
        #[serde(default, deserialize_with = "super::positive_i32")]
        n: Option<i32>,
        #[serde(default, deserialize_with = "super::string_list")]
        l: Vec<String>,
    }

    #[test]
    fn non_positive_numbers_are_absent() {
        let p: Lenient = serde_json::from_str(r#"{"n":0}"#).unwrap();
        assert_eq!(p.n, None);
        let p: Lenient = serde_json::from_str(r#"{"n":-4}"#).unwrap();
        assert_eq!(p.n, None);
        let p: Lenient = serde_json::from_str(r#"{"n":"7"}"#).unwrap();
        assert_eq!(p.n, None);
        let p: Lenient = serde_json::from_str(r#"{"n":7}"#).unwrap();
        assert_eq!(p.n, Some(7));
    }

    #[test]
    fn string_list_drops_non_strings() {
        let p: Lenient = serde_json::from_str(r#"{"l":["a",1,"b",null]}"#).unwrap();
        assert_eq!(p.l, vec!["a", "b"]);
    }
}
