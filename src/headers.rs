//! Header codec for the sideband wire format.
//!
//! The sideband protocol carries headers as an array of single-entry objects
//! with lowercase names; multi-valued headers appear as repeated entries:
//!
//! ```json
//! [{"accept": "application/json"}, {"x-tag": "a"}, {"x-tag": "b"}]
//! ```
//!
//! [`encode`] and [`decode`] convert between that form and the gateway's
//! multi-valued map. The round-trip law holds: decoding an encoded map yields
//! the original map with lowercased keys and per-key value order preserved
//! (cross-key order is unspecified, as on the wire).

use std::collections::HashMap;

use serde_json::Value;

use crate::error::AuthGateError;

/// Gateway-side header map: name → values, in value order.
pub type HeaderMultiMap = HashMap<String, Vec<String>>;

/// Wire-side header list: single-entry objects with lowercase names.
pub type WireHeaders = Vec<HashMap<String, String>>;

/// Loosely typed header table as produced by gateway façades: each value is
/// a JSON string or an array of JSON strings.
pub type HeaderTable = serde_json::Map<String, Value>;

/// Converts a multi-valued header map to the wire form.
///
/// Names are lowercased; value order within a name is preserved.
pub fn encode(headers: &HeaderMultiMap) -> WireHeaders {
    let mut result = WireHeaders::with_capacity(headers.len());
    for (name, values) in headers {
        let lower = name.to_ascii_lowercase();
        for value in values {
            let mut entry = HashMap::with_capacity(1);
            entry.insert(lower.clone(), value.clone());
            result.push(entry);
        }
    }
    result
}

/// Converts the wire form back to a multi-valued map.
///
/// Names are lowercased; duplicate names accumulate values in encounter
/// order.
pub fn decode(headers: &[HashMap<String, String>]) -> HeaderMultiMap {
    let mut result = HeaderMultiMap::new();
    for entry in headers {
        for (name, value) in entry {
            result
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value.clone());
        }
    }
    result
}

/// Converts a loosely typed façade header table to a multi-valued map.
///
/// Accepts string values and arrays of strings. Anything nested deeper is a
/// structural error, surfaced upstream as a 400-class composition failure.
///
/// # Errors
///
/// Returns [`AuthGateError::Composition`] for a value that is neither a
/// string nor an array of strings.
pub fn from_table(table: &HeaderTable) -> Result<HeaderMultiMap, AuthGateError> {
    let mut result = HeaderMultiMap::new();
    for (name, value) in table {
        let lower = name.to_ascii_lowercase();
        match value {
            Value::String(s) => result.entry(lower).or_default().push(s.clone()),
            Value::Array(items) => {
                let slot = result.entry(lower).or_default();
                for item in items {
                    match item {
                        Value::String(s) => slot.push(s.clone()),
                        _ => {
                            return Err(AuthGateError::Composition {
                                details: format!("multidimensional header value for {name:?}"),
                            });
                        }
                    }
                }
            }
            _ => {
                return Err(AuthGateError::Composition {
                    details: format!("multidimensional header value for {name:?}"),
                });
            }
        }
    }
    Ok(result)
}

/// First value of a header in a multi-valued map, looked up by lowercase
/// name against lowercased keys.
pub fn first_value<'a>(headers: &'a HeaderMultiMap, lower_name: &str) -> Option<&'a str> {
    headers.iter().find_map(|(name, values)| {
        if name.eq_ignore_ascii_case(lower_name) {
            values.first().map(String::as_str)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn multi(entries: &[(&str, &[&str])]) -> HeaderMultiMap {
        entries
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_encode_lowercases_and_splits_values() {
        let headers = multi(&[("Content-Type", &["application/json"]), ("X-Tag", &["a", "b"])]);
        let wire = encode(&headers);
        assert_eq!(wire.len(), 3);
        for entry in &wire {
            assert_eq!(entry.len(), 1);
            let name = entry.keys().next().expect("single key");
            assert_eq!(name, &name.to_ascii_lowercase());
        }
        let decoded = decode(&wire);
        assert_eq!(decoded["content-type"], vec!["application/json"]);
        assert_eq!(decoded["x-tag"], vec!["a", "b"]);
    }

    #[test]
    fn test_encode_empty_map() {
        assert!(encode(&HeaderMultiMap::new()).is_empty());
    }

    #[test]
    fn test_decode_accumulates_duplicates_in_order() {
        let wire: WireHeaders = vec![
            HashMap::from([("X-Tag".to_string(), "first".to_string())]),
            HashMap::from([("x-tag".to_string(), "second".to_string())]),
            HashMap::from([("x-TAG".to_string(), "third".to_string())]),
        ];
        let decoded = decode(&wire);
        assert_eq!(decoded["x-tag"], vec!["first", "second", "third"]);
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode(&[]).is_empty());
    }

    #[test]
    fn test_round_trip_preserves_value_order() {
        let headers = multi(&[
            ("Accept", &["text/html", "application/json", "*/*"]),
            ("Host", &["svc.example.com"]),
        ]);
        let decoded = decode(&encode(&headers));
        assert_eq!(
            decoded["accept"],
            vec!["text/html", "application/json", "*/*"]
        );
        assert_eq!(decoded["host"], vec!["svc.example.com"]);
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_from_table_accepts_strings_and_arrays() {
        let mut table = HeaderTable::new();
        table.insert("Host".to_string(), json!("svc.example.com"));
        table.insert("X-Tag".to_string(), json!(["a", "b"]));
        let map = from_table(&table).expect("should convert");
        assert_eq!(map["host"], vec!["svc.example.com"]);
        assert_eq!(map["x-tag"], vec!["a", "b"]);
    }

    #[test]
    fn test_from_table_rejects_nested_arrays() {
        let mut table = HeaderTable::new();
        table.insert("X-Bad".to_string(), json!([["nested"]]));
        let err = from_table(&table).expect_err("should reject");
        assert!(matches!(err, AuthGateError::Composition { .. }));
        assert!(err.to_string().contains("X-Bad"));
    }

    #[test]
    fn test_from_table_rejects_non_string_values() {
        let mut table = HeaderTable::new();
        table.insert("X-Num".to_string(), json!(42));
        assert!(matches!(
            from_table(&table),
            Err(AuthGateError::Composition { .. })
        ));
    }

    #[test]
    fn test_first_value_case_insensitive() {
        let headers = multi(&[("Content-Type", &["text/event-stream", "ignored"])]);
        assert_eq!(
            first_value(&headers, "content-type"),
            Some("text/event-stream")
        );
        assert_eq!(first_value(&headers, "x-missing"), None);
    }
}
