//! JSON projections of codec values, for the query surface only. The
//! persisted forms always carry hex-encoded codec bytes; this module is
//! what humans see.

use num_bigint::BigInt;
use rust_decimal::Decimal;

use dvm_types::{canonical_decimal_string, Value, ValueMap};

/// Renders a value for a JSON response. Integers that fit in an `i64`
/// become JSON numbers, wider ones become strings; decimals are always
/// strings so no precision is lost in transit; byte strings are hex.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Int(n) => match i64::try_from(n) {
            Ok(small) => serde_json::Value::from(small),
            Err(_) => serde_json::Value::String(n.to_string()),
        },
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(hex::encode(b)),
        Value::Decimal(d) => serde_json::Value::String(canonical_decimal_string(d)),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::List(items) | Value::Tuple(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
        Value::Map(map) => {
            let mut obj = serde_json::Map::new();
            for (key, item) in map.iter() {
                obj.insert(json_key(key), value_to_json(item));
            }
            serde_json::Value::Object(obj)
        }
    }
}

fn json_key(key: &Value) -> String {
    match key {
        Value::Str(s) => s.clone(),
        Value::Int(n) => n.to_string(),
        Value::Decimal(d) => canonical_decimal_string(d),
        Value::Bool(b) => b.to_string(),
        Value::Bytes(b) => hex::encode(b),
        other => format!("<{}>", other.kind()),
    }
}

/// Parses a JSON argument into a codec value: numbers become integers or
/// decimals, objects become string-keyed maps, arrays become lists.
pub fn json_to_value(json: &serde_json::Value) -> Result<Value, String> {
    match json {
        serde_json::Value::Null => Err("null is not a supported value".to_string()),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(BigInt::from(i)))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::Int(BigInt::from(u)))
            } else {
                n.to_string()
                    .parse::<Decimal>()
                    .map(Value::Decimal)
                    .map_err(|e| format!("unrepresentable number {n}: {e}"))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
        serde_json::Value::Array(items) => Ok(Value::List(
            items.iter().map(json_to_value).collect::<Result<_, _>>()?,
        )),
        serde_json::Value::Object(obj) => {
            let mut map = ValueMap::new();
            for (key, item) in obj {
                map.insert(Value::str(key.clone()), json_to_value(item)?);
            }
            Ok(Value::Map(map))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn scalars_round_trip_through_json() {
        let v = json_to_value(&serde_json::json!(42)).unwrap();
        assert_eq!(v, Value::int(42));
        assert_eq!(value_to_json(&v), serde_json::json!(42));

        let v = json_to_value(&serde_json::json!("12.5")).unwrap();
        assert_eq!(v, Value::str("12.5"));
    }

    #[test]
    fn fractional_numbers_become_decimals() {
        let v = json_to_value(&serde_json::json!(1.25)).unwrap();
        assert_eq!(v, Value::Decimal(Decimal::from_str("1.25").unwrap()));
        assert_eq!(value_to_json(&v), serde_json::json!("1.25"));
    }

    #[test]
    fn wide_integers_render_as_strings() {
        let wide = Value::Int(BigInt::from_str("123456789012345678901234567890").unwrap());
        assert_eq!(
            value_to_json(&wide),
            serde_json::json!("123456789012345678901234567890")
        );
    }

    #[test]
    fn null_is_rejected() {
        assert!(json_to_value(&serde_json::Value::Null).is_err());
    }

    #[test]
    fn maps_keep_string_keys() {
        let v = json_to_value(&serde_json::json!({"a": 1, "b": [true]})).unwrap();
        let json = value_to_json(&v);
        assert_eq!(json, serde_json::json!({"a": 1, "b": [true]}));
    }
}
