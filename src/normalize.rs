//! Lenient field coercion for vendor webhook bodies.
//!
//! The hub is inconsistent about types: numbers arrive as JSON numbers or
//! numeric strings, flags as booleans, `"1"`/`"0"` or `1`/`0`, and the device
//! key as `imei` or `deviceImei`. These helpers never fail; anything they
//! cannot make sense of becomes `None`.

use serde_json::{Map, Value};

/// The device identifier, from `imei` or its alias `deviceImei`.
pub fn device_id(body: &Map<String, Value>) -> Option<String> {
    ["imei", "deviceImei"]
        .iter()
        .filter_map(|key| body.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// A finite float from a number or numeric string.
pub fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// An integer from a number or numeric string; fractional values truncate.
pub fn integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

/// A boolean-like flag: `true`/`"1"`/`1`/`"true"` or `false`/`"0"`/`0`/`"false"`.
pub fn flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(true),
            Some(f) if f == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A non-empty string, or a number rendered as one.
pub fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Copy of `body` without the keys a handler has already lifted out.
pub fn remainder(body: &Map<String, Value>, known: &[&str]) -> Map<String, Value> {
    body.iter()
        .filter(|(key, _)| !known.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn device_id_prefers_imei_then_alias() {
        assert_eq!(
            device_id(&obj(json!({"imei": "111", "deviceImei": "222"}))).as_deref(),
            Some("111")
        );
        assert_eq!(
            device_id(&obj(json!({"imei": "", "deviceImei": "222"}))).as_deref(),
            Some("222")
        );
        assert_eq!(
            device_id(&obj(json!({"imei": 861234567890123u64}))).as_deref(),
            Some("861234567890123")
        );
        assert_eq!(device_id(&obj(json!({"imei": null}))), None);
    }

    #[test]
    fn numbers_coerce_or_become_none() {
        assert_eq!(number(Some(&json!("-23.5"))), Some(-23.5));
        assert_eq!(number(Some(&json!(12))), Some(12.0));
        assert_eq!(number(Some(&json!(0))), Some(0.0));
        assert_eq!(number(Some(&json!("abc"))), None);
        assert_eq!(number(Some(&json!("NaN"))), None);
        assert_eq!(number(Some(&json!(true))), None);
        assert_eq!(number(None), None);
    }

    #[test]
    fn integers_truncate() {
        assert_eq!(integer(Some(&json!("7"))), Some(7));
        assert_eq!(integer(Some(&json!("7.9"))), Some(7));
        assert_eq!(integer(Some(&json!(31.2))), Some(31));
        assert_eq!(integer(Some(&json!(""))), None);
    }

    #[test]
    fn flags_accept_vendor_spellings() {
        assert_eq!(flag(Some(&json!(true))), Some(true));
        assert_eq!(flag(Some(&json!("1"))), Some(true));
        assert_eq!(flag(Some(&json!(1))), Some(true));
        assert_eq!(flag(Some(&json!("0"))), Some(false));
        assert_eq!(flag(Some(&json!(false))), Some(false));
        assert_eq!(flag(Some(&json!("maybe"))), None);
        assert_eq!(flag(None), None);
    }

    #[test]
    fn remainder_drops_known_keys() {
        let body = obj(json!({"imei": "1", "latitude": 1, "extra": "x"}));
        let rest = remainder(&body, &["imei", "latitude"]);
        assert_eq!(Value::Object(rest), json!({"extra": "x"}));
    }
}
