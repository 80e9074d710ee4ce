//! Inbound message validation and deep sanitization.
//!
//! Everything here is purely functional: a message either comes out as a
//! clean `serde_json::Value` or is rejected with a reason the connection
//! layer turns into a warning and a silent drop. `sanitize_value` is
//! idempotent, so re-sanitizing an already-clean payload is a no-op.

use serde_json::{Map, Number, Value};

use crate::error::BridgeError;
use crate::protocol::{GpsFix, SensorSample, MAX_MESSAGE_BYTES};

/// Canonical cap on sanitized string length, in characters.
pub const MAX_STRING_LEN: usize = 500;

/// Validate a raw producer message: size cap, strict UTF-8, character
/// allow-list, JSON parse, top-level-object check.
pub fn validate(raw: &[u8]) -> Result<Value, BridgeError> {
    if raw.len() > MAX_MESSAGE_BYTES {
        return Err(BridgeError::MessageTooLarge(raw.len()));
    }

    // Strict decode also rules out unpaired surrogates, which cannot be
    // encoded as valid UTF-8 in the first place.
    let text = std::str::from_utf8(raw).map_err(|_| BridgeError::InvalidUtf8)?;

    if text.chars().any(is_forbidden_char) {
        return Err(BridgeError::ForbiddenCharacters);
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| BridgeError::InvalidJson(e.to_string()))?;

    if !value.is_object() {
        return Err(BridgeError::NotAnObject);
    }

    Ok(value)
}

/// Control characters outside `\t \n \r`, DEL, and the two noncharacters
/// U+FFFE / U+FFFF.
fn is_forbidden_char(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}')
        || matches!(c, '\u{FFFE}' | '\u{FFFF}')
}

/// Recursively normalize every value in a parsed object.
///
/// Strings are scrubbed and truncated, non-finite numbers become 0 and
/// finite ones are rounded to 6 decimal places, objects are rebuilt with
/// sanitized keys and values, arrays element-wise. Booleans and null pass
/// through unchanged.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(&s)),
        Value::Number(n) => sanitize_number(n),
        Value::Object(map) => {
            let mut sanitized = Map::with_capacity(map.len());
            for (key, val) in map {
                sanitized.insert(sanitize_string(&key), sanitize_value(val));
            }
            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        other => other,
    }
}

fn sanitize_string(s: &str) -> String {
    s.chars()
        .filter(|c| !is_forbidden_char(*c))
        .take(MAX_STRING_LEN)
        .collect()
}

fn sanitize_number(n: Number) -> Value {
    // Integers are already finite and unaffected by 6-decimal rounding;
    // keep them as-is so sanitization stays idempotent across number kinds.
    if n.is_i64() || n.is_u64() {
        return Value::Number(n);
    }
    let rounded = n
        .as_f64()
        .filter(|v| v.is_finite())
        .map(round6)
        .unwrap_or(0.0);
    Number::from_f64(rounded)
        .map(Value::Number)
        .unwrap_or_else(|| Value::Number(Number::from(0)))
}

/// Round to 6 decimal places.
pub fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

/// Drop the entire `gps` sub-object when latitude or longitude is missing
/// or outside its valid range.
pub fn scrub_gps(sample: &mut SensorSample) {
    if let Some(gps) = sample.gps.take() {
        if gps_in_range(&gps) {
            sample.gps = Some(gps);
        }
    }
}

fn gps_in_range(gps: &GpsFix) -> bool {
    let lat_ok = gps.latitude.map_or(false, |lat| (-90.0..=90.0).contains(&lat));
    let lon_ok = gps
        .longitude
        .map_or(false, |lon| (-180.0..=180.0).contains(&lon));
    lat_ok && lon_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_rejects_oversized() {
        let big = vec![b' '; MAX_MESSAGE_BYTES + 1];
        assert!(matches!(
            validate(&big),
            Err(BridgeError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn validate_rejects_invalid_utf8() {
        assert!(matches!(
            validate(&[0xFF, 0xFE, b'{', b'}']),
            Err(BridgeError::InvalidUtf8)
        ));
    }

    #[test]
    fn validate_rejects_control_characters() {
        assert!(matches!(
            validate(b"{\"a\": \"b\x01c\"}"),
            Err(BridgeError::ForbiddenCharacters)
        ));
    }

    #[test]
    fn validate_rejects_non_object() {
        assert!(matches!(validate(b"[1, 2, 3]"), Err(BridgeError::NotAnObject)));
        assert!(matches!(validate(b"42"), Err(BridgeError::NotAnObject)));
    }

    #[test]
    fn validate_rejects_bad_json() {
        assert!(matches!(
            validate(b"{not json"),
            Err(BridgeError::InvalidJson(_))
        ));
    }

    #[test]
    fn validate_accepts_clean_object() {
        let value = validate(b"{\"accelerometer\": {\"x\": 1.5}}").unwrap();
        assert_eq!(value["accelerometer"]["x"], 1.5);
    }

    #[test]
    fn sanitize_rounds_to_six_decimals() {
        let out = sanitize_value(json!({"v": 1.123456789}));
        assert_eq!(out["v"].as_f64().unwrap(), 1.123457);
    }

    #[test]
    fn sanitize_keeps_integers_intact() {
        let out = sanitize_value(json!({"n": 42, "m": -7}));
        assert_eq!(out["n"], 42);
        assert_eq!(out["m"], -7);
    }

    #[test]
    fn sanitize_truncates_long_strings() {
        let long: String = "a".repeat(MAX_STRING_LEN + 50);
        let out = sanitize_value(json!({"s": long}));
        assert_eq!(out["s"].as_str().unwrap().len(), MAX_STRING_LEN);
    }

    #[test]
    fn sanitize_strips_control_chars_from_strings_and_keys() {
        let mut map = Map::new();
        map.insert("ke\u{01}y".to_string(), json!("va\u{7F}lue\u{FFFF}"));
        let out = sanitize_value(Value::Object(map));
        assert_eq!(out["key"], "value");
    }

    #[test]
    fn sanitize_recurses_into_arrays() {
        let out = sanitize_value(json!({"xs": [1.00000049, "b\u{0B}c"]}));
        assert_eq!(out["xs"][0].as_f64().unwrap(), 1.0);
        assert_eq!(out["xs"][1], "bc");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let input = json!({
            "accelerometer": {"x": 1.23456789, "y": -0.000001234, "z": 9.81},
            "note": format!("hello {}", "x".repeat(600)),
            "nested": {"flag": true, "missing": null, "list": [3.14159265]}
        });
        let once = sanitize_value(input);
        let twice = sanitize_value(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn all_sanitized_numbers_are_finite() {
        let out = sanitize_value(json!({"a": 1.5, "b": [2.5, {"c": -3.123456789}]}));
        fn check(v: &Value) {
            match v {
                Value::Number(n) => assert!(n.as_f64().unwrap().is_finite()),
                Value::Object(m) => m.values().for_each(check),
                Value::Array(xs) => xs.iter().for_each(check),
                _ => {}
            }
        }
        check(&out);
    }

    #[test]
    fn gps_out_of_range_latitude_drops_subobject() {
        let mut sample: SensorSample = serde_json::from_value(json!({
            "gps": {"latitude": 91.0, "longitude": 10.0}
        }))
        .unwrap();
        scrub_gps(&mut sample);
        assert!(sample.gps.is_none());
    }

    #[test]
    fn gps_out_of_range_longitude_drops_subobject() {
        let mut sample: SensorSample = serde_json::from_value(json!({
            "gps": {"latitude": 45.0, "longitude": 200.0}
        }))
        .unwrap();
        scrub_gps(&mut sample);
        assert!(sample.gps.is_none());
    }

    #[test]
    fn gps_in_range_passes_through() {
        let mut sample: SensorSample = serde_json::from_value(json!({
            "gps": {"latitude": 45.0, "longitude": 90.0, "accuracy": 5.0}
        }))
        .unwrap();
        scrub_gps(&mut sample);
        let gps = sample.gps.unwrap();
        assert_eq!(gps.latitude, Some(45.0));
        assert_eq!(gps.longitude, Some(90.0));
        assert_eq!(gps.accuracy, Some(5.0));
    }
}
