//! Kind-specific coercion of raw JSON values and constraint checks.

use crate::schema::{Constraints, ScalarType};
use crate::value::FieldValue;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

pub(crate) const REQUIRED: &str = "this field is required";
pub(crate) const NOT_NULL: &str = "this field may not be null";
pub(crate) const NOT_BLANK: &str = "this field may not be blank";

/// Coerce a raw value to `ty`, then check `constraints`.
pub fn coerce_scalar(ty: ScalarType, raw: &Value, constraints: &Constraints) -> Result<FieldValue, String> {
    let value = match ty {
        ScalarType::String => coerce_string(raw, constraints)?,
        ScalarType::Integer => coerce_integer(raw)?,
        ScalarType::Float => coerce_float(raw)?,
        ScalarType::Boolean => coerce_bool(raw)?,
        ScalarType::DateTime => FieldValue::DateTime(coerce_datetime(raw)?),
        ScalarType::Uuid => coerce_uuid(raw)?,
    };
    check_constraints(&value, constraints)?;
    Ok(value)
}

/// Accept a related record's key: integers stay integers, everything else is trimmed text.
pub fn coerce_key(raw: &Value) -> Result<FieldValue, String> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .map(FieldValue::Int)
            .ok_or_else(|| format!("invalid key {}: expected an integer or string", n)),
        Value::String(s) => Ok(key_from_str(s)),
        Value::Object(o) if o.len() == 1 => match o.values().next() {
            Some(inner @ (Value::Number(_) | Value::String(_))) => coerce_key(inner),
            _ => Err("invalid key: expected an integer or string".into()),
        },
        _ => Err(format!("invalid key type {}: expected an integer or string", type_name(raw))),
    }
}

/// Lookup segments from paths and query strings.
pub fn key_from_str(s: &str) -> FieldValue {
    let s = s.trim();
    match s.parse::<i64>() {
        Ok(n) => FieldValue::Int(n),
        Err(_) => FieldValue::Text(s.to_string()),
    }
}

fn coerce_string(raw: &Value, constraints: &Constraints) -> Result<FieldValue, String> {
    let s = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => return Err(format!("expected a string, got {}", type_name(other))),
    };
    if s.is_empty() && !constraints.allow_blank {
        return Err(NOT_BLANK.into());
    }
    Ok(FieldValue::Text(s))
}

fn coerce_integer(raw: &Value) -> Result<FieldValue, String> {
    const MSG: &str = "a valid integer is required";
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(FieldValue::Int(i));
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(FieldValue::Int(f as i64)),
                _ => Err(MSG.into()),
            }
        }
        Value::String(s) => s.trim().parse::<i64>().map(FieldValue::Int).map_err(|_| MSG.into()),
        _ => Err(MSG.into()),
    }
}

fn coerce_float(raw: &Value) -> Result<FieldValue, String> {
    const MSG: &str = "a valid number is required";
    let f = match raw {
        Value::Number(n) => n.as_f64().ok_or(MSG)?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| MSG)?,
        _ => return Err(MSG.into()),
    };
    if !f.is_finite() {
        return Err(MSG.into());
    }
    Ok(FieldValue::Float(f))
}

fn coerce_bool(raw: &Value) -> Result<FieldValue, String> {
    const MSG: &str = "must be a valid boolean";
    match raw {
        Value::Bool(b) => Ok(FieldValue::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Ok(FieldValue::Bool(true)),
            Some(0) => Ok(FieldValue::Bool(false)),
            _ => Err(MSG.into()),
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FieldValue::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(FieldValue::Bool(false)),
            _ => Err(MSG.into()),
        },
        _ => Err(MSG.into()),
    }
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.f]` read as UTC.
pub fn coerce_datetime(raw: &Value) -> Result<DateTime<Utc>, String> {
    const MSG: &str = "invalid datetime; expected ISO-8601";
    let s = raw.as_str().ok_or(MSG)?.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Ok(d.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(MSG.into())
}

fn coerce_uuid(raw: &Value) -> Result<FieldValue, String> {
    raw.as_str()
        .and_then(|s| uuid::Uuid::parse_str(s.trim()).ok())
        .map(FieldValue::Uuid)
        .ok_or_else(|| "must be a valid UUID".into())
}

/// Does `value` have the shape `ty` coerces to?
pub(crate) fn matches_scalar(ty: ScalarType, value: &FieldValue) -> bool {
    matches!(
        (ty, value),
        (ScalarType::String, FieldValue::Text(_))
            | (ScalarType::Integer, FieldValue::Int(_))
            | (ScalarType::Float, FieldValue::Float(_) | FieldValue::Int(_))
            | (ScalarType::Boolean, FieldValue::Bool(_))
            | (ScalarType::DateTime, FieldValue::DateTime(_))
            | (ScalarType::Uuid, FieldValue::Uuid(_))
    )
}

pub fn check_constraints(value: &FieldValue, c: &Constraints) -> Result<(), String> {
    if let FieldValue::Text(s) = value {
        let len = s.chars().count();
        if let Some(max) = c.max_length {
            if len > max {
                return Err(format!("exceeds max length {}", max));
            }
        }
        if let Some(min) = c.min_length {
            if len < min {
                return Err(format!("shorter than min length {}", min));
            }
        }
        if let Some(pattern) = &c.pattern {
            if !pattern.0.is_match(s) {
                return Err(format!("does not match pattern {}", pattern.0.as_str()));
            }
        }
    }
    let number = match value {
        FieldValue::Int(n) => Some(*n as f64),
        FieldValue::Float(f) => Some(*f),
        _ => None,
    };
    if let Some(n) = number {
        let below = c.minimum.is_some_and(|min| n < min);
        let above = c.maximum.is_some_and(|max| n > max);
        if below || above {
            return Err(match (c.minimum, c.maximum) {
                (Some(min), Some(max)) => format!("ensure value is between {} and {}", min, max),
                (Some(min), None) => format!("ensure value is greater than or equal to {}", min),
                (None, Some(max)) => format!("ensure value is less than or equal to {}", max),
                (None, None) => unreachable!("bounds checked above"),
            });
        }
    }
    if let Some(choices) = &c.choices {
        if !choices.iter().any(|choice| choice == value || choice.same_key(value)) {
            return Err(format!("'{}' is not a valid choice", value));
        }
    }
    Ok(())
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn none() -> Constraints {
        Constraints::default()
    }

    #[test]
    fn strings_are_trimmed_and_blank_rejected() {
        assert_eq!(
            coerce_scalar(ScalarType::String, &json!("  hi "), &none()),
            Ok(FieldValue::from("hi"))
        );
        assert_eq!(coerce_scalar(ScalarType::String, &json!("   "), &none()), Err(NOT_BLANK.into()));
        let blank_ok = Constraints { allow_blank: true, ..none() };
        assert_eq!(coerce_scalar(ScalarType::String, &json!(""), &blank_ok), Ok(FieldValue::from("")));
    }

    #[test]
    fn max_length_message() {
        let c = Constraints { max_length: Some(5), ..none() };
        assert_eq!(
            coerce_scalar(ScalarType::String, &json!("toolong"), &c),
            Err("exceeds max length 5".into())
        );
    }

    #[test]
    fn numbers_parse_from_strings_and_report_range() {
        assert_eq!(coerce_scalar(ScalarType::Integer, &json!(" 42 "), &none()), Ok(FieldValue::Int(42)));
        assert!(coerce_scalar(ScalarType::Integer, &json!(4.5), &none()).is_err());
        let c = Constraints { minimum: Some(0.0), maximum: Some(120.0), ..none() };
        assert_eq!(
            coerce_scalar(ScalarType::Integer, &json!(150), &c),
            Err("ensure value is between 0 and 120".into())
        );
        let c = Constraints { minimum: Some(1.0), ..none() };
        assert_eq!(
            coerce_scalar(ScalarType::Float, &json!(0.5), &c),
            Err("ensure value is greater than or equal to 1".into())
        );
    }

    #[test]
    fn datetimes_normalize_to_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 1, 4, 5).unwrap();
        assert_eq!(coerce_datetime(&json!("2024-01-02T03:04:05+02:00")), Ok(expected));
        assert_eq!(coerce_datetime(&json!("2024-01-02T01:04:05")), Ok(expected));
        assert!(coerce_datetime(&json!("yesterday")).is_err());
    }

    #[test]
    fn booleans_and_choices() {
        assert_eq!(coerce_scalar(ScalarType::Boolean, &json!("Yes"), &none()), Ok(FieldValue::Bool(true)));
        let c = Constraints {
            choices: Some(vec!["python".into(), "rust".into()]),
            ..none()
        };
        assert_eq!(
            coerce_scalar(ScalarType::String, &json!("cobol"), &c),
            Err("'cobol' is not a valid choice".into())
        );
    }

    #[test]
    fn keys_accept_integers_and_strings() {
        assert_eq!(coerce_key(&json!(3)), Ok(FieldValue::Int(3)));
        assert_eq!(coerce_key(&json!("3")), Ok(FieldValue::Int(3)));
        assert_eq!(coerce_key(&json!("ab-1")), Ok(FieldValue::from("ab-1")));
        assert!(coerce_key(&json!([1])).is_err());
    }
}
