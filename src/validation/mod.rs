//! Structural validation for inbound webhook parameters and creation input.
//!
//! Each webhook method declares a schema: a flat list of dotted paths with
//! their expected JSON type. Validation keeps declared paths only, so fields
//! a provider adds later are dropped rather than rejected.

use serde_json::{Map, Value};
use bigdecimal::BigDecimal;
use std::fmt;

pub const CURRENCY_CODE_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FieldKind::String => "a string",
            FieldKind::Integer => "an integer",
            FieldKind::Boolean => "a boolean",
            FieldKind::Object => "an object",
            FieldKind::Array => "an array",
        }
    }
}

/// One declared parameter of a webhook method. `path` is dot separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub path: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(path: &'static str, kind: FieldKind) -> Self {
        Self {
            path,
            kind,
            required: true,
        }
    }

    pub const fn optional(path: &'static str, kind: FieldKind) -> Self {
        Self {
            path,
            kind,
            required: false,
        }
    }
}

fn lookup<'a>(params: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(params, |node, segment| node.as_object()?.get(segment))
}

fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut node = target;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            node.insert(segment.to_string(), value);
            return;
        }
        let child = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        match child {
            Value::Object(map) => node = map,
            _ => return,
        }
    }
}

/// Validates `params` against `schema` and returns only the declared fields.
///
/// Missing required fields, wrong types and empty required strings are
/// rejected. A declared optional field that is present must still have the
/// declared type. `null` counts as absent.
pub fn validate_params(schema: &[FieldSpec], params: &Value) -> Result<Value, ValidationError> {
    if !params.is_object() {
        return Err(ValidationError::new("params", "must be an object"));
    }

    let mut sanitized = Map::new();
    for spec in schema {
        match lookup(params, spec.path).filter(|value| !value.is_null()) {
            None if spec.required => {
                return Err(ValidationError::new(spec.path, "is required"));
            }
            None => {}
            Some(value) => {
                if !spec.kind.matches(value) {
                    return Err(ValidationError::new(
                        spec.path,
                        format!("must be {}", spec.kind.label()),
                    ));
                }
                if let Value::String(text) = value {
                    let cleaned = sanitize_string(text);
                    if spec.required {
                        validate_required(spec.path, &cleaned)?;
                    }
                    insert_path(&mut sanitized, spec.path, Value::String(cleaned));
                } else {
                    insert_path(&mut sanitized, spec.path, value.clone());
                }
            }
        }
    }

    Ok(Value::Object(sanitized))
}

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_currency_code(currency: &str) -> ValidationResult {
    validate_required("currency", currency)?;

    if currency.len() != CURRENCY_CODE_LEN || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ValidationError::new(
            "currency",
            "must be a three-letter uppercase ISO code",
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    const EVENT_SCHEMA: &[FieldSpec] = &[
        FieldSpec::required("data.object.id", FieldKind::String),
        FieldSpec::optional("type", FieldKind::String),
        FieldSpec::optional("livemode", FieldKind::Boolean),
    ];

    #[test]
    fn keeps_declared_fields_and_drops_unknown_ones() {
        let params = json!({
            "id": "evt_1",
            "type": "charge.succeeded",
            "data": {"object": {"id": "ch_1", "amount": 2947}},
        });

        let sanitized = validate_params(EVENT_SCHEMA, &params).unwrap();
        assert_eq!(
            sanitized,
            json!({"type": "charge.succeeded", "data": {"object": {"id": "ch_1"}}})
        );
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = validate_params(EVENT_SCHEMA, &json!({"data": {"object": {}}})).unwrap_err();
        assert_eq!(err.field, "data.object.id");
        assert_eq!(err.message, "is required");
    }

    #[test]
    fn rejects_wrong_type() {
        let err = validate_params(EVENT_SCHEMA, &json!({"data": {"object": {"id": 42}}})).unwrap_err();
        assert_eq!(err.field, "data.object.id");

        let err = validate_params(
            EVENT_SCHEMA,
            &json!({"data": {"object": {"id": "ch_1"}}, "livemode": "yes"}),
        )
        .unwrap_err();
        assert_eq!(err.field, "livemode");
    }

    #[test]
    fn rejects_blank_required_string() {
        let err =
            validate_params(EVENT_SCHEMA, &json!({"data": {"object": {"id": "  "}}})).unwrap_err();
        assert_eq!(err.message, "must not be empty");
    }

    #[test]
    fn rejects_non_object_params() {
        assert!(validate_params(EVENT_SCHEMA, &json!(["ch_1"])).is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string(" \n "), "");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
    }

    #[test]
    fn validates_currency_code() {
        assert!(validate_currency_code("USD").is_ok());
        assert!(validate_currency_code("usd").is_err());
        assert!(validate_currency_code("EURO").is_err());
        assert!(validate_currency_code("").is_err());
    }

    #[test]
    fn validates_positive_amount() {
        let positive = BigDecimal::from_str("29.47").expect("valid decimal");
        assert!(validate_positive_amount(&positive).is_ok());
        assert!(validate_positive_amount(&BigDecimal::from(0)).is_err());
        assert!(validate_positive_amount(&BigDecimal::from(-1)).is_err());
    }
}
