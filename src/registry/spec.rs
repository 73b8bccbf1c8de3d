//! Flag schema entries and value coercion.

use crate::types::FlagValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Words accepted as `true` when a boolean is written as text.
pub const TRUTHY: &[&str] = &["true", "yes", "1", "on"];
/// Words accepted as `false` when a boolean is written as text.
pub const FALSY: &[&str] = &["false", "no", "0", "off"];

/// Parse a truthy/falsy word (case-insensitive, surrounding whitespace ignored).
pub fn parse_bool(text: &str) -> Option<bool> {
    let lowered = text.trim().to_ascii_lowercase();
    if TRUTHY.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSY.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Declared type of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "int")]
    Integer,
    String,
    #[serde(alias = "choice")]
    Enum,
}

impl fmt::Display for FlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagKind::Boolean => write!(f, "boolean"),
            FlagKind::Integer => write!(f, "integer"),
            FlagKind::String => write!(f, "string"),
            FlagKind::Enum => write!(f, "enum"),
        }
    }
}

/// Flag entry as written in a definition document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagDefinition {
    #[serde(rename = "type")]
    pub kind: FlagKind,

    /// Default allowlist state.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed value set (required for `enum`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Why a raw value failed to coerce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoercionFailure {
    /// Not representable as the declared type
    Type,
    /// Representable, but outside the allowed value set
    NotAllowed(Vec<String>),
    /// Integer outside `min`/`max`
    OutOfRange {
        value: i64,
        min: Option<i64>,
        max: Option<i64>,
    },
}

/// Validated schema entry for one flag in one scope. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagSpec {
    pub name: String,
    pub kind: FlagKind,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<FlagValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FlagSpec {
    /// Build a spec from its definition, checking the definition is self-consistent.
    pub fn from_definition(name: &str, def: FlagDefinition) -> Result<Self, String> {
        if def.kind == FlagKind::Enum && def.values.as_ref().is_none_or(|v| v.is_empty()) {
            return Err("enum flags must declare a non-empty `values` list".to_string());
        }
        if def.kind != FlagKind::Integer && (def.min.is_some() || def.max.is_some()) {
            return Err(format!("`min`/`max` are only valid on integer flags, not {}", def.kind));
        }
        if let (Some(min), Some(max)) = (def.min, def.max)
            && min > max
        {
            return Err(format!("`min` ({min}) is greater than `max` ({max})"));
        }

        let allowed_values = match def.values {
            None => None,
            Some(values) => Some(
                values
                    .iter()
                    .map(|v| scalar_text(v).ok_or_else(|| format!("allowed value {v} is not a scalar")))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };

        let mut spec = Self {
            name: name.to_string(),
            kind: def.kind,
            enabled: def.enabled,
            default: None,
            allowed_values,
            min: def.min,
            max: def.max,
            description: def.description,
        };

        if let Some(raw) = def.default {
            let value = spec
                .coerce(&raw)
                .map_err(|failure| format!("default {raw} is invalid: {failure:?}"))?;
            spec.default = Some(value);
        }

        Ok(spec)
    }

    /// Coerce a raw value to this flag's declared type and check its constraints.
    ///
    /// Text is parsed into the declared type first ("8" becomes integer 8).
    pub fn coerce(&self, raw: &Value) -> Result<FlagValue, CoercionFailure> {
        let value = match self.kind {
            FlagKind::Boolean => match raw {
                Value::Bool(b) => FlagValue::Bool(*b),
                Value::String(s) => FlagValue::Bool(parse_bool(s).ok_or(CoercionFailure::Type)?),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => FlagValue::Bool(false),
                    Some(1) => FlagValue::Bool(true),
                    _ => return Err(CoercionFailure::Type),
                },
                _ => return Err(CoercionFailure::Type),
            },
            FlagKind::Integer => match raw {
                Value::Number(n) => FlagValue::Integer(n.as_i64().ok_or(CoercionFailure::Type)?),
                Value::String(s) => {
                    FlagValue::Integer(s.trim().parse::<i64>().map_err(|_| CoercionFailure::Type)?)
                }
                _ => return Err(CoercionFailure::Type),
            },
            FlagKind::String | FlagKind::Enum => {
                FlagValue::String(scalar_text(raw).ok_or(CoercionFailure::Type)?)
            }
        };

        if let Some(ref allowed) = self.allowed_values {
            let text = value.to_arg();
            if !allowed.iter().any(|a| *a == text) {
                return Err(CoercionFailure::NotAllowed(allowed.clone()));
            }
        }

        if let FlagValue::Integer(i) = value {
            let below = self.min.is_some_and(|min| i < min);
            let above = self.max.is_some_and(|max| i > max);
            if below || above {
                return Err(CoercionFailure::OutOfRange {
                    value: i,
                    min: self.min,
                    max: self.max,
                });
            }
        }

        Ok(value)
    }
}

/// Text form of a scalar JSON value; `None` for arrays, objects and null.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(yaml: &str) -> FlagSpec {
        let def: FlagDefinition = serde_yaml::from_str(yaml).unwrap();
        FlagSpec::from_definition("flag", def).unwrap()
    }

    #[test]
    fn test_parse_bool_words() {
        for word in ["true", "YES", " 1 ", "On"] {
            assert_eq!(parse_bool(word), Some(true), "{word}");
        }
        for word in ["false", "no", "0", "OFF"] {
            assert_eq!(parse_bool(word), Some(false), "{word}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_integer_coercion_from_text() {
        let threads = spec("type: integer\ndefault: 4");
        assert_eq!(threads.default, Some(FlagValue::Integer(4)));
        assert_eq!(threads.coerce(&json!("8")), Ok(FlagValue::Integer(8)));
        assert_eq!(threads.coerce(&json!(8)), Ok(FlagValue::Integer(8)));
        assert_eq!(threads.coerce(&json!("abc")), Err(CoercionFailure::Type));
        assert_eq!(threads.coerce(&json!(true)), Err(CoercionFailure::Type));
    }

    #[test]
    fn test_integer_bounds() {
        let threads = spec("type: integer\nmin: 1\nmax: 64");
        assert_eq!(threads.coerce(&json!("64")), Ok(FlagValue::Integer(64)));
        assert_eq!(
            threads.coerce(&json!(0)),
            Err(CoercionFailure::OutOfRange {
                value: 0,
                min: Some(1),
                max: Some(64)
            })
        );
    }

    #[test]
    fn test_boolean_coercion() {
        let fail_fast = spec("type: boolean");
        assert_eq!(fail_fast.coerce(&json!("yes")), Ok(FlagValue::Bool(true)));
        assert_eq!(fail_fast.coerce(&json!(false)), Ok(FlagValue::Bool(false)));
        assert_eq!(fail_fast.coerce(&json!(1)), Ok(FlagValue::Bool(true)));
        assert_eq!(fail_fast.coerce(&json!("sometimes")), Err(CoercionFailure::Type));
    }

    #[test]
    fn test_enum_allowed_values() {
        let log_format = spec("type: enum\nvalues: [text, json]");
        assert_eq!(log_format.coerce(&json!("json")), Ok(FlagValue::from("json")));
        assert_eq!(
            log_format.coerce(&json!("xml")),
            Err(CoercionFailure::NotAllowed(vec!["text".into(), "json".into()]))
        );
    }

    #[test]
    fn test_definition_integrity() {
        let enum_without_values: FlagDefinition = serde_yaml::from_str("type: enum").unwrap();
        assert!(FlagSpec::from_definition("x", enum_without_values).is_err());

        let bounded_string: FlagDefinition = serde_yaml::from_str("type: string\nmin: 1").unwrap();
        assert!(FlagSpec::from_definition("x", bounded_string).is_err());

        let bad_default: FlagDefinition =
            serde_yaml::from_str("type: integer\ndefault: lots").unwrap();
        let err = FlagSpec::from_definition("x", bad_default).unwrap_err();
        assert!(err.contains("default"));
    }

    #[test]
    fn test_unknown_definition_field_rejected() {
        let result: Result<FlagDefinition, _> = serde_yaml::from_str("type: string\nenable: true");
        assert!(result.is_err());
    }
}
