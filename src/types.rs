//! Core value types shared by the registry, the source readers and the resolver.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the global scope as rendered in messages and views.
pub const GLOBAL_SCOPE: &str = "global";

/// Scope a flag setting applies to.
///
/// `Global` applies to every verb; `Verb` applies only when that verb is invoked.
/// The two are independent namespaces: nothing set globally leaks into a verb scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Global,
    Verb(String),
}

impl Scope {
    /// Parse a scope name; `"global"` is the global scope, anything else a verb.
    pub fn parse(name: &str) -> Self {
        if name == GLOBAL_SCOPE {
            Scope::Global
        } else {
            Scope::Verb(name.to_string())
        }
    }

    pub fn verb(name: impl Into<String>) -> Self {
        Scope::Verb(name.into())
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }

    /// The verb name for a verb scope.
    pub fn verb_name(&self) -> Option<&str> {
        match self {
            Scope::Global => None,
            Scope::Verb(verb) => Some(verb),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Scope::Global => GLOBAL_SCOPE,
            Scope::Verb(verb) => verb,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Scope {
    fn from(name: &str) -> Self {
        Scope::parse(name)
    }
}

/// A flag name qualified by its scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlagKey {
    pub scope: Scope,
    pub flag: String,
}

impl FlagKey {
    pub fn new(scope: Scope, flag: impl Into<String>) -> Self {
        Self {
            scope,
            flag: flag.into(),
        }
    }

    pub fn global(flag: impl Into<String>) -> Self {
        Self::new(Scope::Global, flag)
    }

    pub fn verb(verb: impl Into<String>, flag: impl Into<String>) -> Self {
        Self::new(Scope::Verb(verb.into()), flag)
    }
}

impl fmt::Display for FlagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.scope, self.flag)
    }
}

/// A typed flag value, after coercion against its [`FlagSpec`](crate::registry::FlagSpec).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Integer(i64),
    String(String),
}

impl FlagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FlagValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value the way it would be passed on a command line.
    pub fn to_arg(&self) -> String {
        match self {
            FlagValue::Bool(b) => b.to_string(),
            FlagValue::Integer(i) => i.to_string(),
            FlagValue::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_arg())
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Integer(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<FlagValue> for serde_json::Value {
    fn from(value: FlagValue) -> Self {
        match value {
            FlagValue::Bool(b) => serde_json::Value::Bool(b),
            FlagValue::Integer(i) => serde_json::Value::from(i),
            FlagValue::String(s) => serde_json::Value::String(s),
        }
    }
}

/// Which source layer produced a setting (lowest to highest precedence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerSource {
    /// Registry defaults (lowest priority)
    Defaults = 0,
    /// Override file named by `DBT_CONFIG_FILE`
    File = 1,
    /// Process environment (highest priority)
    Environment = 2,
}

impl fmt::Display for LayerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerSource::Defaults => write!(f, "defaults"),
            LayerSource::File => write!(f, "file"),
            LayerSource::Environment => write!(f, "environment"),
        }
    }
}

/// A setting together with the layer it was taken from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub origin: LayerSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, origin: LayerSource) -> Self {
        Self { value, origin }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        Resolved {
            value: f(self.value),
            origin: self.origin,
        }
    }
}
