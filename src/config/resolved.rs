//! The validated, immutable configuration snapshot.

use super::merge::deep_merge;
use crate::types::{FlagValue, LayerSource, Resolved, Scope};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Runtime environment keys containing this marker are masked in views.
pub const SECRET_MARKER: &str = "SECRET";
pub const REDACTED: &str = "[REDACTED]";

/// Resolved state of one flag in one scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagSetting {
    /// Allowlist entry; `None` when no layer lists the flag in this scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Resolved<bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Resolved<FlagValue>>,
}

impl FlagSetting {
    pub fn is_enabled(&self) -> bool {
        self.enabled.as_ref().is_some_and(|e| e.value)
    }

    /// The highest layer that touched this flag.
    pub fn origin(&self) -> LayerSource {
        let enabled = self.enabled.as_ref().map(|e| e.origin);
        let value = self.value.as_ref().map(|v| v.origin);
        enabled.max(value).unwrap_or(LayerSource::Defaults)
    }
}

/// The configuration produced by a successful resolution pass.
///
/// Built only by the validator and never mutated afterwards; share it behind
/// an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub(super) allowed_verbs: Resolved<BTreeSet<String>>,
    pub(super) flags: BTreeMap<Scope, BTreeMap<String, FlagSetting>>,
    pub(super) variables: BTreeMap<Scope, BTreeMap<String, Resolved<Value>>>,
    pub(super) runtime_environment: BTreeMap<String, String>,
    pub(super) projects_root_dir: Resolved<PathBuf>,
    pub(super) config_file: Option<PathBuf>,
    pub(super) resolved_at: DateTime<Utc>,
}

impl ResolvedConfig {
    pub fn allowed_verbs(&self) -> &BTreeSet<String> {
        &self.allowed_verbs.value
    }

    pub fn allowed_verbs_origin(&self) -> LayerSource {
        self.allowed_verbs.origin
    }

    pub fn is_verb_allowed(&self, verb: &str) -> bool {
        self.allowed_verbs.value.contains(verb)
    }

    /// The resolved state of `flag` in `scope`, if any layer mentions it.
    pub fn flag(&self, scope: impl Into<Scope>, flag: &str) -> Option<&FlagSetting> {
        self.flags.get(&scope.into()).and_then(|flags| flags.get(flag))
    }

    /// Whether `flag` may be supplied for `scope`. Flags nobody lists are disabled.
    pub fn is_flag_enabled(&self, scope: impl Into<Scope>, flag: &str) -> bool {
        self.flag(scope, flag).is_some_and(FlagSetting::is_enabled)
    }

    /// Default value of `flag` in exactly `scope`; global values are not inherited.
    pub fn flag_default_value(&self, scope: impl Into<Scope>, flag: &str) -> Option<&FlagValue> {
        self.flag(scope, flag)
            .and_then(|setting| setting.value.as_ref())
            .map(|v| &v.value)
    }

    /// Value to use for `flag` when running `verb`: the verb's own value, else
    /// the global one.
    pub fn effective_flag_value(&self, verb: &str, flag: &str) -> Option<&FlagValue> {
        self.flag_default_value(Scope::verb(verb), flag)
            .or_else(|| self.flag_default_value(Scope::Global, flag))
    }

    /// Layer that last set anything for `flag` in `scope`.
    pub fn flag_origin(&self, scope: impl Into<Scope>, flag: &str) -> Option<LayerSource> {
        self.flag(scope, flag).map(FlagSetting::origin)
    }

    /// Every flag with a setting in `scope`, by name.
    pub fn flags(&self, scope: impl Into<Scope>) -> impl Iterator<Item = (&str, &FlagSetting)> {
        self.flags
            .get(&scope.into())
            .into_iter()
            .flat_map(|flags| flags.iter().map(|(name, setting)| (name.as_str(), setting)))
    }

    /// Names of the enabled flags in `scope`.
    pub fn enabled_flags(&self, scope: impl Into<Scope>) -> Vec<&str> {
        self.flags(scope)
            .filter(|(_, setting)| setting.is_enabled())
            .map(|(name, _)| name)
            .collect()
    }

    /// Scopes that have any flag setting, global first.
    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        self.flags.keys()
    }

    /// dbt variables set directly in `scope`.
    pub fn variables(&self, scope: impl Into<Scope>) -> impl Iterator<Item = (&str, &Value)> {
        self.variables
            .get(&scope.into())
            .into_iter()
            .flat_map(|vars| vars.iter().map(|(name, v)| (name.as_str(), &v.value)))
    }

    /// Variables for a `verb` invocation: global ones with the verb's merged on top.
    pub fn effective_variables(&self, verb: &str) -> Map<String, Value> {
        let collect = |scope: Scope| -> Value {
            Value::Object(
                self.variables(scope)
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect(),
            )
        };
        match deep_merge(collect(Scope::Global), collect(Scope::verb(verb))) {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    pub fn runtime_environment(&self) -> &BTreeMap<String, String> {
        &self.runtime_environment
    }

    pub fn projects_root_dir(&self) -> &Path {
        &self.projects_root_dir.value
    }

    pub fn projects_root_origin(&self) -> LayerSource {
        self.projects_root_dir.origin
    }

    /// Override file this snapshot was read from, if one was declared.
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    /// Serializable rendering with secret runtime values masked.
    pub fn view(&self) -> ConfigView {
        let mut scopes: BTreeMap<String, ScopeView> = BTreeMap::new();
        for (scope, flags) in &self.flags {
            scopes.entry(scope.to_string()).or_default().flags = flags.clone();
        }
        for (scope, vars) in &self.variables {
            if !vars.is_empty() {
                scopes.entry(scope.to_string()).or_default().vars = vars.clone();
            }
        }

        ConfigView {
            resolved_at: self.resolved_at,
            config_file: self.config_file.as_ref().map(|p| p.display().to_string()),
            allowed_verbs: self.allowed_verbs.clone().map(|verbs| verbs.into_iter().collect()),
            projects_root_dir: self
                .projects_root_dir
                .clone()
                .map(|p| p.display().to_string()),
            scopes,
            runtime_environment: self
                .runtime_environment
                .iter()
                .map(|(key, value)| {
                    let shown = if key.to_ascii_uppercase().contains(SECRET_MARKER) {
                        REDACTED.to_string()
                    } else {
                        value.clone()
                    };
                    (key.clone(), shown)
                })
                .collect(),
        }
    }
}

/// Flags and variables of one scope in a [`ConfigView`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScopeView {
    pub flags: BTreeMap<String, FlagSetting>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, Resolved<Value>>,
}

/// Serializable snapshot of a [`ResolvedConfig`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigView {
    pub resolved_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    pub allowed_verbs: Resolved<Vec<String>>,
    pub projects_root_dir: Resolved<String>,
    pub scopes: BTreeMap<String, ScopeView>,
    pub runtime_environment: BTreeMap<String, String>,
}
