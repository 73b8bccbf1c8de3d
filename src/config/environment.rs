//! Environment reader: decomposes `DBT_*` variable names into an override layer.
//!
//! | Variable                          | Effect                                   |
//! |-----------------------------------|------------------------------------------|
//! | `DBT_ALLOWED_VERBS`               | allowed verb list (comma separated)      |
//! | `DBT_ENABLE_FLAGS`                | global flags to enable                   |
//! | `DBT_DISABLE_FLAGS`               | global flags to disable                  |
//! | `DBT_FLAG_<FLAG>`                 | global flag value                        |
//! | `DBT_<VERB>_ENABLE_FLAGS`         | verb flags to enable                     |
//! | `DBT_<VERB>_DISABLE_FLAGS`        | verb flags to disable                    |
//! | `DBT_<VERB>_FLAG_<FLAG>`          | verb flag value                          |
//! | `DBT_ENV_<KEY>`                   | runtime environment entry `<KEY>`        |
//! | `DBT_VAR_<NAME>`                  | global dbt variable                      |
//! | `DBT_PROJECT_ROOT`                | projects root (`DBT_PROJECTS_ROOT` alias)|
//!
//! `<VERB>` is matched against the known verbs, longest first, so a verb whose
//! name contains `-` (written `_` here) is never split at the wrong place.
//! Disable lists are applied after enable lists: a flag in both ends disabled.
//! `DBT_ENV_` is stripped once, so dbt's own `DBT_ENV_SECRET_*` names are
//! passed through as `DBT_ENV_DBT_ENV_SECRET_*`.
//! Values are never type-checked here.

use super::layer::{OverrideLayer, normalize_flag_name, split_list};
use crate::registry::{Registry, is_valid_verb_name};
use crate::types::{FlagKey, LayerSource, Scope};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::debug;

pub const ENV_PREFIX: &str = "DBT_";
pub const CONFIG_FILE_VAR: &str = "DBT_CONFIG_FILE";
pub const SCHEMA_DIR_VAR: &str = "DBT_SCHEMA_DIR";
pub const PROJECT_ROOT_VAR: &str = "DBT_PROJECT_ROOT";
pub const PROJECTS_ROOT_ALIAS_VAR: &str = "DBT_PROJECTS_ROOT";
pub const ALLOWED_VERBS_VAR: &str = "DBT_ALLOWED_VERBS";

const ENABLE_FLAGS: &str = "ENABLE_FLAGS";
const DISABLE_FLAGS: &str = "DISABLE_FLAGS";
const FLAG_PREFIX: &str = "FLAG_";
const RUNTIME_ENV_PREFIX: &str = "ENV_";
const VAR_PREFIX: &str = "VAR_";

/// Snapshot of environment variables for one resolution pass.
pub trait EnvironmentSource: Send + Sync {
    fn vars(&self) -> Vec<(String, String)>;
}

impl<T: EnvironmentSource + ?Sized> EnvironmentSource for std::sync::Arc<T> {
    fn vars(&self) -> Vec<(String, String)> {
        (**self).vars()
    }
}

/// The real process environment. Names or values that are not UTF-8 are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl EnvironmentSource for ProcessEnvironment {
    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars_os()
            .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
            .collect()
    }
}

/// A fixed set of variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticEnvironment(BTreeMap<String, String>);

impl StaticEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticEnvironment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl EnvironmentSource for StaticEnvironment {
    fn vars(&self) -> Vec<(String, String)> {
        self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Non-blank value of `name` in a snapshot.
pub fn lookup<'a>(vars: &'a [(String, String)], name: &str) -> Option<&'a str> {
    vars.iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// What a scoped variable name asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ScopedSetting {
    Enable(Scope),
    Disable(Scope),
    Value(FlagKey),
}

/// Interpret `rest` (the part after `DBT_` or `DBT_<VERB>_`) for `scope`.
fn scoped_setting(scope: Scope, rest: &str) -> Option<ScopedSetting> {
    let upper = rest.to_ascii_uppercase();
    if upper == ENABLE_FLAGS {
        return Some(ScopedSetting::Enable(scope));
    }
    if upper == DISABLE_FLAGS {
        return Some(ScopedSetting::Disable(scope));
    }
    if upper.starts_with(FLAG_PREFIX) {
        let flag = normalize_flag_name(&rest[FLAG_PREFIX.len()..]);
        if !flag.is_empty() {
            return Some(ScopedSetting::Value(FlagKey::new(scope, flag)));
        }
    }
    None
}

/// How a verb name is spelled inside a variable name.
fn verb_token(verb: &str) -> String {
    verb.to_ascii_uppercase().replace('-', "_")
}

/// Verb tokens to try, longest first.
struct VerbTokens(Vec<(String, String)>);

impl VerbTokens {
    fn new<'a>(verbs: impl IntoIterator<Item = &'a String>) -> Self {
        let mut tokens: Vec<(String, String)> = verbs
            .into_iter()
            .map(|verb| (verb_token(verb), verb.clone()))
            .collect();
        tokens.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        let mut seen = BTreeSet::new();
        tokens.retain(|(token, _)| seen.insert(token.clone()));
        Self(tokens)
    }

    /// Match `body` (name without `DBT_`) against a known verb.
    fn match_known(&self, body: &str) -> Option<ScopedSetting> {
        for (token, verb) in &self.0 {
            let Some(head) = body.get(..token.len()) else {
                continue;
            };
            if !head.eq_ignore_ascii_case(token) {
                continue;
            }
            let Some(rest) = body[token.len()..].strip_prefix('_') else {
                continue;
            };
            if let Some(setting) = scoped_setting(Scope::verb(verb.clone()), rest) {
                return Some(setting);
            }
        }
        None
    }
}

/// Decompose a name shaped like a verb setting whose verb is not known, so the
/// validator can report it.
fn match_unknown_verb(body: &str) -> Option<ScopedSetting> {
    let upper = body.to_ascii_uppercase();
    let split = [ENABLE_FLAGS, DISABLE_FLAGS]
        .iter()
        .filter_map(|suffix| {
            upper
                .strip_suffix(suffix)
                .and_then(|head| head.strip_suffix('_'))
                .map(str::len)
        })
        .next()
        .or_else(|| upper.find(&format!("_{FLAG_PREFIX}")));

    let verb_len = split.filter(|len| *len > 0)?;
    let verb = body[..verb_len].to_ascii_lowercase().replace('_', "-");
    scoped_setting(Scope::verb(verb), &body[verb_len + 1..])
}

/// Build the environment layer from a snapshot of variables.
pub fn read_environment(registry: &Registry, vars: &[(String, String)]) -> OverrideLayer {
    let mut layer = OverrideLayer::empty(LayerSource::Environment);

    let mut sorted: Vec<&(String, String)> = vars
        .iter()
        .filter(|(name, _)| name.starts_with(ENV_PREFIX))
        .collect();
    sorted.sort();

    let listed_verbs = lookup(vars, ALLOWED_VERBS_VAR).map(split_list).unwrap_or_default();

    // Registry verbs first so they win a token collision with a listed verb.
    let registry_verbs = registry.known_verbs();
    let tokens = VerbTokens::new(
        registry_verbs.iter().chain(
            listed_verbs
                .iter()
                .filter(|verb| is_valid_verb_name(verb) && !registry_verbs.contains(*verb)),
        ),
    );
    layer.set_allowed_verbs(listed_verbs);

    layer.projects_root_dir = lookup(vars, PROJECT_ROOT_VAR)
        .or_else(|| lookup(vars, PROJECTS_ROOT_ALIAS_VAR))
        .map(PathBuf::from);

    let mut enable: BTreeMap<Scope, Vec<String>> = BTreeMap::new();
    let mut disable: BTreeMap<Scope, Vec<String>> = BTreeMap::new();

    for (name, value) in sorted {
        if matches!(
            name.as_str(),
            CONFIG_FILE_VAR | SCHEMA_DIR_VAR | PROJECT_ROOT_VAR | PROJECTS_ROOT_ALIAS_VAR | ALLOWED_VERBS_VAR
        ) {
            continue;
        }
        let body = &name[ENV_PREFIX.len()..];

        if let Some(key) = body.strip_prefix(RUNTIME_ENV_PREFIX) {
            if !key.is_empty() {
                layer.runtime_environment.insert(key.to_string(), value.clone());
            }
            continue;
        }
        if let Some(var) = body.strip_prefix(VAR_PREFIX) {
            if !var.is_empty() {
                layer
                    .variables
                    .entry(Scope::Global)
                    .or_default()
                    .insert(var.to_lowercase(), Value::String(value.clone()));
            }
            continue;
        }

        let setting = scoped_setting(Scope::Global, body)
            .or_else(|| tokens.match_known(body))
            .or_else(|| match_unknown_verb(body));

        match setting {
            Some(ScopedSetting::Enable(scope)) => {
                enable.entry(scope).or_default().extend(split_list(value));
            }
            Some(ScopedSetting::Disable(scope)) => {
                disable.entry(scope).or_default().extend(split_list(value));
            }
            Some(ScopedSetting::Value(key)) => {
                layer.flag_values.insert(key, Value::String(value.clone()));
            }
            None => debug!(variable = %name, "Ignoring unrecognized DBT_ variable"),
        }
    }

    for (scope, flags) in enable {
        for flag in flags {
            layer
                .flag_allowlist
                .insert(FlagKey::new(scope.clone(), normalize_flag_name(&flag)), true);
        }
    }
    for (scope, flags) in disable {
        for flag in flags {
            layer
                .flag_allowlist
                .insert(FlagKey::new(scope.clone(), normalize_flag_name(&flag)), false);
        }
    }

    debug!(
        allowlist = layer.flag_allowlist.len(),
        values = layer.flag_values.len(),
        runtime_env = layer.runtime_environment.len(),
        "Read environment overrides"
    );
    layer
}
