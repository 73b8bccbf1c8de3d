//! Layer merging.
//!
//! Layers are folded lowest to highest precedence (defaults, file, environment).
//! Each setting is merged per `(scope, key)`: the highest layer that sets it wins
//! and its [`LayerSource`] is kept as provenance. Nothing is checked here; the
//! result is a structurally complete [`Candidate`] for the validator.

use super::layer::{ALL_VERBS, OverrideLayer};
use crate::registry::Registry;
use crate::types::{FlagKey, LayerSource, Resolved, Scope};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Merged but unvalidated settings of one resolution pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub allowed_verbs: Resolved<BTreeSet<String>>,
    pub flag_allowlist: BTreeMap<FlagKey, Resolved<bool>>,
    pub flag_values: BTreeMap<FlagKey, Resolved<Value>>,
    pub variables: BTreeMap<Scope, BTreeMap<String, Resolved<Value>>>,
    pub runtime_environment: BTreeMap<String, String>,
    pub projects_root_dir: Resolved<PathBuf>,
    pub config_file: Option<PathBuf>,
}

/// Deep merge two JSON values, with `overlay` taking precedence over `base`.
///
/// - Objects are merged recursively: keys in overlay override keys in base
/// - Arrays, strings, numbers, booleans, nulls are replaced entirely
/// - If overlay is null, the base value is preserved (null means "not specified")
///
/// # Example
/// ```
/// use serde_json::json;
/// use dbt_flags_config::config::deep_merge;
///
/// let file = json!({"dates": {"start": "2024-01-01", "end": "2024-12-31"}});
/// let env = json!({"dates": {"end": "2024-06-30"}});
/// let merged = deep_merge(file, env);
/// assert_eq!(merged, json!({"dates": {"start": "2024-01-01", "end": "2024-06-30"}}));
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged_value = if let Some(base_value) = base_map.remove(&key) {
                    deep_merge(base_value, overlay_value)
                } else {
                    overlay_value
                };
                base_map.insert(key, merged_value);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Overlay `entries` from a layer onto `base`, recording `origin` for each
/// entry it sets. `combine` folds an old value with the new one.
fn overlay<K: Ord, V>(
    mut base: BTreeMap<K, Resolved<V>>,
    entries: impl IntoIterator<Item = (K, V)>,
    origin: LayerSource,
    combine: impl Fn(V, V) -> V,
) -> BTreeMap<K, Resolved<V>> {
    for (key, value) in entries {
        let merged = match base.remove(&key) {
            Some(previous) => combine(previous.value, value),
            None => value,
        };
        base.insert(key, Resolved::new(merged, origin));
    }
    base
}

fn replace<V>(_: V, new: V) -> V {
    new
}

/// Expand `*` to every registry verb.
fn expand_verbs(registry: &Registry, verbs: Vec<String>) -> BTreeSet<String> {
    let mut expanded = BTreeSet::new();
    for verb in verbs {
        if verb == ALL_VERBS {
            expanded.extend(registry.known_verbs());
        } else {
            expanded.insert(verb);
        }
    }
    expanded
}

/// Merge the three source layers in precedence order: env > file > defaults.
pub fn resolve(
    registry: &Registry,
    defaults: OverrideLayer,
    file: OverrideLayer,
    environment: OverrideLayer,
) -> Candidate {
    merge_layers(registry, [defaults, file, environment])
}

/// Fold any number of layers, later layers taking precedence.
pub fn merge_layers(registry: &Registry, layers: impl IntoIterator<Item = OverrideLayer>) -> Candidate {
    let initial = Candidate {
        allowed_verbs: Resolved::new(registry.known_verbs(), LayerSource::Defaults),
        flag_allowlist: BTreeMap::new(),
        flag_values: BTreeMap::new(),
        variables: BTreeMap::new(),
        runtime_environment: BTreeMap::new(),
        projects_root_dir: Resolved::new(PathBuf::new(), LayerSource::Defaults),
        config_file: None,
    };

    layers.into_iter().fold(initial, |mut candidate, layer| {
        let origin = layer.source;

        if let Some(verbs) = layer.allowed_verbs.filter(|v| !v.is_empty()) {
            candidate.allowed_verbs = Resolved::new(expand_verbs(registry, verbs), origin);
        }
        if let Some(dir) = layer.projects_root_dir {
            candidate.projects_root_dir = Resolved::new(dir, origin);
        }
        if origin == LayerSource::File && layer.path.is_some() {
            candidate.config_file = layer.path;
        }

        candidate.flag_allowlist = overlay(candidate.flag_allowlist, layer.flag_allowlist, origin, replace);
        candidate.flag_values = overlay(candidate.flag_values, layer.flag_values, origin, replace);

        for (scope, vars) in layer.variables {
            let merged = candidate.variables.remove(&scope).unwrap_or_default();
            candidate
                .variables
                .insert(scope, overlay(merged, vars, origin, deep_merge));
        }

        candidate.runtime_environment.extend(layer.runtime_environment);
        candidate
    })
}
