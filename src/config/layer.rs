//! Raw, unvalidated override data produced by one source reader.

use crate::types::{FlagKey, LayerSource, Scope};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Allowed-verbs entry meaning "every verb the registry knows".
pub const ALL_VERBS: &str = "*";

/// One source's contribution to a resolution pass.
///
/// Values are kept raw (`serde_json::Value`) until the validator coerces them
/// against their flag spec. Layers are built fresh on every pass and dropped
/// once merged.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideLayer {
    pub source: LayerSource,
    /// Where the layer was read from, when it came from a file.
    pub path: Option<PathBuf>,
    /// Explicit allowed-verb list; `None` leaves the lower layer's list in place.
    pub allowed_verbs: Option<Vec<String>>,
    pub flag_allowlist: BTreeMap<FlagKey, bool>,
    pub flag_values: BTreeMap<FlagKey, Value>,
    /// dbt `--vars` entries per scope.
    pub variables: BTreeMap<Scope, BTreeMap<String, Value>>,
    pub runtime_environment: BTreeMap<String, String>,
    pub projects_root_dir: Option<PathBuf>,
}

impl OverrideLayer {
    pub fn empty(source: LayerSource) -> Self {
        Self {
            source,
            path: None,
            allowed_verbs: None,
            flag_allowlist: BTreeMap::new(),
            flag_values: BTreeMap::new(),
            variables: BTreeMap::new(),
            runtime_environment: BTreeMap::new(),
            projects_root_dir: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allowed_verbs.is_none()
            && self.flag_allowlist.is_empty()
            && self.flag_values.is_empty()
            && self.variables.values().all(BTreeMap::is_empty)
            && self.runtime_environment.is_empty()
            && self.projects_root_dir.is_none()
    }

    /// Set the allowed-verb list; an empty list leaves it unset.
    pub fn set_allowed_verbs(&mut self, verbs: Vec<String>) {
        self.allowed_verbs = if verbs.is_empty() { None } else { Some(verbs) };
    }
}

/// Split a comma separated list, trimming entries and dropping empty ones.
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Canonical form of a flag name written in a file section or variable name.
pub fn normalize_flag_name(name: &str) -> String {
    heck::AsSnakeCase(name.trim()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" run, test ,,build "), vec!["run", "test", "build"]);
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_normalize_flag_name() {
        assert_eq!(normalize_flag_name("threads"), "threads");
        assert_eq!(normalize_flag_name("FULL_REFRESH"), "full_refresh");
        assert_eq!(normalize_flag_name("full-refresh"), "full_refresh");
        assert_eq!(normalize_flag_name("failFast"), "fail_fast");
    }

    #[test]
    fn test_empty_allowed_verbs_is_unset() {
        let mut layer = OverrideLayer::empty(LayerSource::Environment);
        layer.set_allowed_verbs(Vec::new());
        assert!(layer.allowed_verbs.is_none());
        assert!(layer.is_empty());
    }
}
