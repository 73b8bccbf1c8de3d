//! Validator: checks a merged [`Candidate`] against the registry.
//!
//! Every check runs before anything is reported, so one pass surfaces all
//! violations across all layers. A flag whose allowlist entry is `false` may
//! still carry a value; rejecting it at request time is the caller's job.

use super::merge::Candidate;
use super::resolved::{FlagSetting, ResolvedConfig};
use crate::error::{ValidationError, Violation};
use crate::registry::{CoercionFailure, FlagKind, Registry, is_valid_verb_name, scalar_text};
use crate::types::{FlagKey, LayerSource, Resolved, Scope};
use chrono::Utc;
use regex_lite::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tracing::{debug, warn};

static ENV_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env key pattern is valid"));

/// Validate `candidate`, producing the immutable configuration or every violation found.
pub fn validate(registry: &Registry, candidate: Candidate) -> Result<ResolvedConfig, ValidationError> {
    let mut violations = Vec::new();

    check_allowed_verbs(registry, &candidate.allowed_verbs, &mut violations);
    let rejected = check_verb_scopes(registry, &candidate, &mut violations);

    let mut flags: BTreeMap<Scope, BTreeMap<String, FlagSetting>> = BTreeMap::new();

    for (key, enabled) in candidate.flag_allowlist {
        if rejected.contains(&key.scope) {
            continue;
        }
        if registry.flag_spec(&key.scope, &key.flag).is_none() {
            violations.push(Violation::UnknownFlag {
                key,
                origin: enabled.origin,
            });
            continue;
        }
        setting(&mut flags, key).enabled = Some(enabled);
    }

    for (key, raw) in candidate.flag_values {
        if rejected.contains(&key.scope) {
            continue;
        }
        let Some(spec) = registry.flag_spec(&key.scope, &key.flag) else {
            violations.push(Violation::UnknownFlag {
                key,
                origin: raw.origin,
            });
            continue;
        };
        match spec.coerce(&raw.value) {
            Ok(value) => setting(&mut flags, key).value = Some(Resolved::new(value, raw.origin)),
            Err(failure) => violations.push(coercion_violation(key, &raw, spec.kind, failure)),
        }
    }

    if candidate.projects_root_dir.origin != LayerSource::Defaults
        && !candidate.projects_root_dir.value.is_dir()
    {
        violations.push(Violation::ProjectsRootNotDirectory {
            path: candidate.projects_root_dir.value.clone(),
            origin: candidate.projects_root_dir.origin,
        });
    }

    for key in candidate.runtime_environment.keys() {
        if !ENV_KEY.is_match(key) {
            violations.push(Violation::InvalidEnvKey {
                key: key.clone(),
                origin: LayerSource::Environment,
            });
        }
    }

    if !violations.is_empty() {
        sort_violations(&mut violations);
        debug!(count = violations.len(), "Configuration failed validation");
        return Err(ValidationError::new(violations));
    }

    let mut variables = candidate.variables;
    variables.retain(|scope, vars| !rejected.contains(scope) && !vars.is_empty());

    Ok(ResolvedConfig {
        allowed_verbs: candidate.allowed_verbs,
        flags,
        variables,
        runtime_environment: candidate.runtime_environment,
        projects_root_dir: candidate.projects_root_dir,
        config_file: candidate.config_file,
        resolved_at: Utc::now(),
    })
}

fn setting(flags: &mut BTreeMap<Scope, BTreeMap<String, FlagSetting>>, key: FlagKey) -> &mut FlagSetting {
    flags
        .entry(key.scope)
        .or_default()
        .entry(key.flag)
        .or_insert(FlagSetting {
            enabled: None,
            value: None,
        })
}

fn check_allowed_verbs(
    registry: &Registry,
    allowed: &Resolved<BTreeSet<String>>,
    violations: &mut Vec<Violation>,
) {
    for verb in &allowed.value {
        if !is_valid_verb_name(verb) {
            violations.push(Violation::InvalidVerbName {
                verb: verb.clone(),
                origin: allowed.origin,
            });
        } else if !registry.is_known_verb(verb) {
            warn!(verb = %verb, origin = %allowed.origin, "Allowed verbs extend beyond the registry");
        }
    }
}

/// Report verb scopes that are neither registry verbs nor allowed, returning them.
fn check_verb_scopes(
    registry: &Registry,
    candidate: &Candidate,
    violations: &mut Vec<Violation>,
) -> BTreeSet<Scope> {
    let mentions = candidate
        .flag_allowlist
        .iter()
        .map(|(key, entry)| (&key.scope, entry.origin))
        .chain(
            candidate
                .flag_values
                .iter()
                .map(|(key, entry)| (&key.scope, entry.origin)),
        )
        .chain(candidate.variables.iter().filter_map(|(scope, vars)| {
            vars.values().map(|v| v.origin).max().map(|origin| (scope, origin))
        }));

    let mut referenced: BTreeMap<&str, LayerSource> = BTreeMap::new();
    for (scope, origin) in mentions {
        if let Some(verb) = scope.verb_name() {
            let entry = referenced.entry(verb).or_insert(origin);
            *entry = (*entry).max(origin);
        }
    }

    let mut rejected = BTreeSet::new();
    for (verb, origin) in referenced {
        if registry.is_known_verb(verb)
            || (is_valid_verb_name(verb) && candidate.allowed_verbs.value.contains(verb))
        {
            continue;
        }
        violations.push(Violation::UnknownVerb {
            verb: verb.to_string(),
            origin,
        });
        rejected.insert(Scope::verb(verb));
    }
    rejected
}

fn coercion_violation(
    key: FlagKey,
    raw: &Resolved<Value>,
    expected: FlagKind,
    failure: CoercionFailure,
) -> Violation {
    let text = scalar_text(&raw.value).unwrap_or_else(|| raw.value.to_string());
    match failure {
        CoercionFailure::Type => Violation::InvalidValue {
            key,
            value: text,
            expected,
            origin: raw.origin,
        },
        CoercionFailure::NotAllowed(allowed) => Violation::DisallowedValue {
            key,
            value: text,
            allowed,
            origin: raw.origin,
        },
        CoercionFailure::OutOfRange { value, min, max } => Violation::OutOfRange {
            key,
            value,
            min,
            max,
            origin: raw.origin,
        },
    }
}

/// Highest layer first, then by rendered message; exact duplicates removed.
fn sort_violations(violations: &mut Vec<Violation>) {
    violations.sort_by_cached_key(|v| (std::cmp::Reverse(v.origin()), v.to_string()));
    violations.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InlineDefinitions;
    use crate::types::FlagValue;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn registry() -> Registry {
        Registry::load(
            &InlineDefinitions::new(
                r#"
flags:
  threads:
    type: integer
    enabled: true
    default: 4
    min: 1
  log_format:
    type: enum
    values: [text, json]
"#,
            )
            .with_verb("run", "flags:\n  full_refresh:\n    type: boolean\n")
            .with_verb("test", ""),
        )
        .unwrap()
    }

    fn candidate(registry: &Registry) -> Candidate {
        Candidate {
            allowed_verbs: Resolved::new(registry.known_verbs(), LayerSource::Defaults),
            flag_allowlist: BTreeMap::new(),
            flag_values: BTreeMap::new(),
            variables: BTreeMap::new(),
            runtime_environment: BTreeMap::new(),
            projects_root_dir: Resolved::new(PathBuf::from("./dbt_projects"), LayerSource::Defaults),
            config_file: None,
        }
    }

    fn env<T>(value: T) -> Resolved<T> {
        Resolved::new(value, LayerSource::Environment)
    }

    #[test]
    fn test_coerces_text_values() {
        let registry = registry();
        let mut c = candidate(&registry);
        c.flag_values.insert(FlagKey::verb("run", "threads"), env(json!("8")));

        let config = validate(&registry, c).unwrap();
        assert_eq!(config.flag_default_value("run", "threads"), Some(&FlagValue::Integer(8)));
    }

    #[test]
    fn test_collects_all_violations() {
        let registry = registry();
        let mut c = candidate(&registry);
        c.flag_values.insert(FlagKey::global("threads"), env(json!("abc")));
        c.flag_values.insert(FlagKey::global("log_format"), env(json!("xml")));
        c.flag_allowlist.insert(FlagKey::global("thread"), env(true));
        c.flag_allowlist.insert(FlagKey::verb("run", "fullrefresh"), env(true));

        let err = validate(&registry, c).unwrap_err();
        assert_eq!(err.len(), 4);
        assert!(err.violations.iter().any(|v| matches!(
            v,
            Violation::InvalidValue { key, value, .. } if key == &FlagKey::global("threads") && value == "abc"
        )));
        assert!(err
            .violations
            .iter()
            .any(|v| matches!(v, Violation::DisallowedValue { .. })));
    }

    #[test]
    fn test_out_of_range() {
        let registry = registry();
        let mut c = candidate(&registry);
        c.flag_values.insert(FlagKey::global("threads"), env(json!(0)));
        let err = validate(&registry, c).unwrap_err();
        assert!(matches!(
            err.violations[0],
            Violation::OutOfRange { value: 0, min: Some(1), .. }
        ));
    }

    #[test]
    fn test_unknown_verb_scope() {
        let registry = registry();
        let mut c = candidate(&registry);
        c.flag_values.insert(FlagKey::verb("deploy", "threads"), env(json!("2")));
        c.flag_allowlist.insert(FlagKey::verb("deploy", "nonsense"), env(true));

        let err = validate(&registry, c).unwrap_err();
        assert_eq!(
            err.violations,
            vec![Violation::UnknownVerb {
                verb: "deploy".to_string(),
                origin: LayerSource::Environment
            }]
        );
    }

    #[test]
    fn test_widened_verb_scope_uses_global_schema() {
        let registry = registry();
        let mut c = candidate(&registry);
        c.allowed_verbs = env(BTreeSet::from(["run".to_string(), "deploy".to_string()]));
        c.flag_values.insert(FlagKey::verb("deploy", "threads"), env(json!("2")));

        let config = validate(&registry, c).unwrap();
        assert!(config.is_verb_allowed("deploy"));
        assert_eq!(config.flag_default_value("deploy", "threads"), Some(&FlagValue::Integer(2)));
    }

    #[test]
    fn test_invalid_verb_name() {
        let registry = registry();
        let mut c = candidate(&registry);
        c.allowed_verbs = env(BTreeSet::from(["run;rm".to_string()]));
        let err = validate(&registry, c).unwrap_err();
        assert!(matches!(err.violations[0], Violation::InvalidVerbName { .. }));
    }

    #[test]
    fn test_global_is_not_a_verb() {
        let registry = registry();
        let mut c = candidate(&registry);
        c.allowed_verbs = env(BTreeSet::from(["run".to_string(), "global".to_string()]));
        c.flag_allowlist.insert(FlagKey::verb("global", "threads"), env(false));

        let err = validate(&registry, c).unwrap_err();
        assert_eq!(
            err.violations,
            vec![
                Violation::UnknownVerb {
                    verb: "global".to_string(),
                    origin: LayerSource::Environment,
                },
                Violation::InvalidVerbName {
                    verb: "global".to_string(),
                    origin: LayerSource::Environment,
                },
            ]
        );
    }

    #[test]
    fn test_disabled_flag_keeps_value() {
        let registry = registry();
        let mut c = candidate(&registry);
        c.flag_allowlist.insert(FlagKey::global("threads"), env(false));
        c.flag_values.insert(FlagKey::global("threads"), env(json!(6)));

        let config = validate(&registry, c).unwrap();
        assert!(!config.is_flag_enabled("global", "threads"));
        assert_eq!(config.flag_default_value("global", "threads"), Some(&FlagValue::Integer(6)));
    }

    #[test]
    fn test_projects_root_must_exist_when_overridden() {
        let registry = registry();
        let temp = TempDir::new().unwrap();

        let mut c = candidate(&registry);
        c.projects_root_dir = env(temp.path().to_path_buf());
        assert!(validate(&registry, c).is_ok());

        let mut c = candidate(&registry);
        c.projects_root_dir = env(temp.path().join("missing"));
        let err = validate(&registry, c).unwrap_err();
        assert!(matches!(err.violations[0], Violation::ProjectsRootNotDirectory { .. }));
    }

    #[test]
    fn test_default_projects_root_is_not_checked() {
        let registry = registry();
        assert!(validate(&registry, candidate(&registry)).is_ok());
    }

    #[test]
    fn test_invalid_runtime_env_key() {
        let registry = registry();
        let mut c = candidate(&registry);
        c.runtime_environment.insert("GOOD_KEY".into(), "1".into());
        c.runtime_environment.insert("BAD-KEY".into(), "1".into());
        let err = validate(&registry, c).unwrap_err();
        assert_eq!(
            err.violations,
            vec![Violation::InvalidEnvKey {
                key: "BAD-KEY".to_string(),
                origin: LayerSource::Environment
            }]
        );
    }

    #[test]
    fn test_duplicate_unknown_flag_reported_once() {
        let registry = registry();
        let mut c = candidate(&registry);
        c.flag_allowlist.insert(FlagKey::global("thread"), env(true));
        c.flag_values.insert(FlagKey::global("thread"), env(json!("2")));
        let err = validate(&registry, c).unwrap_err();
        assert_eq!(err.len(), 1);
    }
}
