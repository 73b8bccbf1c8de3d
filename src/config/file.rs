//! File reader: the optional TOML override file.
//!
//! Everything lives under a top-level `dbt` table:
//!
//! ```toml
//! [dbt]
//! allowed_verbs = "run,test"
//! projects_root_dir = "/srv/dbt"
//!
//! [dbt.flags.allowlist]
//! threads = true
//! [dbt.flags.values]
//! threads = 8
//! [dbt.vars]
//! target_schema = "analytics"
//!
//! [dbt.run.flags.allowlist]
//! full_refresh = "no"
//! [dbt.run.flags.values]
//! threads = "2"
//! ```
//!
//! The reader only checks structure. Whether a verb or flag exists, and whether
//! a value fits its type, is left to the validator.

use super::layer::{OverrideLayer, normalize_flag_name, split_list};
use crate::error::ConfigFileError;
use crate::registry::parse_bool;
use crate::types::{FlagKey, LayerSource, Scope};
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::{debug, info};

/// Name of the table holding all overrides.
pub const ROOT_SECTION: &str = "dbt";

/// Read the override file at `path`; no path (or a blank one) is an empty layer.
pub fn read_file(path: Option<&Path>) -> Result<OverrideLayer, ConfigFileError> {
    let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
        debug!("No config override file declared");
        return Ok(OverrideLayer::empty(LayerSource::File));
    };

    if !path.exists() {
        return Err(ConfigFileError::NotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        return Err(ConfigFileError::IsDirectory(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let layer = parse_file(path, &content)?;
    info!(
        path = %path.display(),
        allowlist = layer.flag_allowlist.len(),
        values = layer.flag_values.len(),
        "Loaded config override file"
    );
    Ok(layer)
}

/// Parse override file content. `path` is only used in the layer and in errors.
///
/// A file that sets nothing under `[dbt]` is a valid empty layer.
pub fn parse_file(path: &Path, content: &str) -> Result<OverrideLayer, ConfigFileError> {
    let mut document: Table = toml::from_str(content).map_err(|e| ConfigFileError::Parse {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })?;

    let root = document.remove(ROOT_SECTION);
    if let Some(section) = document.keys().next() {
        return Err(ConfigFileError::UnknownSection {
            path: path.to_path_buf(),
            section: section.clone(),
        });
    }

    let mut reader = SectionReader::new(path);
    match root {
        None => debug!(path = %path.display(), "Config file sets no overrides"),
        Some(Value::Table(root)) => reader.root(root)?,
        Some(_) => {
            return Err(ConfigFileError::Parse {
                path: path.to_path_buf(),
                message: format!("`{ROOT_SECTION}` must be a table"),
            });
        }
    }
    Ok(reader.layer)
}

/// Walks the `dbt` table, filling one layer.
struct SectionReader<'a> {
    path: &'a Path,
    layer: OverrideLayer,
}

impl<'a> SectionReader<'a> {
    fn new(path: &'a Path) -> Self {
        let mut layer = OverrideLayer::empty(LayerSource::File);
        layer.path = Some(path.to_path_buf());
        Self { path, layer }
    }

    fn root(&mut self, table: Table) -> Result<(), ConfigFileError> {
        for (key, value) in table {
            match (key.as_str(), value) {
                ("allowed_verbs", value) => {
                    let verbs = self.verb_list(&value)?;
                    self.layer.set_allowed_verbs(verbs);
                }
                ("projects_root_dir", Value::String(dir)) => {
                    if !dir.trim().is_empty() {
                        self.layer.projects_root_dir = Some(PathBuf::from(dir.trim()));
                    }
                }
                ("projects_root_dir", _) => {
                    return Err(self.invalid(ROOT_SECTION, &key, "expected a path string"));
                }
                ("flags", Value::Table(flags)) => {
                    self.flags(&Scope::Global, &format!("{ROOT_SECTION}.flags"), flags)?;
                }
                ("vars", Value::Table(vars)) => self.vars(Scope::Global, vars)?,
                (verb, Value::Table(section)) => self.verb_section(verb, section)?,
                (option, _) => return Err(self.invalid(ROOT_SECTION, option, "unknown option")),
            }
        }
        Ok(())
    }

    fn verb_section(&mut self, verb: &str, table: Table) -> Result<(), ConfigFileError> {
        let section = format!("{ROOT_SECTION}.{verb}");
        let scope = Scope::verb(verb);
        for (key, value) in table {
            match (key.as_str(), value) {
                ("flags", Value::Table(flags)) => {
                    self.flags(&scope, &format!("{section}.flags"), flags)?;
                }
                ("vars", Value::Table(vars)) => self.vars(scope.clone(), vars)?,
                (other, Value::Table(_)) => {
                    return Err(self.unknown_section(format!("{section}.{other}")));
                }
                (option, _) => return Err(self.invalid(&section, option, "unknown option")),
            }
        }
        Ok(())
    }

    fn flags(&mut self, scope: &Scope, section: &str, table: Table) -> Result<(), ConfigFileError> {
        for (key, value) in table {
            match (key.as_str(), value) {
                ("allowlist", Value::Table(entries)) => {
                    let section = format!("{section}.allowlist");
                    for (flag, value) in entries {
                        let enabled = self.allowlist_entry(&section, &flag, &value)?;
                        self.layer
                            .flag_allowlist
                            .insert(FlagKey::new(scope.clone(), normalize_flag_name(&flag)), enabled);
                    }
                }
                ("values", Value::Table(entries)) => {
                    let section = format!("{section}.values");
                    for (flag, value) in entries {
                        let raw = self.raw(&section, &flag, value)?;
                        self.layer
                            .flag_values
                            .insert(FlagKey::new(scope.clone(), normalize_flag_name(&flag)), raw);
                    }
                }
                (other, Value::Table(_)) => {
                    return Err(self.unknown_section(format!("{section}.{other}")));
                }
                (option, _) => return Err(self.invalid(section, option, "unknown option")),
            }
        }
        Ok(())
    }

    fn vars(&mut self, scope: Scope, table: Table) -> Result<(), ConfigFileError> {
        let section = match scope.verb_name() {
            None => format!("{ROOT_SECTION}.vars"),
            Some(verb) => format!("{ROOT_SECTION}.{verb}.vars"),
        };
        let mut vars = std::collections::BTreeMap::new();
        for (name, value) in table {
            let raw = self.raw(&section, &name, value)?;
            vars.insert(name, raw);
        }
        self.layer.variables.entry(scope).or_default().extend(vars);
        Ok(())
    }

    fn verb_list(&self, value: &Value) -> Result<Vec<String>, ConfigFileError> {
        match value {
            Value::String(list) => Ok(split_list(list)),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(verb) => Ok(verb.trim().to_string()),
                    _ => Err(self.invalid(ROOT_SECTION, "allowed_verbs", "entries must be strings")),
                })
                .filter(|verb| verb.as_ref().map_or(true, |v| !v.is_empty()))
                .collect(),
            _ => Err(self.invalid(
                ROOT_SECTION,
                "allowed_verbs",
                "expected a comma separated string or an array of strings",
            )),
        }
    }

    fn allowlist_entry(&self, section: &str, flag: &str, value: &Value) -> Result<bool, ConfigFileError> {
        let parsed = match value {
            Value::Boolean(enabled) => Some(*enabled),
            Value::String(text) => parse_bool(text),
            Value::Integer(i) => parse_bool(&i.to_string()),
            _ => None,
        };
        parsed.ok_or_else(|| {
            self.invalid(
                section,
                flag,
                &format!("expected a boolean, got {value}"),
            )
        })
    }

    fn raw(&self, section: &str, option: &str, value: Value) -> Result<serde_json::Value, ConfigFileError> {
        serde_json::to_value(value).map_err(|e| self.invalid(section, option, &e.to_string()))
    }

    fn invalid(&self, section: &str, option: &str, reason: &str) -> ConfigFileError {
        ConfigFileError::InvalidOption {
            path: self.path.to_path_buf(),
            section: section.to_string(),
            option: option.to_string(),
            reason: reason.to_string(),
        }
    }

    fn unknown_section(&self, section: String) -> ConfigFileError {
        ConfigFileError::UnknownSection {
            path: self.path.to_path_buf(),
            section,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn parse(content: &str) -> Result<OverrideLayer, ConfigFileError> {
        parse_file(Path::new("overrides.toml"), content)
    }

    #[test]
    fn test_no_path_is_empty_layer() {
        let layer = read_file(None).unwrap();
        assert!(layer.is_empty());
        assert_eq!(layer.source, LayerSource::File);

        let layer = read_file(Some(Path::new(""))).unwrap();
        assert!(layer.is_empty());
    }

    #[test]
    fn test_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let err = read_file(Some(&temp.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, ConfigFileError::NotFound(_)));
    }

    #[test]
    fn test_directory_is_error() {
        let temp = TempDir::new().unwrap();
        let err = read_file(Some(temp.path())).unwrap_err();
        assert!(matches!(err, ConfigFileError::IsDirectory(_)));
    }

    #[test]
    fn test_read_full_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dbt.toml");
        std::fs::write(
            &path,
            r#"
[dbt]
allowed_verbs = "run, test"
projects_root_dir = "/srv/dbt"

[dbt.flags.allowlist]
threads = true
fail_fast = "no"

[dbt.flags.values]
threads = 8

[dbt.vars]
target_schema = "analytics"

[dbt.run.flags.allowlist]
full-refresh = "yes"

[dbt.run.flags.values]
threads = "2"

[dbt.run.vars]
limit = 10
"#,
        )
        .unwrap();

        let layer = read_file(Some(&path)).unwrap();
        assert_eq!(layer.path.as_deref(), Some(path.as_path()));
        assert_eq!(
            layer.allowed_verbs,
            Some(vec!["run".to_string(), "test".to_string()])
        );
        assert_eq!(layer.projects_root_dir, Some(PathBuf::from("/srv/dbt")));
        assert_eq!(layer.flag_allowlist.get(&FlagKey::global("threads")), Some(&true));
        assert_eq!(layer.flag_allowlist.get(&FlagKey::global("fail_fast")), Some(&false));
        assert_eq!(
            layer.flag_allowlist.get(&FlagKey::verb("run", "full_refresh")),
            Some(&true)
        );
        assert_eq!(layer.flag_values.get(&FlagKey::global("threads")), Some(&json!(8)));
        assert_eq!(
            layer.flag_values.get(&FlagKey::verb("run", "threads")),
            Some(&json!("2"))
        );
        assert_eq!(
            layer.variables[&Scope::Global].get("target_schema"),
            Some(&json!("analytics"))
        );
        assert_eq!(layer.variables[&Scope::verb("run")].get("limit"), Some(&json!(10)));
        assert!(layer.runtime_environment.is_empty());
    }

    #[test]
    fn test_allowed_verbs_array() {
        let layer = parse("[dbt]\nallowed_verbs = [\"run\", \" \", \"seed\"]\n").unwrap();
        assert_eq!(
            layer.allowed_verbs,
            Some(vec!["run".to_string(), "seed".to_string()])
        );
    }

    #[test]
    fn test_empty_allowed_verbs_is_unset() {
        let layer = parse("[dbt]\nallowed_verbs = \"\"\n").unwrap();
        assert!(layer.allowed_verbs.is_none());
    }

    #[test]
    fn test_syntax_error() {
        let err = parse("[dbt\nallowed_verbs = 1").unwrap_err();
        assert!(matches!(err, ConfigFileError::Parse { .. }));
    }

    #[test]
    fn test_file_without_overrides_is_empty_layer() {
        for content in [
            "",
            "  \n",
            "# overrides disabled\n# [dbt.flags.values]\n# threads = 8\n",
            "[dbt]\n",
        ] {
            let layer = parse(content).unwrap();
            assert!(layer.is_empty(), "{content:?}");
            assert_eq!(layer.path, Some(PathBuf::from("overrides.toml")));
        }
    }

    #[test]
    fn test_unknown_top_level_section() {
        let err = parse("[dbt]\nallowed_verbs = \"run\"\n[server]\nport = 1\n").unwrap_err();
        assert!(matches!(err, ConfigFileError::UnknownSection { ref section, .. } if section == "server"));

        let err = parse("[server]\nport = 1\n").unwrap_err();
        assert!(matches!(err, ConfigFileError::UnknownSection { ref section, .. } if section == "server"));
    }

    #[test]
    fn test_unknown_nested_section() {
        let err = parse("[dbt.run.flags.defaults]\nthreads = 1\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::UnknownSection { ref section, .. } if section == "dbt.run.flags.defaults"
        ));
    }

    #[test]
    fn test_invalid_allowlist_value() {
        let err = parse("[dbt.flags.allowlist]\nthreads = \"sometimes\"\n").unwrap_err();
        match err {
            ConfigFileError::InvalidOption { section, option, .. } => {
                assert_eq!(section, "dbt.flags.allowlist");
                assert_eq!(option, "threads");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_root_option() {
        let err = parse("[dbt]\nthreads = 4\n").unwrap_err();
        assert!(matches!(err, ConfigFileError::InvalidOption { ref option, .. } if option == "threads"));
    }

    #[test]
    fn test_values_are_kept_raw() {
        let layer = parse("[dbt.flags.values]\nthreads = \"abc\"\n").unwrap();
        assert_eq!(layer.flag_values.get(&FlagKey::global("threads")), Some(&json!("abc")));
    }
}
