//! Loaders for the structured definition documents behind the registry.
//!
//! A definition set is one `global` document plus one `dbt-<verb>` document per
//! supported verb. Sources:
//! - [`EmbeddedDefinitions`] - compiled in from `schema/`
//! - [`DirectoryDefinitions`] - a directory on disk (`DBT_SCHEMA_DIR`)
//! - [`InlineDefinitions`] - YAML strings held in memory

use super::spec::FlagDefinition;
use crate::error::SchemaLoadError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File stem of the global definition document.
pub const GLOBAL_STEM: &str = "global";
/// File stem prefix of per-verb definition documents.
pub const VERB_STEM_PREFIX: &str = "dbt-";

/// One definition document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeDefinition {
    #[serde(default)]
    pub flags: BTreeMap<String, FlagDefinition>,
}

/// A complete definition set, not yet checked for integrity.
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    pub global: ScopeDefinition,
    pub verbs: BTreeMap<String, ScopeDefinition>,
}

/// Anything that can produce a definition set.
pub trait DefinitionLoader: Send + Sync {
    fn load_definitions(&self) -> Result<Definitions, SchemaLoadError>;

    /// Human readable description of where definitions come from.
    fn describe(&self) -> String;
}

impl<T: DefinitionLoader + ?Sized> DefinitionLoader for std::sync::Arc<T> {
    fn load_definitions(&self) -> Result<Definitions, SchemaLoadError> {
        (**self).load_definitions()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Which scope a document stem names.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DocumentScope {
    Global,
    Verb(String),
}

fn scope_for_stem(origin: &str, stem: &str) -> Result<DocumentScope, SchemaLoadError> {
    if stem == GLOBAL_STEM {
        return Ok(DocumentScope::Global);
    }
    match stem.strip_prefix(VERB_STEM_PREFIX) {
        Some(verb) if !verb.is_empty() => Ok(DocumentScope::Verb(verb.to_string())),
        _ => Err(SchemaLoadError::UnknownScope {
            origin: origin.to_string(),
            scope: stem.to_string(),
        }),
    }
}

/// Parse one YAML definition document.
pub fn parse_document(origin: &str, yaml: &str) -> Result<ScopeDefinition, SchemaLoadError> {
    if yaml.trim().is_empty() {
        return Ok(ScopeDefinition::default());
    }
    serde_yaml::from_str(yaml).map_err(|e| SchemaLoadError::Malformed {
        origin: origin.to_string(),
        message: e.to_string(),
    })
}

/// Assemble a definition set from `(stem, yaml)` documents.
fn assemble<'a>(
    source: &str,
    documents: impl IntoIterator<Item = (String, &'a str)>,
) -> Result<Definitions, SchemaLoadError> {
    let mut global = None;
    let mut verbs = BTreeMap::new();

    for (stem, yaml) in documents {
        let origin = format!("{source}/{stem}");
        let document = parse_document(&origin, yaml)?;
        match scope_for_stem(&origin, &stem)? {
            DocumentScope::Global => {
                if global.replace(document).is_some() {
                    return Err(SchemaLoadError::Malformed {
                        origin,
                        message: "global scope is defined more than once".to_string(),
                    });
                }
            }
            DocumentScope::Verb(verb) => {
                if verbs.insert(verb.clone(), document).is_some() {
                    return Err(SchemaLoadError::Malformed {
                        origin,
                        message: format!("verb '{verb}' is defined more than once"),
                    });
                }
            }
        }
    }

    let global = global.ok_or_else(|| {
        SchemaLoadError::Missing(format!("{source}: no `{GLOBAL_STEM}` definition document"))
    })?;
    if verbs.is_empty() {
        return Err(SchemaLoadError::Missing(format!(
            "{source}: no `{VERB_STEM_PREFIX}<verb>` definition documents"
        )));
    }

    Ok(Definitions { global, verbs })
}

const EMBEDDED: &[(&str, &str)] = &[
    ("global", include_str!("../../schema/global.yaml")),
    ("dbt-build", include_str!("../../schema/dbt-build.yaml")),
    ("dbt-compile", include_str!("../../schema/dbt-compile.yaml")),
    ("dbt-run", include_str!("../../schema/dbt-run.yaml")),
    ("dbt-seed", include_str!("../../schema/dbt-seed.yaml")),
    ("dbt-snapshot", include_str!("../../schema/dbt-snapshot.yaml")),
    ("dbt-test", include_str!("../../schema/dbt-test.yaml")),
];

/// Definitions compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedDefinitions;

impl DefinitionLoader for EmbeddedDefinitions {
    fn load_definitions(&self) -> Result<Definitions, SchemaLoadError> {
        assemble(
            "embedded",
            EMBEDDED.iter().map(|(stem, yaml)| (stem.to_string(), *yaml)),
        )
    }

    fn describe(&self) -> String {
        "embedded schema".to_string()
    }
}

/// Definitions read from `global.yaml` and `dbt-<verb>.yaml` files in a directory.
#[derive(Debug, Clone)]
pub struct DirectoryDefinitions {
    dir: PathBuf,
}

impl DirectoryDefinitions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DefinitionLoader for DirectoryDefinitions {
    fn load_definitions(&self) -> Result<Definitions, SchemaLoadError> {
        if !self.dir.is_dir() {
            return Err(SchemaLoadError::Missing(format!(
                "schema directory {} does not exist",
                self.dir.display()
            )));
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|source| SchemaLoadError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut documents: Vec<(String, String)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SchemaLoadError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            let extension = path.extension().and_then(|e| e.to_str());
            if !matches!(extension, Some("yaml") | Some("yml")) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = std::fs::read_to_string(&path).map_err(|source| SchemaLoadError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), "Read schema definition");
            documents.push((stem.to_string(), content));
        }
        documents.sort();

        assemble(
            &self.dir.display().to_string(),
            documents.iter().map(|(stem, yaml)| (stem.clone(), yaml.as_str())),
        )
    }

    fn describe(&self) -> String {
        format!("schema directory {}", self.dir.display())
    }
}

/// Definitions held as YAML strings.
#[derive(Debug, Clone, Default)]
pub struct InlineDefinitions {
    global: String,
    verbs: Vec<(String, String)>,
}

impl InlineDefinitions {
    pub fn new(global_yaml: impl Into<String>) -> Self {
        Self {
            global: global_yaml.into(),
            verbs: Vec::new(),
        }
    }

    pub fn with_verb(mut self, verb: impl Into<String>, yaml: impl Into<String>) -> Self {
        self.verbs.push((verb.into(), yaml.into()));
        self
    }
}

impl DefinitionLoader for InlineDefinitions {
    fn load_definitions(&self) -> Result<Definitions, SchemaLoadError> {
        let documents = std::iter::once((GLOBAL_STEM.to_string(), self.global.as_str())).chain(
            self.verbs
                .iter()
                .map(|(verb, yaml)| (format!("{VERB_STEM_PREFIX}{verb}"), yaml.as_str())),
        );
        assemble("inline", documents)
    }

    fn describe(&self) -> String {
        "inline schema".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_embedded_definitions_parse() {
        let defs = EmbeddedDefinitions.load_definitions().unwrap();
        assert!(defs.global.flags.contains_key("threads"));
        assert!(defs.verbs.contains_key("run"));
        assert!(defs.verbs.contains_key("test"));
    }

    #[test]
    fn test_directory_definitions() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("global.yaml"),
            "flags:\n  threads:\n    type: integer\n    default: 4\n",
        )
        .unwrap();
        std::fs::write(temp.path().join("dbt-run.yml"), "flags: {}\n").unwrap();
        std::fs::write(temp.path().join("README.md"), "ignored").unwrap();

        let defs = DirectoryDefinitions::new(temp.path()).load_definitions().unwrap();
        assert!(defs.global.flags.contains_key("threads"));
        assert_eq!(defs.verbs.keys().collect::<Vec<_>>(), vec!["run"]);
    }

    #[test]
    fn test_directory_missing() {
        let temp = TempDir::new().unwrap();
        let err = DirectoryDefinitions::new(temp.path().join("nope"))
            .load_definitions()
            .unwrap_err();
        assert!(matches!(err, SchemaLoadError::Missing(_)));
    }

    #[test]
    fn test_directory_without_global_document() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("dbt-run.yaml"), "flags: {}\n").unwrap();
        let err = DirectoryDefinitions::new(temp.path()).load_definitions().unwrap_err();
        assert!(matches!(err, SchemaLoadError::Missing(_)));
    }

    #[test]
    fn test_definitions_without_verbs() {
        let err = InlineDefinitions::new("flags:\n  threads:\n    type: integer\n")
            .load_definitions()
            .unwrap_err();
        assert!(matches!(err, SchemaLoadError::Missing(ref message) if message.contains("dbt-<verb>")));

        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("global.yaml"), "flags: {}\n").unwrap();
        let err = DirectoryDefinitions::new(temp.path()).load_definitions().unwrap_err();
        assert!(matches!(err, SchemaLoadError::Missing(_)));
    }

    #[test]
    fn test_unknown_scope_document() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("global.yaml"), "flags: {}\n").unwrap();
        std::fs::write(temp.path().join("extras.yaml"), "flags: {}\n").unwrap();
        let err = DirectoryDefinitions::new(temp.path()).load_definitions().unwrap_err();
        assert!(matches!(err, SchemaLoadError::UnknownScope { ref scope, .. } if scope == "extras"));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = InlineDefinitions::new("flags: [unclosed")
            .load_definitions()
            .unwrap_err();
        assert!(matches!(err, SchemaLoadError::Malformed { .. }));
    }

    #[test]
    fn test_duplicate_verb_documents() {
        let err = InlineDefinitions::new("")
            .with_verb("run", "")
            .with_verb("run", "")
            .load_definitions()
            .unwrap_err();
        assert!(matches!(err, SchemaLoadError::Malformed { .. }));
    }
}
