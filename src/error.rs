//! Error taxonomy for configuration resolution.
//!
//! Three failure domains, each fatal for the resolution pass that hit it:
//! - [`SchemaLoadError`] - registry definitions missing or malformed
//! - [`ConfigFileError`] - override file declared but unusable
//! - [`ValidationError`] - every [`Violation`] found across all layers

use crate::registry::FlagKind;
use crate::types::{FlagKey, LayerSource};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Registry definitions could not be loaded.
#[derive(Debug, Error)]
pub enum SchemaLoadError {
    #[error("schema definitions not found: {0}")]
    Missing(String),

    #[error("failed to read schema definition {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed schema definition {origin}: {message}")]
    Malformed { origin: String, message: String },

    #[error("schema definition {origin} references unknown scope '{scope}'")]
    UnknownScope { origin: String, scope: String },

    #[error("invalid flag spec `{scope}.{flag}`: {reason}")]
    InvalidSpec {
        scope: String,
        flag: String,
        reason: String,
    },
}

/// The override file was declared but could not be used.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("config file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("config file {} is a directory", .0.display())]
    IsDirectory(PathBuf),

    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {} is not valid TOML: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("config file {}: unknown section [{section}]", .path.display())]
    UnknownSection { path: PathBuf, section: String },

    #[error("config file {}: option `[{section}].{option}`: {reason}", .path.display())]
    InvalidOption {
        path: PathBuf,
        section: String,
        option: String,
        reason: String,
    },
}

/// A single problem found by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("{origin}: verb name '{verb}' is invalid; expected lowercase letters, digits and '-', other than the reserved 'global'")]
    InvalidVerbName { verb: String, origin: LayerSource },

    #[error("{origin}: verb '{verb}' is not supported and not listed in the allowed verbs")]
    UnknownVerb { verb: String, origin: LayerSource },

    #[error("{origin}: flag `{key}` is not recognized as a valid {} flag", scope_label(.key))]
    UnknownFlag { key: FlagKey, origin: LayerSource },

    #[error("{origin}: flag `{key}`: value '{value}' could not be coerced to {expected}")]
    InvalidValue {
        key: FlagKey,
        value: String,
        expected: FlagKind,
        origin: LayerSource,
    },

    #[error("{origin}: flag `{key}`: value '{value}' is not one of [{}]", .allowed.join(", "))]
    DisallowedValue {
        key: FlagKey,
        value: String,
        allowed: Vec<String>,
        origin: LayerSource,
    },

    #[error("{origin}: flag `{key}`: value {value} is outside [{}, {}]", bound(.min), bound(.max))]
    OutOfRange {
        key: FlagKey,
        value: i64,
        min: Option<i64>,
        max: Option<i64>,
        origin: LayerSource,
    },

    #[error("{origin}: projects_root_dir {} is not an existing directory", .path.display())]
    ProjectsRootNotDirectory { path: PathBuf, origin: LayerSource },

    #[error("{origin}: runtime environment key '{key}' is not a valid variable name")]
    InvalidEnvKey { key: String, origin: LayerSource },
}

fn scope_label(key: &FlagKey) -> String {
    match key.scope.verb_name() {
        None => "global dbt".to_string(),
        Some(verb) => format!("dbt {verb}"),
    }
}

fn bound(value: &Option<i64>) -> String {
    value.map_or_else(|| "..".to_string(), |v| v.to_string())
}

impl Violation {
    /// The layer the offending setting came from.
    pub fn origin(&self) -> LayerSource {
        match self {
            Violation::InvalidVerbName { origin, .. }
            | Violation::UnknownVerb { origin, .. }
            | Violation::UnknownFlag { origin, .. }
            | Violation::InvalidValue { origin, .. }
            | Violation::DisallowedValue { origin, .. }
            | Violation::OutOfRange { origin, .. }
            | Violation::ProjectsRootNotDirectory { origin, .. }
            | Violation::InvalidEnvKey { origin, .. } => *origin,
        }
    }

    /// The flag the violation is about, if any.
    pub fn flag_key(&self) -> Option<&FlagKey> {
        match self {
            Violation::UnknownFlag { key, .. }
            | Violation::InvalidValue { key, .. }
            | Violation::DisallowedValue { key, .. }
            | Violation::OutOfRange { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Every violation found during one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "configuration is invalid ({} violation{})",
            self.violations.len(),
            if self.violations.len() == 1 { "" } else { "s" }
        )?;
        for violation in &self.violations {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Any failure of a resolution pass.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Schema(#[from] SchemaLoadError),

    #[error(transparent)]
    File(#[from] ConfigFileError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ConfigError {
    /// The collected violations, when the pass failed validation.
    pub fn violations(&self) -> &[Violation] {
        match self {
            ConfigError::Validation(err) => &err.violations,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_violation() {
        let err = ValidationError::new(vec![
            Violation::UnknownFlag {
                key: FlagKey::global("thread"),
                origin: LayerSource::Environment,
            },
            Violation::UnknownFlag {
                key: FlagKey::verb("run", "ful_refresh"),
                origin: LayerSource::File,
            },
        ]);

        let message = err.to_string();
        assert!(message.starts_with("configuration is invalid (2 violations)"));
        assert!(message.contains("environment: flag `global.thread` is not recognized as a valid global dbt flag"));
        assert!(message.contains("file: flag `run.ful_refresh` is not recognized as a valid dbt run flag"));
    }

    #[test]
    fn test_out_of_range_message_renders_open_bounds() {
        let violation = Violation::OutOfRange {
            key: FlagKey::global("threads"),
            value: 0,
            min: Some(1),
            max: None,
            origin: LayerSource::Environment,
        };
        assert!(violation.to_string().contains("outside [1, ..]"));
    }

    #[test]
    fn test_config_error_exposes_violations() {
        let err: ConfigError = ValidationError::new(vec![Violation::UnknownVerb {
            verb: "deploy".to_string(),
            origin: LayerSource::File,
        }])
        .into();
        assert_eq!(err.violations().len(), 1);
        assert_eq!(err.violations()[0].origin(), LayerSource::File);

        let err: ConfigError = ConfigFileError::NotFound(PathBuf::from("/nope.toml")).into();
        assert!(err.violations().is_empty());
    }
}
