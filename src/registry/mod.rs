//! Schema & default registry.
//!
//! The registry is the only source of truth for which verbs and flags exist.
//! Overrides can toggle enablement or supply values, never introduce flags.
//!
//! ## Scope lookup
//! A verb scope sees its own flag specs first and falls back to the global
//! spec of the same name. Only schema existence is shared this way: default
//! allowlist state and default values stay per scope.

pub mod definitions;
mod spec;

pub use definitions::{
    DefinitionLoader, Definitions, DirectoryDefinitions, EmbeddedDefinitions, InlineDefinitions,
    ScopeDefinition,
};
pub use spec::{CoercionFailure, FALSY, FlagDefinition, FlagKind, FlagSpec, TRUTHY, parse_bool, scalar_text};

use crate::error::SchemaLoadError;
use crate::types::{FlagValue, GLOBAL_SCOPE, Scope};
use regex_lite::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tracing::debug;

static VERB_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9\-]*$").expect("verb name pattern is valid")
});

/// Whether `name` can name a verb (`run`, `run-operation`). The global scope
/// name is reserved.
pub fn is_valid_verb_name(name: &str) -> bool {
    name != GLOBAL_SCOPE && VERB_NAME.is_match(name)
}

type FlagTable = BTreeMap<String, FlagSpec>;

/// Loaded and integrity-checked flag schemas for the global scope and every verb.
#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    global: FlagTable,
    verbs: BTreeMap<String, FlagTable>,
}

impl Registry {
    /// Load definitions through `loader` and check them.
    pub fn load(loader: &dyn DefinitionLoader) -> Result<Self, SchemaLoadError> {
        let registry = Self::from_definitions(loader.load_definitions()?)?;
        debug!(
            source = %loader.describe(),
            verbs = registry.verbs.len(),
            global_flags = registry.global.len(),
            "Loaded flag registry"
        );
        Ok(registry)
    }

    /// Registry built from the definitions compiled into the crate.
    pub fn embedded() -> Result<Self, SchemaLoadError> {
        Self::load(&EmbeddedDefinitions)
    }

    pub fn from_definitions(definitions: Definitions) -> Result<Self, SchemaLoadError> {
        let global = build_table(GLOBAL_SCOPE, definitions.global)?;

        let mut verbs = BTreeMap::new();
        for (verb, document) in definitions.verbs {
            if !is_valid_verb_name(&verb) {
                return Err(SchemaLoadError::UnknownScope {
                    origin: format!("{}{verb}", definitions::VERB_STEM_PREFIX),
                    scope: verb,
                });
            }
            let table = build_table(&verb, document)?;
            verbs.insert(verb, table);
        }

        Ok(Self { global, verbs })
    }

    /// Every verb with a definition document.
    pub fn known_verbs(&self) -> BTreeSet<String> {
        self.verbs.keys().cloned().collect()
    }

    pub fn is_known_verb(&self, verb: &str) -> bool {
        self.verbs.contains_key(verb)
    }

    /// Spec for `flag` as seen from `scope`, falling back to global for verb scopes.
    pub fn flag_spec(&self, scope: &Scope, flag: &str) -> Option<&FlagSpec> {
        match scope {
            Scope::Global => self.global.get(flag),
            Scope::Verb(verb) => self
                .verbs
                .get(verb)
                .and_then(|table| table.get(flag))
                .or_else(|| self.global.get(flag)),
        }
    }

    /// Specs declared directly in `scope`, without the global fallback.
    pub fn declared_flags(&self, scope: &Scope) -> impl Iterator<Item = &FlagSpec> {
        let table = match scope {
            Scope::Global => Some(&self.global),
            Scope::Verb(verb) => self.verbs.get(verb),
        };
        table.into_iter().flat_map(|t| t.values())
    }

    /// Default enabled state of every flag declared in `scope`.
    pub fn default_allowlist(&self, scope: &Scope) -> BTreeMap<String, bool> {
        self.declared_flags(scope)
            .map(|spec| (spec.name.clone(), spec.enabled))
            .collect()
    }

    /// Default value of every flag declared in `scope` that has one.
    pub fn default_values(&self, scope: &Scope) -> BTreeMap<String, FlagValue> {
        self.declared_flags(scope)
            .filter_map(|spec| spec.default.clone().map(|v| (spec.name.clone(), v)))
            .collect()
    }

    /// The global scope followed by every verb scope.
    pub fn scopes(&self) -> Vec<Scope> {
        std::iter::once(Scope::Global)
            .chain(self.verbs.keys().map(|v| Scope::Verb(v.clone())))
            .collect()
    }
}

fn build_table(scope: &str, document: ScopeDefinition) -> Result<FlagTable, SchemaLoadError> {
    document
        .flags
        .into_iter()
        .map(|(name, def)| {
            FlagSpec::from_definition(&name, def)
                .map(|spec| (name.clone(), spec))
                .map_err(|reason| SchemaLoadError::InvalidSpec {
                    scope: scope.to_string(),
                    flag: name,
                    reason,
                })
        })
        .collect()
}
