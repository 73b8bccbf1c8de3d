//! Default reader: registry defaults as the lowest override layer.

use super::layer::OverrideLayer;
use crate::registry::Registry;
use crate::types::{FlagKey, LayerSource};
use std::path::PathBuf;

/// Projects root used when neither the file nor the environment sets one.
pub const DEFAULT_PROJECTS_ROOT: &str = "./dbt_projects";

/// Convert registry defaults into the baseline layer.
pub fn default_layer(registry: &Registry) -> OverrideLayer {
    let mut layer = OverrideLayer::empty(LayerSource::Defaults);
    layer.set_allowed_verbs(registry.known_verbs().into_iter().collect());
    layer.projects_root_dir = Some(PathBuf::from(DEFAULT_PROJECTS_ROOT));

    for scope in registry.scopes() {
        for (flag, enabled) in registry.default_allowlist(&scope) {
            layer
                .flag_allowlist
                .insert(FlagKey::new(scope.clone(), flag), enabled);
        }
        for (flag, value) in registry.default_values(&scope) {
            layer
                .flag_values
                .insert(FlagKey::new(scope.clone(), flag), value.into());
        }
    }

    layer
}
