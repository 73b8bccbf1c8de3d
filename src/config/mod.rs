//! Layered configuration resolution.
//!
//! Consolidates configuration from three layers, merged per `(scope, key)`:
//! 1. **Defaults** - the flag registry (`schema/`, or `DBT_SCHEMA_DIR`)
//! 2. **File** - optional TOML override file named by `DBT_CONFIG_FILE`
//! 3. **Environment** - `DBT_*` variables (highest precedence)
//!
//! ## Pipeline
//! readers ([`defaults`], [`file`], [`environment`]) → [`merge`] → [`validate`]
//! → [`ResolvedConfig`], published by a [`ConfigAccessor`].
//!
//! ## Environment Variables
//! - `DBT_CONFIG_FILE` - Override file path
//! - `DBT_SCHEMA_DIR` - Directory with `global.yaml` and `dbt-<verb>.yaml`
//! - `DBT_PROJECT_ROOT` - Projects root directory (alias `DBT_PROJECTS_ROOT`)
//! - `DBT_ALLOWED_VERBS`, `DBT_[<VERB>_]ENABLE_FLAGS`, `DBT_[<VERB>_]DISABLE_FLAGS`,
//!   `DBT_[<VERB>_]FLAG_<FLAG>`, `DBT_ENV_<KEY>`, `DBT_VAR_<NAME>`

pub mod defaults;
pub mod environment;
pub mod file;
pub mod layer;
mod loader;
pub mod merge;
mod resolved;
pub mod validate;
pub mod watcher;

pub use environment::{EnvironmentSource, ProcessEnvironment, StaticEnvironment};
pub use layer::OverrideLayer;
pub use loader::{ConfigAccessor, Pipeline, get_config, process_accessor, reload};
pub use merge::{Candidate, deep_merge};
pub use resolved::{ConfigView, FlagSetting, ResolvedConfig, ScopeView};
