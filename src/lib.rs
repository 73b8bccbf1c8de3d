//! Layered, schema-validated configuration for services that run dbt verbs.
//!
//! Configuration is resolved from three layers (registry defaults, an optional
//! TOML override file, `DBT_*` environment variables), validated against the
//! flag registry and published as an immutable [`ResolvedConfig`] snapshot.
//!
//! ```no_run
//! let config = dbt_flags_config::get_config()?;
//! if config.is_verb_allowed("run") && config.is_flag_enabled("run", "full_refresh") {
//!     println!("threads = {:?}", config.effective_flag_value("run", "threads"));
//! }
//! # Ok::<(), dbt_flags_config::ConfigError>(())
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod registry;
pub mod types;

pub use config::{ConfigAccessor, Pipeline, ResolvedConfig, get_config, reload};
pub use error::{ConfigError, ConfigFileError, SchemaLoadError, ValidationError, Violation};
pub use registry::Registry;
pub use types::{FlagKey, FlagValue, LayerSource, Resolved, Scope};
