//! Resolution pipeline and the lazily-initialised configuration accessor.
//!
//! A [`Pipeline`] knows where definitions, the override file and environment
//! variables come from and runs one full resolution pass. A [`ConfigAccessor`]
//! runs the pipeline once, publishes the result and hands out shared
//! snapshots; [`ConfigAccessor::reload`] swaps in a new snapshot only after a
//! complete successful pass.

use super::defaults::default_layer;
use super::environment::{
    CONFIG_FILE_VAR, EnvironmentSource, ProcessEnvironment, SCHEMA_DIR_VAR, lookup, read_environment,
};
use super::file::read_file;
use super::merge::resolve;
use super::resolved::ResolvedConfig;
use super::validate::validate;
use crate::error::{ConfigError, SchemaLoadError};
use crate::registry::{DefinitionLoader, DirectoryDefinitions, EmbeddedDefinitions, Registry};
use arc_swap::ArcSwapOption;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, info, warn};

/// Sources for one resolution pass.
#[derive(Clone)]
pub struct Pipeline {
    definitions: Arc<dyn DefinitionLoader>,
    environment: Arc<dyn EnvironmentSource>,
    /// Explicit override file; takes precedence over `DBT_CONFIG_FILE`.
    config_file: Option<PathBuf>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("definitions", &self.definitions.describe())
            .field("config_file", &self.config_file)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        definitions: impl DefinitionLoader + 'static,
        environment: impl EnvironmentSource + 'static,
    ) -> Self {
        Self {
            definitions: Arc::new(definitions),
            environment: Arc::new(environment),
            config_file: None,
        }
    }

    /// Pipeline over the process environment. Definitions come from
    /// `DBT_SCHEMA_DIR` when set, otherwise from the embedded schema.
    pub fn from_process() -> Self {
        let vars = ProcessEnvironment.vars();
        match lookup(&vars, SCHEMA_DIR_VAR) {
            Some(dir) => Self::new(DirectoryDefinitions::new(dir), ProcessEnvironment),
            None => Self::new(EmbeddedDefinitions, ProcessEnvironment),
        }
    }

    pub fn with_definitions(mut self, definitions: impl DefinitionLoader + 'static) -> Self {
        self.definitions = Arc::new(definitions);
        self
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn load_registry(&self) -> Result<Registry, SchemaLoadError> {
        Registry::load(self.definitions.as_ref())
    }

    /// Override file the next pass would read, if any.
    pub fn config_file(&self) -> Option<PathBuf> {
        self.config_file_for(&self.environment.vars())
    }

    fn config_file_for(&self, vars: &[(String, String)]) -> Option<PathBuf> {
        self.config_file
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| lookup(vars, CONFIG_FILE_VAR).map(PathBuf::from))
    }

    /// Read every source once, merge and validate.
    pub fn resolve(&self, registry: &Registry) -> Result<ResolvedConfig, ConfigError> {
        let vars = self.environment.vars();
        let path = self.config_file_for(&vars);

        let file = read_file(path.as_deref())?;
        let environment = read_environment(registry, &vars);
        let candidate = resolve(registry, default_layer(registry), file, environment);
        let config = validate(registry, candidate)?;

        info!(
            verbs = config.allowed_verbs().len(),
            runtime_env = config.runtime_environment().len(),
            config_file = ?config.config_file(),
            "Resolved configuration"
        );
        Ok(config)
    }
}

/// Lazily resolves, caches and atomically replaces the configuration.
///
/// The first [`get_config`](Self::get_config) call runs the pipeline under a
/// lock; concurrent first callers wait for it and share its result. After
/// that, reads are a lock-free load of the published `Arc`.
pub struct ConfigAccessor {
    pipeline: Pipeline,
    registry: OnceLock<Arc<Registry>>,
    current: ArcSwapOption<ResolvedConfig>,
    resolving: Mutex<()>,
}

impl fmt::Debug for ConfigAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigAccessor")
            .field("pipeline", &self.pipeline)
            .field("published", &self.current.load().is_some())
            .finish()
    }
}

impl ConfigAccessor {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            registry: OnceLock::new(),
            current: ArcSwapOption::empty(),
            resolving: Mutex::new(()),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The published configuration, resolving it on first use.
    ///
    /// A failed first resolution publishes nothing; the next call tries again.
    pub fn get_config(&self) -> Result<Arc<ResolvedConfig>, ConfigError> {
        if let Some(config) = self.current.load_full() {
            return Ok(config);
        }

        let _guard = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(config) = self.current.load_full() {
            return Ok(config);
        }

        let config = Arc::new(self.resolve_locked()?);
        self.current.store(Some(Arc::clone(&config)));
        debug!("Published initial configuration");
        Ok(config)
    }

    /// Re-read the override file and environment and publish the result.
    ///
    /// On failure the previous snapshot stays published.
    pub fn reload(&self) -> Result<Arc<ResolvedConfig>, ConfigError> {
        let _guard = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
        info!("Reloading configuration...");

        match self.resolve_locked() {
            Ok(config) => {
                let config = Arc::new(config);
                self.current.store(Some(Arc::clone(&config)));
                info!("Configuration reloaded");
                Ok(config)
            }
            Err(e) => {
                warn!("Config reload failed: {}. Keeping current config.", e);
                Err(e)
            }
        }
    }

    /// The published configuration without resolving.
    pub fn current(&self) -> Option<Arc<ResolvedConfig>> {
        self.current.load_full()
    }

    /// The registry, once a pass has loaded it.
    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.get().cloned()
    }

    /// Run one pass. The registry is loaded on the first pass and reused.
    /// Callers hold `self.resolving`.
    fn resolve_locked(&self) -> Result<ResolvedConfig, ConfigError> {
        let registry = match self.registry.get() {
            Some(registry) => Arc::clone(registry),
            None => {
                let registry = Arc::new(self.pipeline.load_registry()?);
                let _ = self.registry.set(Arc::clone(&registry));
                registry
            }
        };
        self.pipeline.resolve(&registry)
    }
}

static PROCESS_ACCESSOR: OnceLock<ConfigAccessor> = OnceLock::new();

/// Accessor over [`Pipeline::from_process`], created on first use.
pub fn process_accessor() -> &'static ConfigAccessor {
    PROCESS_ACCESSOR.get_or_init(|| ConfigAccessor::new(Pipeline::from_process()))
}

/// The process-wide configuration, resolved on first call.
pub fn get_config() -> Result<Arc<ResolvedConfig>, ConfigError> {
    process_accessor().get_config()
}

/// Reload the process-wide configuration.
pub fn reload() -> Result<Arc<ResolvedConfig>, ConfigError> {
    process_accessor().reload()
}
