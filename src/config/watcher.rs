//! File watcher for the override file.
//!
//! Watches the directory holding the override file (editors often replace the
//! file instead of writing it in place) and emits reload events through a
//! tokio watch channel. Uses debouncing to coalesce rapid file changes.

use super::loader::ConfigAccessor;
use super::resolved::ResolvedConfig;
use crate::error::ConfigError;
use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Event types emitted when the override file changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChangeEvent {
    /// The override file was written, replaced or removed
    OverrideFile(PathBuf),
    /// Watcher encountered an error
    Error(String),
}

impl ConfigChangeEvent {
    /// Returns true if this event requires a config reload.
    pub fn requires_reload(&self) -> bool {
        !matches!(self, ConfigChangeEvent::Error(_))
    }
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for coalescing rapid changes.
    pub debounce_duration: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
        }
    }
}

/// Handle to control the config watcher.
pub struct ConfigWatcherHandle {
    /// Receiver for config change events.
    pub events: watch::Receiver<Option<ConfigChangeEvent>>,
    /// Handle to the watcher task (dropping this will stop the watcher).
    _task_handle: tokio::task::JoinHandle<()>,
}

impl ConfigWatcherHandle {
    /// Wait for the next config change event.
    pub async fn wait_for_change(&mut self) -> Option<ConfigChangeEvent> {
        loop {
            if self.events.changed().await.is_err() {
                return None;
            }
            let event = self.events.borrow().clone();
            if event.is_some() {
                return event;
            }
        }
    }
}

/// Reload `accessor` if `event` calls for it; `None` when it does not.
///
/// Reloading reads the override file and the environment, so it runs under
/// `block_in_place` to keep the runtime's other tasks moving. Requires the
/// multi-threaded tokio runtime.
pub fn reload_for_event(
    accessor: &ConfigAccessor,
    event: &ConfigChangeEvent,
) -> Option<Result<Arc<ResolvedConfig>, ConfigError>> {
    if !event.requires_reload() {
        return None;
    }
    Some(tokio::task::block_in_place(|| accessor.reload()))
}

/// Starts watching `config_file`. Must be called inside a tokio runtime.
///
/// # Example
/// ```ignore
/// let mut handle = start_config_watcher(Path::new("/etc/dbt/overrides.toml"), WatcherConfig::default())?;
/// while let Some(event) = handle.wait_for_change().await {
///     if let Some(Err(e)) = reload_for_event(&accessor, &event) {
///         tracing::warn!("{}", e);
///     }
/// }
/// ```
pub fn start_config_watcher(
    config_file: &Path,
    config: WatcherConfig,
) -> Result<ConfigWatcherHandle, notify::Error> {
    let (event_tx, event_rx) = watch::channel(None);
    let (notify_tx, notify_rx) = mpsc::channel();

    let watch_dir = watch_dir(config_file);
    if !watch_dir.is_dir() {
        return Err(notify::Error::path_not_found().add_path(watch_dir));
    }

    let mut debouncer = new_debouncer(config.debounce_duration, notify_tx)?;
    info!("Watching config file: {}", config_file.display());
    debouncer
        .watcher()
        .watch(&watch_dir, notify::RecursiveMode::NonRecursive)?;

    let config_file = config_file.to_path_buf();
    let task_handle = tokio::task::spawn_blocking(move || {
        // Keep the debouncer alive
        let _debouncer = debouncer;
        process_notify_events(notify_rx, event_tx, &config_file);
    });

    Ok(ConfigWatcherHandle {
        events: event_rx,
        _task_handle: task_handle,
    })
}

/// Directory to watch for `config_file`; a bare file name means the current directory.
fn watch_dir(config_file: &Path) -> PathBuf {
    match config_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Process events from the notify debouncer and convert to ConfigChangeEvents.
fn process_notify_events(
    rx: mpsc::Receiver<Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>>,
    tx: watch::Sender<Option<ConfigChangeEvent>>,
    config_file: &Path,
) {
    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                if let Some(event) = classify_events(events, config_file) {
                    debug!("Config change detected: {:?}", event);
                    if tx.send(Some(event)).is_err() {
                        info!("Config watcher receiver dropped, stopping");
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                error!("File watcher error: {}", e);
                let _ = tx.send(Some(ConfigChangeEvent::Error(e.to_string())));
            }
            Err(_) => {
                info!("Config watcher channel closed, stopping");
                return;
            }
        }
    }
}

/// Collapse one debounced batch into at most one event.
fn classify_events(
    events: Vec<notify_debouncer_mini::DebouncedEvent>,
    config_file: &Path,
) -> Option<ConfigChangeEvent> {
    events
        .into_iter()
        .filter(|event| {
            matches!(
                event.kind,
                DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
            )
        })
        .find_map(|event| classify_path(&event.path, config_file))
}

/// Whether `path` is the watched override file.
fn classify_path(path: &Path, config_file: &Path) -> Option<ConfigChangeEvent> {
    let file_name = config_file.file_name()?;
    if path.file_name() == Some(file_name) {
        Some(ConfigChangeEvent::OverrideFile(path.to_path_buf()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_override_file() {
        let result = classify_path(
            Path::new("/etc/dbt/overrides.toml"),
            Path::new("/etc/dbt/overrides.toml"),
        );
        assert!(matches!(result, Some(ConfigChangeEvent::OverrideFile(_))));
    }

    #[test]
    fn test_classify_sibling_file() {
        let result = classify_path(
            Path::new("/etc/dbt/other.toml"),
            Path::new("/etc/dbt/overrides.toml"),
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_watch_dir_for_bare_file_name() {
        assert_eq!(watch_dir(Path::new("overrides.toml")), PathBuf::from("."));
        assert_eq!(
            watch_dir(Path::new("/etc/dbt/overrides.toml")),
            PathBuf::from("/etc/dbt")
        );
    }

    #[test]
    fn test_event_requires_reload() {
        assert!(ConfigChangeEvent::OverrideFile(PathBuf::new()).requires_reload());
        assert!(!ConfigChangeEvent::Error("test".to_string()).requires_reload());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reload_for_event() {
        use crate::config::{Pipeline, StaticEnvironment};
        use crate::registry::InlineDefinitions;
        use crate::types::FlagValue;

        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("overrides.toml");
        std::fs::write(&path, "[dbt.flags.values]\nthreads = 2\n").unwrap();
        let definitions = InlineDefinitions::new(
            "flags:\n  threads:\n    type: integer\n    enabled: true\n    default: 4\n",
        )
        .with_verb("run", "");
        let accessor = ConfigAccessor::new(
            Pipeline::new(definitions, StaticEnvironment::new()).with_config_file(&path),
        );
        let first = accessor.get_config().unwrap();
        assert_eq!(first.flag_default_value("global", "threads"), Some(&FlagValue::Integer(2)));

        std::fs::write(&path, "[dbt.flags.values]\nthreads = 6\n").unwrap();
        let error = ConfigChangeEvent::Error("watch failed".to_string());
        assert!(reload_for_event(&accessor, &error).is_none());
        assert!(Arc::ptr_eq(&first, &accessor.current().unwrap()));

        let event = ConfigChangeEvent::OverrideFile(path.clone());
        let reloaded = reload_for_event(&accessor, &event).unwrap().unwrap();
        assert_eq!(reloaded.flag_default_value("global", "threads"), Some(&FlagValue::Integer(6)));
        assert!(Arc::ptr_eq(&reloaded, &accessor.current().unwrap()));
    }

    #[tokio::test]
    async fn test_missing_directory_is_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let result = start_config_watcher(
            &temp.path().join("missing").join("overrides.toml"),
            WatcherConfig::default(),
        );
        assert!(result.is_err());
    }
}
