//! dbt-config: resolve and inspect layered dbt flag configuration.

use anyhow::{Result, bail};
use clap::Parser;
use dbt_flags_config::cli::{Cli, Command, FormatArg};
use dbt_flags_config::config::watcher::{WatcherConfig, reload_for_event, start_config_watcher};
use dbt_flags_config::config::{ConfigAccessor, Pipeline};
use dbt_flags_config::error::ConfigError;
use dbt_flags_config::format::{OutputFormat, format_violations_markdown, render};
use dbt_flags_config::registry::DirectoryDefinitions;
use dbt_flags_config::types::Scope;
use std::fs::OpenOptions;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let mut pipeline = Pipeline::from_process();
    if let Some(dir) = &cli.schema_dir {
        pipeline = pipeline.with_definitions(DirectoryDefinitions::new(dir));
    }
    if let Some(path) = &cli.config_file {
        pipeline = pipeline.with_config_file(path);
    }
    let accessor = ConfigAccessor::new(pipeline);

    match cli.command.unwrap_or(Command::Show {
        format: FormatArg::Json,
    }) {
        Command::Show { format } => show(&accessor, format.into()),
        Command::Check => check(&accessor),
        Command::Watch => watch(&accessor).await,
        Command::Verbs => verbs(&accessor),
    }
}

/// Print a violation list to stderr and exit non-zero; other errors propagate.
fn report(err: ConfigError) -> Result<()> {
    if let ConfigError::Validation(ref validation) = err {
        eprint!("{}", format_violations_markdown(&validation.violations));
        std::process::exit(1);
    }
    Err(err.into())
}

fn show(accessor: &ConfigAccessor, format: OutputFormat) -> Result<()> {
    match accessor.get_config() {
        Ok(config) => {
            println!("{}", render(&config, format)?);
            Ok(())
        }
        Err(e) => report(e),
    }
}

fn check(accessor: &ConfigAccessor) -> Result<()> {
    match accessor.get_config() {
        Ok(config) => {
            let flags: usize = config.scopes().map(|scope| config.flags(scope.clone()).count()).sum();
            println!(
                "OK: {} allowed verbs, {} flag settings, {} runtime environment entries",
                config.allowed_verbs().len(),
                flags,
                config.runtime_environment().len()
            );
            Ok(())
        }
        Err(e) => report(e),
    }
}

fn verbs(accessor: &ConfigAccessor) -> Result<()> {
    let config = match accessor.get_config() {
        Ok(config) => config,
        Err(e) => return report(e),
    };

    let global = config.enabled_flags(Scope::Global);
    println!("global: {}", global.join(", "));
    for verb in config.allowed_verbs() {
        let flags = config.enabled_flags(Scope::verb(verb.as_str()));
        println!("{}: {}", verb, flags.join(", "));
    }
    Ok(())
}

/// Resolve once, then reload on every change to the override file.
async fn watch(accessor: &ConfigAccessor) -> Result<()> {
    if let Err(e) = accessor.get_config() {
        return report(e);
    }

    let Some(config_file) = accessor.pipeline().config_file() else {
        bail!("No override file declared (set DBT_CONFIG_FILE or --config-file); nothing to watch");
    };

    let mut handle = start_config_watcher(&config_file, WatcherConfig::default())?;
    info!("Config file watcher started for hot-reload");

    loop {
        tokio::select! {
            event = handle.wait_for_change() => match event {
                Some(event) => {
                    info!("Config change detected: {:?}", event);
                    match reload_for_event(accessor, &event) {
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            for violation in e.violations() {
                                warn!("{}", violation);
                            }
                        }
                        None => warn!("Config watcher reported: {:?}", event),
                    }
                }
                None => {
                    info!("Config file watcher stopped");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping watcher");
                return Ok(());
            }
        }
    }
}
