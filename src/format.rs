//! Output formatting for resolved configuration: JSON, YAML and markdown.

use crate::config::{ConfigView, ResolvedConfig};
use crate::error::Violation;
use crate::types::Resolved;
use serde_json::Value;

/// Output format for rendered configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
    Markdown,
}

/// Render `config` in `format`.
pub fn render(config: &ResolvedConfig, format: OutputFormat) -> anyhow::Result<String> {
    let view = config.view();
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(&view)?,
        OutputFormat::Yaml => serde_yaml::to_string(&view)?,
        OutputFormat::Markdown => format_view_markdown(&view),
    })
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => format!("`{}`", s),
        other => format!("`{}`", other),
    }
}

fn origin_cell<T>(resolved: &Option<Resolved<T>>) -> String {
    resolved
        .as_ref()
        .map(|r| r.origin.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Format a configuration view as markdown.
pub fn format_view_markdown(view: &ConfigView) -> String {
    let mut md = String::new();

    md.push_str("# dbt configuration\n");
    md.push_str(&format!("- **resolved_at**: {}\n", view.resolved_at.to_rfc3339()));
    if let Some(ref file) = view.config_file {
        md.push_str(&format!("- **config_file**: `{}`\n", file));
    }
    md.push_str(&format!(
        "- **projects_root_dir**: `{}` ({})\n",
        view.projects_root_dir.value, view.projects_root_dir.origin
    ));
    let verbs: Vec<String> = view
        .allowed_verbs
        .value
        .iter()
        .map(|v| format!("`{}`", v))
        .collect();
    md.push_str(&format!(
        "- **allowed_verbs**: {} ({})\n",
        verbs.join(", "),
        view.allowed_verbs.origin
    ));

    for (scope, scope_view) in &view.scopes {
        md.push_str(&format!("\n## {}\n", scope));

        if !scope_view.flags.is_empty() {
            md.push_str("\n| flag | enabled | default | origin |\n");
            md.push_str("|------|---------|---------|--------|\n");
            for (name, setting) in &scope_view.flags {
                let default = setting
                    .value
                    .as_ref()
                    .map(|v| format!("`{}`", v.value))
                    .unwrap_or_default();
                md.push_str(&format!(
                    "| `--{}` | {} | {} | {} / {} |\n",
                    heck::AsKebabCase(name),
                    if setting.is_enabled() { "yes" } else { "no" },
                    default,
                    origin_cell(&setting.enabled),
                    origin_cell(&setting.value),
                ));
            }
        }

        if !scope_view.vars.is_empty() {
            md.push_str("\n### vars\n");
            for (name, var) in &scope_view.vars {
                md.push_str(&format!("- **{}**: {} ({})\n", name, cell(&var.value), var.origin));
            }
        }
    }

    if !view.runtime_environment.is_empty() {
        md.push_str("\n## runtime environment\n");
        for (key, value) in &view.runtime_environment {
            md.push_str(&format!("- `{}` = `{}`\n", key, value));
        }
    }

    md
}

/// Format validation violations as a markdown list.
pub fn format_violations_markdown(violations: &[Violation]) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Configuration invalid ({})\n\n", violations.len()));
    for violation in violations {
        md.push_str(&format!("- {}\n", violation));
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigAccessor, Pipeline, StaticEnvironment};
    use crate::registry::InlineDefinitions;
    use crate::types::FlagKey;

    fn config() -> std::sync::Arc<ResolvedConfig> {
        let env = StaticEnvironment::new()
            .with("DBT_RUN_ENABLE_FLAGS", "full_refresh")
            .with("DBT_ENV_SECRET_PASSWORD", "hunter2")
            .with("DBT_VAR_SCHEMA", "analytics");
        let definitions = InlineDefinitions::new(
            "flags:\n  threads:\n    type: integer\n    enabled: true\n    default: 4\n",
        )
        .with_verb("run", "flags:\n  full_refresh:\n    type: boolean\n");
        ConfigAccessor::new(Pipeline::new(definitions, env))
            .get_config()
            .unwrap()
    }

    #[test]
    fn test_markdown_lists_scopes_and_masks_secrets() {
        let md = render(&config(), OutputFormat::Markdown).unwrap();
        assert!(md.contains("## global"));
        assert!(md.contains("## run"));
        assert!(md.contains("| `--full-refresh` | yes |"));
        assert!(md.contains("| `--threads` | yes | `4` | defaults / defaults |"));
        assert!(md.contains("- **schema**: `analytics` (environment)"));
        assert!(md.contains("[REDACTED]"));
        assert!(!md.contains("hunter2"));
    }

    #[test]
    fn test_json_and_yaml_render() {
        let config = config();
        let json: Value = serde_json::from_str(&render(&config, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["scopes"]["global"]["flags"]["threads"]["value"]["value"], 4);

        let yaml = render(&config, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("allowed_verbs:"));
        assert!(!yaml.contains("hunter2"));
    }

    #[test]
    fn test_violations_markdown() {
        let md = format_violations_markdown(&[Violation::UnknownFlag {
            key: FlagKey::global("thread"),
            origin: crate::types::LayerSource::Environment,
        }]);
        assert!(md.starts_with("# Configuration invalid (1)"));
        assert!(md.contains("global.thread"));
    }
}
