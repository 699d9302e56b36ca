use std::env;
use std::fs;
use std::path::Path;

use grid_core::{ConfigModel, DocumentFormat, Settings};
use serde_json::Value;

use super::{CommandResult, Invocation};

/// One reported setting: dotted key, rendered value, and where to look for
/// competing sources in precedence order.
struct Field<'a> {
    key: &'a str,
    value: String,
    env_key: Option<&'a str>,
    cli_flag: Option<&'a str>,
}

pub fn run(invocation: &Invocation) -> CommandResult {
    let config = match invocation.load() {
        Ok(config) => config,
        Err(error) => return CommandResult::from_error("config", &error),
    };

    let file_doc = config.source_path().and_then(load_config_file_doc);
    let settings = config.settings();
    let path_overrides = settings.allow_path_override;

    let mut lines =
        vec!["effective settings (source precedence: cli > env > file > default):".to_string()];
    for field in settings_fields(settings, invocation, path_overrides) {
        let source = field_source(&field, file_doc.as_ref(), config.source_path());
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.extend(credential_lines(&config));
    CommandResult::output(lines.join("\n"))
}

fn settings_fields<'a>(
    settings: &Settings,
    invocation: &Invocation,
    path_overrides: bool,
) -> Vec<Field<'a>> {
    let working_directory_flag = (path_overrides
        && invocation.overrides.working_directory.is_some())
    .then_some("--working-dir");
    let log_level_flag = invocation.overrides.log_level.is_some().then_some("--log-level");
    let mcp_flag = invocation.overrides.mcp_enabled.is_some().then_some("--mcp-enabled");

    vec![
        Field {
            key: "settings.default_agent",
            value: settings.default_agent.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_key: None,
            cli_flag: None,
        },
        Field {
            key: "settings.max_history",
            value: settings.max_history.to_string(),
            env_key: None,
            cli_flag: None,
        },
        Field {
            key: "settings.max_turns",
            value: settings.max_turns.to_string(),
            env_key: None,
            cli_flag: None,
        },
        Field {
            key: "settings.agent_timeout_secs",
            value: settings.agent_timeout_secs.to_string(),
            env_key: Some("GRID_AGENT_TIMEOUT_SECS"),
            cli_flag: None,
        },
        Field {
            key: "settings.working_directory",
            value: settings.working_directory.display().to_string(),
            env_key: path_overrides.then_some("GRID_WORKING_DIRECTORY"),
            cli_flag: working_directory_flag,
        },
        Field {
            key: "settings.config_directory",
            value: settings.config_directory.display().to_string(),
            env_key: None,
            cli_flag: None,
        },
        Field {
            key: "settings.allow_path_override",
            value: settings.allow_path_override.to_string(),
            env_key: None,
            cli_flag: None,
        },
        Field {
            key: "settings.mcp_enabled",
            value: settings.mcp_enabled.to_string(),
            env_key: Some("GRID_MCP_ENABLED"),
            cli_flag: mcp_flag,
        },
        Field {
            key: "settings.enforce_guardrails",
            value: settings.enforce_guardrails.to_string(),
            env_key: None,
            cli_flag: None,
        },
        Field {
            key: "settings.tools_common_rules",
            value: if settings.tools_common_rules.is_some() { "<set>" } else { "<unset>" }
                .to_string(),
            env_key: None,
            cli_flag: None,
        },
        Field {
            key: "settings.logging.level",
            value: settings.logging.level.clone(),
            env_key: Some("GRID_LOG_LEVEL"),
            cli_flag: log_level_flag,
        },
        Field {
            key: "settings.logging.format",
            value: format!("{:?}", settings.logging.format).to_ascii_lowercase(),
            env_key: Some("GRID_LOG_FORMAT"),
            cli_flag: None,
        },
    ]
}

/// Provider credentials are reported by presence only.
fn credential_lines(config: &ConfigModel) -> Vec<String> {
    config
        .providers()
        .iter()
        .map(|(key, provider)| {
            let state = if env::var_os(&provider.api_key_env).is_some_and(|value| !value.is_empty())
            {
                "<set>"
            } else {
                "<unset>"
            };
            render_line(
                &format!("providers.{key}.api_key"),
                state,
                format!("env ({})", provider.api_key_env),
            )
        })
        .collect()
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    match DocumentFormat::from_path(path)? {
        DocumentFormat::Toml => toml::from_str(&raw).ok(),
        DocumentFormat::Yaml => serde_yaml::from_str(&raw).ok(),
        DocumentFormat::Json => serde_json::from_str(&raw).ok(),
    }
}

fn field_source(field: &Field<'_>, config_file_doc: Option<&Value>, config_file_path: Option<&Path>) -> String {
    if let Some(flag) = field.cli_flag {
        return format!("cli ({flag})");
    }

    if let Some(env_key) = field.env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, field.key) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::contains_path;

    #[test]
    fn nested_keys_are_found_by_dotted_path() {
        let doc = json!({ "settings": { "logging": { "level": "debug" } } });
        assert!(contains_path(&doc, "settings.logging.level"));
        assert!(!contains_path(&doc, "settings.logging.format"));
        assert!(!contains_path(&doc, "providers"));
    }
}
