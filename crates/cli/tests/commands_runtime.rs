use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use grid_cli::commands::{agents, assemble, config, doctor, prompt, validate, Invocation};
use grid_core::ConfigOverrides;
use serde_json::Value;
use tempfile::TempDir;

const GRID_TOML: &str = r#"
[settings]
default_agent = "writer"
max_turns = 6

[providers.openai]
base_url = "https://api.example.test/v1/"
api_key_env = "GRID_TEST_API_KEY"

[models.fast]
provider = "openai"
name = "fast-1"

[prompt_templates]
base = "You are a careful grid agent."

[guardrails.length]
type = "input_validation"

[guardrails.scrub]
type = "output_sanitization"

[agents.helper]
name = "Helper"
description = "Answers follow-up questions"
model = "fast"

[agents.writer]
name = "Writer"
model = "fast"
tools = ["helper"]
guardrails = ["length", "scrub"]
"#;

fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("grid.toml");
    fs::write(&path, contents).expect("write config");
    (dir, path)
}

fn invocation(path: &Path) -> Invocation {
    Invocation { config_path: Some(path.to_path_buf()), overrides: ConfigOverrides::default() }
}

#[test]
fn validate_returns_success_for_valid_config() {
    with_env(&[], || {
        let (_dir, path) = write_config(GRID_TOML);
        let result = validate::run(&invocation(&path));
        assert_eq!(result.exit_code, 0, "expected successful validation");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "validate");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("2 agent(s)"), "unexpected message: {message}");
        assert!(message.contains("2 guardrail(s)"));
    });
}

#[test]
fn validate_reports_every_dangling_reference() {
    with_env(&[], || {
        let broken = GRID_TOML
            .replace("tools = [\"helper\"]", "tools = [\"helper\", \"ghost_tool\"]")
            .replace("model = \"fast\"\n\n[agents.writer]", "model = \"missing\"\n\n[agents.writer]");
        let (_dir, path) = write_config(&broken);
        let result = validate::run(&invocation(&path));
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("ghost_tool"));
        assert!(message.contains("missing"));
    });
}

#[test]
fn validate_reports_missing_config_file_as_parse_failure() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = validate::run(&invocation(&dir.path().join("absent.toml")));
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_parse");
    });
}

#[test]
fn config_attributes_each_setting_to_its_source() {
    with_env(&[("GRID_LOG_LEVEL", "debug"), ("GRID_TEST_API_KEY", "sk-never-printed")], || {
        let (_dir, path) = write_config(GRID_TOML);
        let result = config::run(&invocation(&path));
        assert_eq!(result.exit_code, 0);

        let file_source = format!("(source: file ({}))", path.display());
        assert!(result
            .output
            .contains(&format!("- settings.max_turns = 6 {file_source}")));
        assert!(result
            .output
            .contains("- settings.logging.level = debug (source: env (GRID_LOG_LEVEL))"));
        assert!(result.output.contains("- settings.enforce_guardrails = true (source: default)"));
        assert!(result
            .output
            .contains("- providers.openai.api_key = <set> (source: env (GRID_TEST_API_KEY))"));
        assert!(!result.output.contains("sk-never-printed"), "credential value leaked");
    });
}

#[test]
fn config_attributes_cli_working_directory_override() {
    with_env(&[], || {
        let (dir, path) = write_config(GRID_TOML);
        let mut invocation = invocation(&path);
        invocation.overrides.working_directory = Some(dir.path().join("work"));

        let result = config::run(&invocation);
        let expected = format!(
            "- settings.working_directory = {} (source: cli (--working-dir))",
            dir.path().join("work").display()
        );
        assert!(result.output.contains(&expected), "missing line in:\n{}", result.output);
        assert!(result.output.contains("- providers.openai.api_key = <unset>"));
    });
}

#[test]
fn agents_lists_keys_with_default_marker() {
    with_env(&[], || {
        let (_dir, path) = write_config(GRID_TOML);

        let human = agents::run(&invocation(&path), false);
        assert!(human.output.contains("- writer (default): Writer"));
        assert!(human.output.contains("- helper: Answers follow-up questions"));

        let json = agents::run(&invocation(&path), true);
        let payload = parse_payload(&json.output);
        assert_eq!(payload["default_agent"], "writer");
        assert_eq!(payload["agents"]["helper"], "Answers follow-up questions");
    });
}

#[test]
fn prompt_composes_without_provider_credentials() {
    with_env(&[], || {
        let (dir, path) = write_config(GRID_TOML);
        let mut invocation = invocation(&path);
        invocation.overrides.working_directory = Some(dir.path().to_path_buf());

        let result = prompt::run(&invocation, "writer", Some("notes/todo.md"));
        assert_eq!(result.exit_code, 0, "unexpected failure: {}", result.output);
        assert!(result.output.starts_with("You are a careful grid agent."));
        let expected =
            format!("  Absolute context path: {}", dir.path().join("notes/todo.md").display());
        assert!(result.output.contains(&expected));
    });
}

#[test]
fn prompt_for_unknown_agent_is_not_found() {
    with_env(&[], || {
        let (_dir, path) = write_config(GRID_TOML);
        let result = prompt::run(&invocation(&path), "nobody", None);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "prompt");
        assert_eq!(payload["error_class"], "not_found");
    });
}

#[test]
fn assemble_requires_credentials_unless_previewing() {
    with_env(&[], || {
        let (_dir, path) = write_config(GRID_TOML);

        let strict = assemble::run(&invocation(&path), "writer", false);
        assert_eq!(strict.exit_code, 1);
        let payload = parse_payload(&strict.output);
        assert_eq!(payload["error_class"], "not_found");
        assert!(payload["message"].as_str().unwrap_or("").contains("GRID_TEST_API_KEY"));

        let preview = assemble::run(&invocation(&path), "writer", true);
        assert_eq!(preview.exit_code, 0, "unexpected failure: {}", preview.output);
        let report = parse_payload(&preview.output);
        assert_eq!(report["agent"], "writer");
        assert_eq!(report["model"]["name"], "fast-1");
        assert_eq!(report["model"]["base_url"], "https://api.example.test/v1");
        assert_eq!(report["tools"][0]["name"], "call_helper");
        assert_eq!(report["tools"][0]["kind"], "agent");
        assert_eq!(report["tools"][0]["target"], "helper");
        assert_eq!(report["guardrails"], serde_json::json!(["length", "scrub"]));
    });
}

#[test]
fn doctor_fails_on_missing_credentials_and_passes_once_set() {
    with_env(&[], || {
        let (_dir, path) = write_config(GRID_TOML);
        let result = doctor::run(&invocation(&path), true);
        assert_eq!(result.exit_code, 1);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(check_status(&report, "provider_credentials"), "fail");
        assert_eq!(check_status(&report, "agent_assembly"), "pass");
        assert_eq!(check_status(&report, "guardrail_patterns"), "pass");
        assert_eq!(check_status(&report, "mcp_readiness"), "skipped");
    });

    with_env(&[("GRID_TEST_API_KEY", "sk-test")], || {
        let (_dir, path) = write_config(GRID_TOML);
        let result = doctor::run(&invocation(&path), false);
        assert_eq!(result.exit_code, 0, "unexpected doctor output:\n{}", result.output);
        assert!(result.output.starts_with("doctor: all readiness checks passed"));
        assert!(result.output.contains("- [ok] provider_credentials"));
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_fails() {
    with_env(&[], || {
        let (_dir, path) = write_config("[settings\n");
        let result = doctor::run(&invocation(&path), true);
        assert_eq!(result.exit_code, 1);

        let report = parse_payload(&result.output);
        assert_eq!(check_status(&report, "config_validation"), "fail");
        assert_eq!(check_status(&report, "agent_assembly"), "skipped");
    });
}

fn check_status(report: &Value, name: &str) -> String {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or("<missing>")
        .to_string()
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid json")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|err| err.into_inner());

    let keys = [
        "GRID_TEST_API_KEY",
        "GRID_WORKING_DIRECTORY",
        "GRID_MCP_ENABLED",
        "GRID_AGENT_TIMEOUT_SECS",
        "GRID_LOG_LEVEL",
        "GRID_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
