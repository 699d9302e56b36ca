use std::env;
use std::sync::Arc;

use grid_agent::guardrails::GuardrailPipeline;
use grid_core::{AgentAssembler, ConfigModel, ToolType};
use serde::Serialize;

use super::prompt::PreviewCredentials;
use super::{CommandResult, Invocation, EXIT_RUNTIME_FAILURE};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["provider_credentials", "agent_assembly", "guardrail_patterns", "mcp_readiness"];

pub fn run(invocation: &Invocation, json_output: bool) -> CommandResult {
    let report = build_report(invocation);
    let exit_code = if report.overall_status == CheckStatus::Fail { EXIT_RUNTIME_FAILURE } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };
    CommandResult { exit_code, output }
}

fn build_report(invocation: &Invocation) -> DoctorReport {
    let mut checks = Vec::new();

    match invocation.load() {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            let config = Arc::new(config);
            checks.push(check_credentials(&config));
            checks.extend(check_agents(Arc::clone(&config)));
            checks.push(check_mcp(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in DEPENDENT_CHECKS {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_credentials(config: &ConfigModel) -> DoctorCheck {
    let missing: Vec<String> = config
        .providers()
        .iter()
        .filter(|(_, provider)| {
            env::var(&provider.api_key_env).map_or(true, |value| value.trim().is_empty())
        })
        .map(|(key, provider)| format!("{key} ({})", provider.api_key_env))
        .collect();

    if missing.is_empty() {
        DoctorCheck::new(
            "provider_credentials",
            CheckStatus::Pass,
            format!("{} provider credential(s) present", config.providers().len()),
        )
    } else {
        DoctorCheck::new(
            "provider_credentials",
            CheckStatus::Fail,
            format!("missing credentials for {}", missing.join(", ")),
        )
    }
}

/// Assembles every agent with placeholder credentials, then compiles each
/// agent's guardrail pipeline.
fn check_agents(config: Arc<ConfigModel>) -> [DoctorCheck; 2] {
    let assembler = AgentAssembler::with_credentials(Arc::clone(&config), Arc::new(PreviewCredentials));
    let mut assembly_failures = Vec::new();
    let mut guardrail_failures = Vec::new();
    let mut guardrails_checked = 0usize;

    for key in config.agents().keys() {
        match assembler.assemble(key, None) {
            Ok(agent) => {
                match GuardrailPipeline::for_agent(&agent, config.settings()) {
                    Ok(pipeline) => guardrails_checked += pipeline.len(),
                    Err(error) => guardrail_failures.push(format!("{key}: {error}")),
                }
            }
            Err(error) => assembly_failures.push(format!("{key}: {error}")),
        }
    }

    let assembly = if assembly_failures.is_empty() {
        DoctorCheck::new(
            "agent_assembly",
            CheckStatus::Pass,
            format!("{} agent(s) assembled", config.agents().len()),
        )
    } else {
        DoctorCheck::new("agent_assembly", CheckStatus::Fail, assembly_failures.join("; "))
    };
    let guardrails = if !guardrail_failures.is_empty() {
        DoctorCheck::new("guardrail_patterns", CheckStatus::Fail, guardrail_failures.join("; "))
    } else if guardrails_checked == 0 {
        DoctorCheck::new("guardrail_patterns", CheckStatus::Skipped, "no guardrails attached")
    } else {
        DoctorCheck::new(
            "guardrail_patterns",
            CheckStatus::Pass,
            format!("{guardrails_checked} guardrail attachment(s) compiled"),
        )
    };
    [assembly, guardrails]
}

fn check_mcp(config: &ConfigModel) -> DoctorCheck {
    let mcp_tools =
        config.tools().values().filter(|tool| tool.kind.tool_type() == ToolType::Mcp).count();

    if mcp_tools == 0 {
        DoctorCheck::new("mcp_readiness", CheckStatus::Skipped, "no MCP tools declared")
    } else if config.settings().mcp_enabled {
        DoctorCheck::new(
            "mcp_readiness",
            CheckStatus::Pass,
            format!("{mcp_tools} MCP tool(s) declared with MCP enabled"),
        )
    } else {
        DoctorCheck::new(
            "mcp_readiness",
            CheckStatus::Skipped,
            format!("{mcp_tools} MCP tool(s) declared but MCP is disabled"),
        )
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
