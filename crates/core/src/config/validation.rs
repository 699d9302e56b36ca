use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use url::Url;

use super::{ConfigModel, ToolKindSpec};
use crate::errors::EntityKind;
use crate::profile::merge_unique;

pub const MAX_AGENT_TOOLS: usize = 50;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    DanglingReference { target: EntityKind, key: String },
    InvalidValue,
    Cycle { path: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationIssue {
    /// Dotted location in the document, e.g. `agents.writer.model`.
    pub location: String,
    pub kind: IssueKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn dangling(location: impl Into<String>, target: EntityKind, key: &str) -> Self {
        Self {
            location: location.into(),
            kind: IssueKind::DanglingReference { target, key: key.to_string() },
            message: format!("unknown {target} `{key}`"),
        }
    }

    pub fn invalid(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self { location: location.into(), kind: IssueKind::InvalidValue, message: message.into() }
    }

    pub fn cycle(path: Vec<String>) -> Self {
        let message = format!("cyclic dependency: {}", path.join(" -> "));
        let location = path.first().cloned().unwrap_or_default();
        Self { location, kind: IssueKind::Cycle { path }, message }
    }

    pub fn is_dangling(&self, target: EntityKind, key: &str) -> bool {
        matches!(
            &self.kind,
            IssueKind::DanglingReference { target: found, key: found_key }
                if *found == target && found_key == key
        )
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Every problem found in one validation pass.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("configuration validation failed with {} issue(s):\n{}", .issues.len(), render_issues(.issues))]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues.iter().map(|issue| format!("  - {issue}")).collect::<Vec<_>>().join("\n")
}

/// Resolves every declared reference and checks field ranges, collecting all
/// failures rather than stopping at the first.
pub fn validate_references(config: &ConfigModel) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    check_settings(config, &mut issues);
    check_providers(config, &mut issues);
    check_models(config, &mut issues);
    check_tools(config, &mut issues);
    check_profiles(config, &mut issues);
    check_agents(config, &mut issues);
    check_guardrails(config, &mut issues);
    issues
}

fn check_settings(config: &ConfigModel, issues: &mut Vec<ValidationIssue>) {
    let settings = config.settings();
    if let Some(default_agent) = settings.default_agent.as_deref() {
        if !config.has_agent(default_agent) {
            issues.push(ValidationIssue::dangling(
                "settings.default_agent",
                EntityKind::Agent,
                default_agent,
            ));
        }
    }
    if settings.agent_timeout_secs == 0 {
        issues.push(ValidationIssue::invalid(
            "settings.agent_timeout_secs",
            "must be greater than zero",
        ));
    }
    if !(1..=100).contains(&settings.max_turns) {
        issues.push(ValidationIssue::invalid("settings.max_turns", "must be between 1 and 100"));
    }
    if settings.max_history == 0 {
        issues.push(ValidationIssue::invalid("settings.max_history", "must be greater than zero"));
    }
    let level = settings.logging.level.trim().to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        issues.push(ValidationIssue::invalid(
            "settings.logging.level",
            "must be one of trace|debug|info|warn|error",
        ));
    }
}

fn check_providers(config: &ConfigModel, issues: &mut Vec<ValidationIssue>) {
    for (key, provider) in config.providers() {
        let location = format!("providers.{key}");
        match Url::parse(&provider.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => issues.push(ValidationIssue::invalid(
                format!("{location}.base_url"),
                format!("scheme `{}` is not http or https", url.scheme()),
            )),
            Err(err) => issues.push(ValidationIssue::invalid(
                format!("{location}.base_url"),
                format!("`{}` is not an absolute URL: {err}", provider.base_url),
            )),
        }

        let env_name = provider.api_key_env.trim();
        if env_name.is_empty() {
            issues.push(ValidationIssue::invalid(format!("{location}.api_key_env"), "is required"));
        } else if env_name != env_name.to_ascii_uppercase() {
            issues.push(ValidationIssue::invalid(
                format!("{location}.api_key_env"),
                format!("`{env_name}` must be upper case"),
            ));
        }

        if !(1..=300).contains(&provider.timeout_secs) {
            issues.push(ValidationIssue::invalid(
                format!("{location}.timeout_secs"),
                "must be in range 1..=300",
            ));
        }
        if provider.max_retries > 10 {
            issues.push(ValidationIssue::invalid(
                format!("{location}.max_retries"),
                "must be in range 0..=10",
            ));
        }
    }
}

fn check_models(config: &ConfigModel, issues: &mut Vec<ValidationIssue>) {
    for (key, model) in config.models() {
        let location = format!("models.{key}");
        if !config.providers().contains_key(&model.provider) {
            issues.push(ValidationIssue::dangling(
                format!("{location}.provider"),
                EntityKind::Provider,
                &model.provider,
            ));
        }

        if !(0.0..=2.0).contains(&model.temperature) {
            issues.push(ValidationIssue::invalid(
                format!("{location}.temperature"),
                "must be in range 0..=2",
            ));
        }
        if !(1..=200_000).contains(&model.max_tokens) {
            issues.push(ValidationIssue::invalid(
                format!("{location}.max_tokens"),
                "must be in range 1..=200000",
            ));
        }
        if let Some(window) = model.context_window {
            if model.max_tokens > window {
                issues.push(ValidationIssue::invalid(
                    format!("{location}.max_tokens"),
                    format!("{} exceeds context_window {window}", model.max_tokens),
                ));
            }
        }
        if let Some(top_p) = model.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                issues.push(ValidationIssue::invalid(
                    format!("{location}.top_p"),
                    "must be in range 0..=1",
                ));
            }
        }
        for (field, value) in [
            ("frequency_penalty", model.frequency_penalty),
            ("presence_penalty", model.presence_penalty),
        ] {
            if let Some(value) = value {
                if !(-2.0..=2.0).contains(&value) {
                    issues.push(ValidationIssue::invalid(
                        format!("{location}.{field}"),
                        "must be in range -2..=2",
                    ));
                }
            }
        }
    }
}

fn check_tools(config: &ConfigModel, issues: &mut Vec<ValidationIssue>) {
    for (key, tool) in config.tools() {
        let location = format!("tools.{key}");
        for dependency in &tool.dependencies {
            if !config.has_tool(dependency) {
                issues.push(ValidationIssue::dangling(
                    format!("{location}.dependencies"),
                    EntityKind::Tool,
                    dependency,
                ));
            }
        }

        match &tool.kind {
            ToolKindSpec::Agent { agent, .. } => {
                if !config.has_agent(agent) {
                    issues.push(ValidationIssue::dangling(
                        format!("{location}.agent_key"),
                        EntityKind::Agent,
                        agent,
                    ));
                }
            }
            ToolKindSpec::Composite { chain } => {
                for step in chain {
                    if !config.has_tool(step) {
                        issues.push(ValidationIssue::dangling(
                            format!("{location}.tool_chain"),
                            EntityKind::Tool,
                            step,
                        ));
                    }
                }
            }
            ToolKindSpec::Function { .. } | ToolKindSpec::Mcp { .. } => {}
        }
    }
}

fn check_profiles(config: &ConfigModel, issues: &mut Vec<ValidationIssue>) {
    for (key, profile) in config.profiles() {
        let location = format!("agent_profiles.{key}");
        if profile.capabilities.iter().all(|capability| capability.is_empty()) {
            issues.push(ValidationIssue::invalid(
                format!("{location}.capabilities"),
                "at least one capability is required",
            ));
        }
        for tool in &profile.tools {
            if !config.has_tool(tool) && !config.has_agent(tool) {
                issues.push(ValidationIssue::dangling(
                    format!("{location}.tools"),
                    EntityKind::Tool,
                    tool,
                ));
            }
        }
        for guardrail in &profile.guardrails {
            if !config.guardrails().contains_key(guardrail) {
                issues.push(ValidationIssue::dangling(
                    format!("{location}.guardrails"),
                    EntityKind::Guardrail,
                    guardrail,
                ));
            }
        }
        if let Some(limit) = profile.max_tools_per_turn {
            if !(1..=20).contains(&limit) {
                issues.push(ValidationIssue::invalid(
                    format!("{location}.max_tools_per_turn"),
                    "must be in range 1..=20",
                ));
            }
        }
    }
}

fn check_agents(config: &ConfigModel, issues: &mut Vec<ValidationIssue>) {
    for (key, agent) in config.agents() {
        let location = format!("agents.{key}");

        let valid_name = agent
            .name
            .chars()
            .all(|ch| ch.is_alphanumeric() || matches!(ch, ' ' | '_' | '-'));
        if !valid_name {
            issues.push(ValidationIssue::invalid(
                format!("{location}.name"),
                "may only contain letters, digits, spaces, `_` and `-`",
            ));
        }

        if !config.models().contains_key(&agent.model) {
            issues.push(ValidationIssue::dangling(
                format!("{location}.model"),
                EntityKind::Model,
                &agent.model,
            ));
        }

        if agent.tools.len() > MAX_AGENT_TOOLS {
            issues.push(ValidationIssue::invalid(
                format!("{location}.tools"),
                format!("declares {} tools, at most {MAX_AGENT_TOOLS} allowed", agent.tools.len()),
            ));
        }
        for tool in &agent.tools {
            if !config.has_tool(tool) && !config.has_agent(tool) {
                issues.push(ValidationIssue::dangling(
                    format!("{location}.tools"),
                    EntityKind::Tool,
                    tool,
                ));
            }
        }

        if let Some(profile) = agent.profile.as_deref() {
            if !config.profiles().contains_key(profile) {
                issues.push(ValidationIssue::dangling(
                    format!("{location}.profile"),
                    EntityKind::Profile,
                    profile,
                ));
            }
        }

        for guardrail in &agent.guardrails {
            if !config.guardrails().contains_key(guardrail) {
                issues.push(ValidationIssue::dangling(
                    format!("{location}.guardrails"),
                    EntityKind::Guardrail,
                    guardrail,
                ));
            }
        }

        let has_custom_prompt =
            agent.custom_prompt.as_deref().is_some_and(|prompt| !prompt.trim().is_empty());
        if !has_custom_prompt && !config.prompt_templates().contains_key(&agent.base_prompt) {
            issues.push(ValidationIssue::dangling(
                format!("{location}.base_prompt"),
                EntityKind::PromptTemplate,
                &agent.base_prompt,
            ));
        }

        if let Some(limit) = agent.max_tools_per_turn {
            if !(1..=20).contains(&limit) {
                issues.push(ValidationIssue::invalid(
                    format!("{location}.max_tools_per_turn"),
                    "must be in range 1..=20",
                ));
            }
        }
        if let Some(timeout) = agent.timeout_secs {
            if !(1..=600).contains(&timeout) {
                issues.push(ValidationIssue::invalid(
                    format!("{location}.timeout_secs"),
                    "must be in range 1..=600",
                ));
            }
        }
        if let Some(depth) = agent.context_depth {
            if !(1..=100).contains(&depth) {
                issues.push(ValidationIssue::invalid(
                    format!("{location}.context_depth"),
                    "must be in range 1..=100",
                ));
            }
        }
    }
}

fn check_guardrails(config: &ConfigModel, issues: &mut Vec<ValidationIssue>) {
    for (key, guardrail) in config.guardrails() {
        if let Some(verifier) = guardrail.verifier_agent() {
            if !config.has_agent(verifier) {
                issues.push(ValidationIssue::dangling(
                    format!("guardrails.{key}.parameters.verifier_agent"),
                    EntityKind::Agent,
                    verifier,
                ));
            }
        } else if guardrail.kind == super::GuardrailType::Hallucination {
            issues.push(ValidationIssue::invalid(
                format!("guardrails.{key}.parameters.verifier_agent"),
                "hallucination guardrails must name a verifier agent",
            ));
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum NodeKind {
    Agent,
    Tool,
}

type Node<'a> = (NodeKind, &'a str);

/// Edges that nest one callable inside another: an agent to each of its
/// effective tools, an agent tool to its target, a composite to its steps.
fn dependency_edges(config: &ConfigModel) -> BTreeMap<Node<'_>, Vec<Node<'_>>> {
    let mut adjacency: BTreeMap<Node<'_>, Vec<Node<'_>>> = BTreeMap::new();

    for (key, agent) in config.agents() {
        let profile_tools = agent
            .profile
            .as_deref()
            .and_then(|profile| config.profiles().get(profile))
            .map(|profile| profile.tools.as_slice())
            .unwrap_or_default();
        let effective_tools = merge_unique(profile_tools, &agent.tools);

        let targets = effective_tools
            .iter()
            .filter_map(|tool| {
                if let Some((tool_key, _)) = config.tools().get_key_value(tool.as_str()) {
                    Some((NodeKind::Tool, tool_key.as_str()))
                } else {
                    config
                        .agents()
                        .get_key_value(tool.as_str())
                        .map(|(agent_key, _)| (NodeKind::Agent, agent_key.as_str()))
                }
            })
            .collect();
        adjacency.insert((NodeKind::Agent, key.as_str()), targets);
    }

    for (key, tool) in config.tools() {
        let targets = match &tool.kind {
            ToolKindSpec::Agent { agent, .. } => config
                .agents()
                .get_key_value(agent.as_str())
                .map(|(agent_key, _)| vec![(NodeKind::Agent, agent_key.as_str())])
                .unwrap_or_default(),
            ToolKindSpec::Composite { chain } => chain
                .iter()
                .filter_map(|step| config.tools().get_key_value(step.as_str()))
                .map(|(step_key, _)| (NodeKind::Tool, step_key.as_str()))
                .collect(),
            ToolKindSpec::Function { .. } | ToolKindSpec::Mcp { .. } => Vec::new(),
        };
        adjacency.insert((NodeKind::Tool, key.as_str()), targets);
    }

    adjacency
}

struct CycleSearch<'g, 'a> {
    adjacency: &'g BTreeMap<Node<'a>, Vec<Node<'a>>>,
    visiting: BTreeSet<Node<'a>>,
    finished: BTreeSet<Node<'a>>,
    path: Vec<Node<'a>>,
    cycles: Vec<Vec<String>>,
}

impl<'g, 'a> CycleSearch<'g, 'a> {
    fn visit(&mut self, node: Node<'a>) {
        if self.finished.contains(&node) {
            return;
        }
        if self.visiting.contains(&node) {
            let start = self.path.iter().position(|entry| *entry == node).unwrap_or(0);
            let mut cycle =
                self.path[start..].iter().map(|(_, key)| key.to_string()).collect::<Vec<_>>();
            cycle.push(node.1.to_string());
            self.cycles.push(cycle);
            return;
        }

        self.visiting.insert(node);
        self.path.push(node);
        let adjacency = self.adjacency;
        for next in adjacency.get(&node).into_iter().flatten() {
            self.visit(*next);
        }
        self.path.pop();
        self.visiting.remove(&node);
        self.finished.insert(node);
    }
}

/// Depth-first search over nesting edges; each back edge yields the full
/// cycle, starting and ending at the repeated node.
pub fn detect_cycles(config: &ConfigModel) -> Vec<Vec<String>> {
    let adjacency = dependency_edges(config);
    let mut search = CycleSearch {
        adjacency: &adjacency,
        visiting: BTreeSet::new(),
        finished: BTreeSet::new(),
        path: Vec::new(),
        cycles: Vec::new(),
    };
    for node in adjacency.keys() {
        search.visit(*node);
    }
    search.cycles
}

#[cfg(test)]
mod tests {
    use super::{IssueKind, ValidationReport};
    use crate::config::{ConfigModel, DocumentFormat};
    use crate::errors::{EntityKind, GridError};

    const BASE: &str = r#"
[providers.p]
base_url = "https://x/"
api_key_env = "X_KEY"

[models.m]
provider = "p"

[prompt_templates]
base = "You are a helpful agent."
"#;

    fn parse(extra: &str) -> Result<ConfigModel, GridError> {
        ConfigModel::parse(&format!("{BASE}\n{extra}"), DocumentFormat::Toml)
    }

    fn report(result: Result<ConfigModel, GridError>) -> ValidationReport {
        match result {
            Err(GridError::ConfigValidation(report)) => report,
            Err(other) => panic!("expected validation report, got {other}"),
            Ok(_) => panic!("expected validation failure"),
        }
    }

    #[test]
    fn all_dangling_references_are_listed_in_one_pass() {
        let report = report(parse(
            r#"
[models.orphan]
provider = "nowhere"

[tools.delegate]
type = "agent"
agent_key = "ghost_agent"

[agents.a]
model = "missing_model"
tools = ["missing_tool"]
profile = "missing_profile"
guardrails = ["missing_guard"]
"#,
        ));

        assert!(report.issues.iter().any(|i| i.is_dangling(EntityKind::Provider, "nowhere")));
        assert!(report.issues.iter().any(|i| i.is_dangling(EntityKind::Agent, "ghost_agent")));
        assert!(report.issues.iter().any(|i| i.is_dangling(EntityKind::Model, "missing_model")));
        assert!(report.issues.iter().any(|i| i.is_dangling(EntityKind::Tool, "missing_tool")));
        assert!(report
            .issues
            .iter()
            .any(|i| i.is_dangling(EntityKind::Profile, "missing_profile")));
        assert!(report
            .issues
            .iter()
            .any(|i| i.is_dangling(EntityKind::Guardrail, "missing_guard")));
        assert_eq!(report.len(), 6);
    }

    #[test]
    fn composite_cycle_is_rejected_at_load_with_full_path() {
        let result = parse(
            r#"
[tools.a]
type = "composite"
tool_chain = ["b", "leaf"]

[tools.b]
type = "composite"
tool_chain = ["leaf", "a"]

[tools.leaf]
type = "function"
function_name = "leaf"
"#,
        );

        match result {
            Err(GridError::CyclicDependency { path }) => {
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn agent_tool_cycle_through_two_agents_is_rejected() {
        let result = parse(
            r#"
[tools.call_b]
type = "agent"
agent_key = "b"

[agents.a]
model = "m"
tools = ["call_b"]

[agents.b]
model = "m"
tools = ["a"]
"#,
        );

        match result {
            Err(GridError::CyclicDependency { path }) => {
                assert_eq!(path.first(), path.last());
                for node in ["a", "call_b", "b"] {
                    assert!(path.iter().any(|entry| entry == node), "missing {node} in {path:?}");
                }
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn cycles_are_aggregated_with_other_issues() {
        let report = report(parse(
            r#"
[tools.loop_a]
type = "composite"
tool_chain = ["loop_b", "loop_b"]

[tools.loop_b]
type = "composite"
tool_chain = ["loop_a", "loop_a"]

[agents.a]
model = "nope"
"#,
        ));

        assert!(report.issues.iter().any(|issue| matches!(issue.kind, IssueKind::Cycle { .. })));
        assert!(report.issues.iter().any(|issue| issue.is_dangling(EntityKind::Model, "nope")));
    }

    #[test]
    fn variant_fields_and_ranges_are_checked() {
        let report = report(parse(
            r#"
[providers.bad]
base_url = "not a url"
api_key_env = "lower_key"
timeout_secs = 0

[models.hot]
provider = "p"
temperature = 3.5
max_tokens = 9000
context_window = 8000

[tools.fn_without_name]
type = "function"

[tools.short_chain]
type = "composite"
tool_chain = ["fn_without_name"]

[agents.a]
name = "bad/name"
model = "m"
max_tools_per_turn = 50
"#,
        ));

        let locations =
            report.issues.iter().map(|issue| issue.location.as_str()).collect::<Vec<_>>();
        for expected in [
            "providers.bad.base_url",
            "providers.bad.api_key_env",
            "providers.bad.timeout_secs",
            "models.hot.temperature",
            "models.hot.max_tokens",
            "tools.fn_without_name",
            "tools.short_chain",
            "agents.a.name",
            "agents.a.max_tools_per_turn",
        ] {
            assert!(locations.contains(&expected), "missing issue at {expected}: {locations:?}");
        }
    }

    #[test]
    fn missing_prompt_template_is_reported_unless_custom_prompt_set() {
        let report = report(parse(
            r#"
[agents.templated]
model = "m"
base_prompt = "absent"

[agents.custom]
model = "m"
base_prompt = "absent"
custom_prompt = "Do the thing."

[agents.blank]
model = "m"
base_prompt = "absent"
custom_prompt = "   "
"#,
        ));

        let locations =
            report.issues.iter().map(|issue| issue.location.as_str()).collect::<Vec<_>>();
        assert_eq!(locations, vec!["agents.blank.base_prompt", "agents.templated.base_prompt"]);
    }

    #[test]
    fn malformed_tool_is_reported_once_without_dangling_references() {
        let report = report(parse(
            r#"
[agent_profiles.worker]
capabilities = ["read"]
tools = ["lookup"]

[tools.lookup]
type = "function"

[tools.pipeline]
type = "composite"
tool_chain = ["lookup", "lookup"]

[agents.a]
model = "m"
tools = ["lookup"]
"#,
        ));

        assert_eq!(report.len(), 1, "unexpected issues: {report}");
        assert_eq!(report.issues[0].location, "tools.lookup");
        assert_eq!(report.issues[0].kind, IssueKind::InvalidValue);
        assert!(!report.issues.iter().any(|issue| issue.is_dangling(EntityKind::Tool, "lookup")));
    }
}
