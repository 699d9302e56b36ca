use std::collections::HashSet;

use serde::Serialize;

use crate::config::{AgentSpec, ConfigModel, ContextStrategy};
use crate::errors::GridError;

pub const DEFAULT_MAX_TOOLS_PER_TURN: u32 = 3;
pub const DEFAULT_CONTEXT_DEPTH: u32 = 10;

/// An agent with its profile folded in. Recomputed on every assembly.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EffectiveAgentConfig {
    pub agent_key: String,
    pub name: String,
    pub description: Option<String>,
    pub model: String,
    pub profile: Option<String>,
    pub capabilities: Vec<String>,
    pub tools: Vec<String>,
    pub guardrails: Vec<String>,
    pub max_tools_per_turn: u32,
    pub context_strategy: ContextStrategy,
    pub context_depth: u32,
    pub base_instructions: String,
    pub base_prompt: String,
    pub custom_prompt: Option<String>,
    pub timeout_secs: u64,
    pub mcp_enabled: bool,
    pub streaming_enabled: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ProfileResolver;

impl ProfileResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(
        &self,
        agent_key: &str,
        config: &ConfigModel,
    ) -> Result<EffectiveAgentConfig, GridError> {
        let agent = config.get_agent(agent_key)?;
        self.resolve_spec(agent_key, agent, config)
    }

    /// Lists are unioned profile-first; scalars take the agent's value, then
    /// the profile's, then the system default.
    pub fn resolve_spec(
        &self,
        agent_key: &str,
        agent: &AgentSpec,
        config: &ConfigModel,
    ) -> Result<EffectiveAgentConfig, GridError> {
        let settings = config.settings();
        let mut effective = EffectiveAgentConfig {
            agent_key: agent_key.to_string(),
            name: agent.name.clone(),
            description: agent.description.clone(),
            model: agent.model.clone(),
            profile: None,
            capabilities: Vec::new(),
            tools: agent.tools.clone(),
            guardrails: agent.guardrails.clone(),
            max_tools_per_turn: agent.max_tools_per_turn.unwrap_or(DEFAULT_MAX_TOOLS_PER_TURN),
            context_strategy: agent.context_strategy.unwrap_or_default(),
            context_depth: agent.context_depth.unwrap_or(DEFAULT_CONTEXT_DEPTH),
            base_instructions: agent.base_instructions.clone().unwrap_or_default(),
            base_prompt: agent.base_prompt.clone(),
            custom_prompt: agent.custom_prompt.clone(),
            timeout_secs: agent.timeout_secs.unwrap_or(settings.agent_timeout_secs),
            mcp_enabled: settings.mcp_enabled || agent.mcp_enabled.unwrap_or(false),
            streaming_enabled: agent.streaming_enabled,
        };

        let Some(profile_key) = agent.profile.as_deref() else {
            return Ok(effective);
        };
        let profile = config.get_profile(profile_key)?;

        let missing = agent
            .required_capabilities
            .iter()
            .map(|capability| capability.trim().to_lowercase())
            .filter(|capability| !profile.capabilities.contains(capability))
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(GridError::IncompatibleProfile {
                agent: agent_key.to_string(),
                profile: profile_key.to_string(),
                missing,
            });
        }

        effective.profile = Some(profile_key.to_string());
        effective.capabilities = profile.capabilities.clone();
        effective.tools = merge_unique(&profile.tools, &agent.tools);
        effective.guardrails = merge_unique(&profile.guardrails, &agent.guardrails);
        effective.max_tools_per_turn = agent
            .max_tools_per_turn
            .or(profile.max_tools_per_turn)
            .unwrap_or(DEFAULT_MAX_TOOLS_PER_TURN);
        effective.context_strategy =
            agent.context_strategy.or(profile.context_strategy).unwrap_or_default();
        effective.base_instructions = agent
            .base_instructions
            .clone()
            .or_else(|| profile.base_instructions.clone())
            .unwrap_or_default();

        tracing::debug!(
            event_name = "profile.resolve.applied",
            agent = agent_key,
            profile = profile_key,
            tool_count = effective.tools.len(),
            "profile merged into agent"
        );
        Ok(effective)
    }
}

/// Union of both lists keeping first-seen order and dropping repeats.
pub fn merge_unique(first: &[String], second: &[String]) -> Vec<String> {
    let mut seen: HashSet<&String> = HashSet::new();
    first
        .iter()
        .chain(second)
        .filter(|entry| seen.insert(*entry))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{merge_unique, ProfileResolver, DEFAULT_MAX_TOOLS_PER_TURN};
    use crate::config::{ConfigModel, ContextStrategy, DocumentFormat};
    use crate::errors::GridError;

    const DOC: &str = r#"
[settings]
agent_timeout_secs = 120

[providers.p]
base_url = "https://x"
api_key_env = "X_KEY"

[models.m]
provider = "p"

[prompt_templates]
base = "Base."

[tools.a]
type = "function"
function_name = "a"

[tools.b]
type = "function"
function_name = "b"

[tools.c]
type = "function"
function_name = "c"

[guardrails.input]
type = "input_validation"

[guardrails.paths]
type = "path_safety"

[agent_profiles.worker]
capabilities = ["Read", "write"]
tools = ["a", "b"]
guardrails = ["input"]
max_tools_per_turn = 5
context_strategy = "full"
base_instructions = "Work carefully."

[agent_profiles.files]
template = "file_operations"
capabilities = ["Archive", "read"]

[agent_profiles.reviewer]
template = "security"
base_instructions = "Review every diff."

[agents.merged]
model = "m"
profile = "worker"
tools = ["b", "c"]
guardrails = ["paths", "input"]
required_capabilities = ["read"]

[agents.override]
model = "m"
profile = "worker"
max_tools_per_turn = 2
base_instructions = "Agent says hi."

[agents.plain]
model = "m"
tools = ["c", "a", "c"]
timeout_secs = 30

[agents.archiver]
model = "m"
profile = "files"
required_capabilities = ["edit", "archive"]

[agents.auditor]
model = "m"
profile = "reviewer"

[agents.demanding]
model = "m"
profile = "worker"
required_capabilities = ["deploy", "READ"]
"#;

    fn config() -> ConfigModel {
        ConfigModel::parse(DOC, DocumentFormat::Toml).expect("fixture config parses")
    }

    #[test]
    fn union_keeps_profile_first_order_without_duplicates() {
        let effective = ProfileResolver::new().resolve("merged", &config()).expect("resolves");

        assert_eq!(effective.tools, vec!["a", "b", "c"]);
        assert_eq!(effective.guardrails, vec!["input", "paths"]);
        assert_eq!(effective.capabilities, vec!["read", "write"]);
    }

    #[test]
    fn scalars_prefer_agent_then_profile_then_default() {
        let config = config();
        let resolver = ProfileResolver::new();

        let inherited = resolver.resolve("merged", &config).expect("resolves");
        assert_eq!(inherited.max_tools_per_turn, 5);
        assert_eq!(inherited.context_strategy, ContextStrategy::Full);
        assert_eq!(inherited.base_instructions, "Work carefully.");

        let overridden = resolver.resolve("override", &config).expect("resolves");
        assert_eq!(overridden.max_tools_per_turn, 2);
        assert_eq!(overridden.context_strategy, ContextStrategy::Full);
        assert_eq!(overridden.base_instructions, "Agent says hi.");
    }

    #[test]
    fn no_profile_is_identity_over_agent_fields() {
        let effective = ProfileResolver::new().resolve("plain", &config()).expect("resolves");

        assert_eq!(effective.profile, None);
        assert_eq!(effective.tools, vec!["c", "a", "c"]);
        assert_eq!(effective.max_tools_per_turn, DEFAULT_MAX_TOOLS_PER_TURN);
        assert_eq!(effective.context_strategy, ContextStrategy::Conversation);
        assert_eq!(effective.base_instructions, "");
        assert_eq!(effective.timeout_secs, 30);
    }

    #[test]
    fn template_seeds_capabilities_and_instructions() {
        let config = config();
        let resolver = ProfileResolver::new();

        let archiver = resolver.resolve("archiver", &config).expect("template capability satisfies");
        assert_eq!(archiver.capabilities, vec!["read", "write", "search", "edit", "archive"]);
        assert!(archiver.base_instructions.starts_with("You are a specialized file operations"));

        let auditor = resolver.resolve("auditor", &config).expect("template alone is enough");
        assert_eq!(
            auditor.capabilities,
            vec!["security_analysis", "threat_detection", "compliance_check"]
        );
        assert_eq!(auditor.base_instructions, "Review every diff.");
    }

    #[test]
    fn timeout_falls_back_to_settings() {
        let effective = ProfileResolver::new().resolve("merged", &config()).expect("resolves");
        assert_eq!(effective.timeout_secs, 120);
    }

    #[test]
    fn missing_capabilities_are_rejected() {
        let error = ProfileResolver::new().resolve("demanding", &config());

        assert!(matches!(
            error,
            Err(GridError::IncompatibleProfile { ref agent, ref profile, ref missing })
                if agent == "demanding" && profile == "worker" && missing == &vec!["deploy".to_string()]
        ));
    }

    #[test]
    fn merge_unique_is_a_set_union_in_first_seen_order() {
        let first = vec!["A".to_string(), "B".to_string()];
        let second = vec!["B".to_string(), "C".to_string()];
        assert_eq!(merge_unique(&first, &second), vec!["A", "B", "C"]);
        assert_eq!(merge_unique(&[], &second), vec!["B", "C"]);
    }
}
