//! Serde shapes of the configuration document.
//!
//! Every section rejects unknown keys. Tools are read through a flat
//! [`ToolDocument`] and converted into the tagged [`ToolSpec`] while the
//! model is built, so variant-specific omissions are reported together with
//! every other validation issue instead of aborting the parse.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::LoggingPatch;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    #[serde(default)]
    pub settings: SettingsPatch,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSpec>,
    #[serde(default)]
    pub models: BTreeMap<String, ModelSpec>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolDocument>,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentSpec>,
    #[serde(default)]
    pub agent_profiles: BTreeMap<String, ProfileSpec>,
    #[serde(default)]
    pub guardrails: BTreeMap<String, GuardrailSpec>,
    #[serde(default)]
    pub prompt_templates: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    pub default_agent: Option<String>,
    pub max_history: Option<usize>,
    pub max_turns: Option<u32>,
    #[serde(alias = "agent_timeout")]
    pub agent_timeout_secs: Option<u64>,
    pub working_directory: Option<String>,
    pub config_directory: Option<String>,
    pub allow_path_override: Option<bool>,
    pub mcp_enabled: Option<bool>,
    pub enforce_guardrails: Option<bool>,
    pub tools_common_rules: Option<String>,
    pub logging: Option<LoggingPatch>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    #[serde(alias = "openai")]
    OpenAi,
    Anthropic,
    #[serde(alias = "lmstudio")]
    LmStudio,
    #[serde(alias = "openrouter")]
    OpenRouter,
    #[default]
    Custom,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "type")]
    pub provider_type: ProviderType,
    pub base_url: String,
    pub api_key_env: String,
    #[serde(default = "default_provider_timeout", alias = "timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    /// Identifier sent to the provider; defaults to the model key.
    #[serde(default)]
    pub name: String,
    pub provider: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub context_window: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub use_responses_api: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    Minimal,
    #[default]
    Conversation,
    Full,
}

impl ContextStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Conversation => "conversation",
            Self::Full => "full",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    Function,
    Agent,
    Mcp,
    Composite,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDocument {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub prompt_addition: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub agent_key: Option<String>,
    #[serde(default)]
    pub context_strategy: Option<ContextStrategy>,
    #[serde(default)]
    pub context_depth: Option<u32>,
    #[serde(default)]
    pub include_tool_history: Option<bool>,
    #[serde(default)]
    pub server_command: Option<Vec<String>>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub tool_chain: Vec<String>,
}

/// How much of the caller's conversation an agent-as-tool receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ContextSharing {
    pub strategy: ContextStrategy,
    pub depth: u32,
    pub include_tool_history: bool,
}

impl Default for ContextSharing {
    fn default() -> Self {
        Self {
            strategy: ContextStrategy::Conversation,
            depth: DEFAULT_TOOL_CONTEXT_DEPTH,
            include_tool_history: true,
        }
    }
}

pub const DEFAULT_TOOL_CONTEXT_DEPTH: u32 = 5;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub key: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    pub prompt_addition: Option<String>,
    pub kind: ToolKindSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolKindSpec {
    Function { callable: String, parameters: Option<Value> },
    Agent { agent: String, sharing: ContextSharing },
    Mcp { command: Vec<String>, env: BTreeMap<String, String> },
    Composite { chain: Vec<String> },
}

impl ToolKindSpec {
    pub fn tool_type(&self) -> ToolType {
        match self {
            Self::Function { .. } => ToolType::Function,
            Self::Agent { .. } => ToolType::Agent,
            Self::Mcp { .. } => ToolType::Mcp,
            Self::Composite { .. } => ToolType::Composite,
        }
    }
}

impl ToolDocument {
    /// Converts into a typed spec, or the list of problems preventing it.
    pub fn into_spec(self, key: &str) -> Result<ToolSpec, Vec<String>> {
        let mut problems = Vec::new();

        let kind = match self.tool_type {
            ToolType::Function => match self.function_name.filter(|name| !name.trim().is_empty()) {
                Some(callable) => {
                    Some(ToolKindSpec::Function { callable, parameters: self.parameters })
                }
                None => {
                    problems.push("function tools require `function_name`".to_string());
                    None
                }
            },
            ToolType::Agent => match self.agent_key.filter(|agent| !agent.trim().is_empty()) {
                Some(agent) => Some(ToolKindSpec::Agent {
                    agent,
                    sharing: ContextSharing {
                        strategy: self.context_strategy.unwrap_or_default(),
                        depth: self.context_depth.unwrap_or(DEFAULT_TOOL_CONTEXT_DEPTH),
                        include_tool_history: self.include_tool_history.unwrap_or(true),
                    },
                }),
                None => {
                    problems.push("agent tools require `agent_key`".to_string());
                    None
                }
            },
            ToolType::Mcp => match self.server_command.filter(|command| !command.is_empty()) {
                Some(command) => Some(ToolKindSpec::Mcp { command, env: self.env_vars }),
                None => {
                    problems.push("mcp tools require a non-empty `server_command`".to_string());
                    None
                }
            },
            ToolType::Composite => {
                if self.tool_chain.len() < 2 {
                    problems.push(format!(
                        "composite tools require at least 2 `tool_chain` entries, found {}",
                        self.tool_chain.len()
                    ));
                    None
                } else {
                    Some(ToolKindSpec::Composite { chain: self.tool_chain })
                }
            }
        };

        if let Some(depth) = self.context_depth {
            if !(1..=50).contains(&depth) {
                problems.push(format!("context_depth must be in range 1..=50, found {depth}"));
            }
        }

        match kind {
            Some(kind) if problems.is_empty() => Ok(ToolSpec {
                key: key.to_string(),
                name: non_empty_or(self.name, key),
                description: self.description,
                category: self
                    .category
                    .filter(|category| !category.trim().is_empty())
                    .unwrap_or_else(|| "general".to_string()),
                tags: self.tags,
                dependencies: self.dependencies,
                prompt_addition: self.prompt_addition,
                kind,
            }),
            _ => Err(problems),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    #[serde(default)]
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_base_prompt")]
    pub base_prompt: String,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub guardrails: Vec<String>,
    #[serde(default)]
    pub max_tools_per_turn: Option<u32>,
    #[serde(default, alias = "timeout")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub context_strategy: Option<ContextStrategy>,
    #[serde(default)]
    pub context_depth: Option<u32>,
    #[serde(default)]
    pub base_instructions: Option<String>,
    #[serde(default)]
    pub mcp_enabled: Option<bool>,
    #[serde(default = "default_true")]
    pub streaming_enabled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileTemplate {
    FileOperations,
    Development,
    Analysis,
    Coordination,
    Security,
}

impl ProfileTemplate {
    /// Capabilities a profile built on this template starts with.
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            Self::FileOperations => &["read", "write", "search", "edit"],
            Self::Development => &["code_analysis", "git_operations", "testing", "documentation"],
            Self::Analysis => &["data_processing", "visualization", "reporting"],
            Self::Coordination => {
                &["task_delegation", "workflow_management", "agent_orchestration"]
            }
            Self::Security => &["security_analysis", "threat_detection", "compliance_check"],
        }
    }

    pub fn base_instructions(&self) -> &'static str {
        match self {
            Self::FileOperations => {
                "You are a specialized file operations assistant. Focus on efficient and safe file management."
            }
            Self::Development => {
                "You are a development assistant specializing in code analysis, testing, and version control."
            }
            Self::Analysis => {
                "You are a data analysis specialist focused on processing and visualizing data insights."
            }
            Self::Coordination => {
                "You are a task coordinator responsible for delegating work to specialized agents."
            }
            Self::Security => {
                "You are a security specialist focused on identifying and mitigating security risks."
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileSpec {
    #[serde(default)]
    pub name: String,
    /// Seeds capabilities and base instructions; declared values win.
    #[serde(default)]
    pub template: Option<ProfileTemplate>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub guardrails: Vec<String>,
    #[serde(default)]
    pub max_tools_per_turn: Option<u32>,
    #[serde(default)]
    pub context_strategy: Option<ContextStrategy>,
    #[serde(default)]
    pub base_instructions: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailType {
    InputValidation,
    PathSafety,
    CodeSafety,
    OutputSanitization,
    TaskValidation,
    Hallucination,
}

impl GuardrailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputValidation => "input_validation",
            Self::PathSafety => "path_safety",
            Self::CodeSafety => "code_safety",
            Self::OutputSanitization => "output_sanitization",
            Self::TaskValidation => "task_validation",
            Self::Hallucination => "hallucination",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardrailSpec {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: GuardrailType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub description: Option<String>,
}

impl GuardrailSpec {
    pub fn verifier_agent(&self) -> Option<&str> {
        match self.kind {
            GuardrailType::Hallucination => {
                self.parameters.get("verifier_agent").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(Value::as_u64)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.parameters.get(key).and_then(Value::as_bool)
    }

    pub fn param_strings(&self, key: &str) -> Option<Vec<String>> {
        let values = self.parameters.get(key)?.as_array()?;
        Some(values.iter().filter_map(Value::as_str).map(str::to_string).collect())
    }
}

pub(crate) fn non_empty_or(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_base_prompt() -> String {
    "base".to_string()
}

fn default_true() -> bool {
    true
}
