pub mod document;
pub mod validation;

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{EntityKind, GridError};
use crate::profile::merge_unique;

pub use document::{
    AgentSpec, ConfigDocument, ContextSharing, ContextStrategy, GuardrailSpec, GuardrailType,
    ModelSpec, ProfileSpec, ProfileTemplate, ProviderSpec, ProviderType, SettingsPatch,
    ToolDocument, ToolKindSpec, ToolSpec, ToolType,
};
use validation::{ValidationIssue, ValidationReport};

/// Immutable, validated view of a configuration document.
///
/// Built once by [`ConfigModel::load`] or [`ConfigModel::parse`] and shared
/// read-only (typically behind an `Arc`) by every assembly afterwards.
#[derive(Clone, Debug)]
pub struct ConfigModel {
    settings: Settings,
    providers: BTreeMap<String, ProviderSpec>,
    models: BTreeMap<String, ModelSpec>,
    tools: BTreeMap<String, ToolSpec>,
    agents: BTreeMap<String, AgentSpec>,
    profiles: BTreeMap<String, ProfileSpec>,
    guardrails: BTreeMap<String, GuardrailSpec>,
    prompt_templates: BTreeMap<String, String>,
    source: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Settings {
    pub default_agent: Option<String>,
    pub max_history: usize,
    pub max_turns: u32,
    pub agent_timeout_secs: u64,
    pub working_directory: PathBuf,
    pub config_directory: PathBuf,
    pub allow_path_override: bool,
    pub mcp_enabled: bool,
    pub enforce_guardrails: bool,
    pub tools_common_rules: Option<String>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Yaml,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub working_directory: Option<PathBuf>,
    pub log_level: Option<String>,
    pub mcp_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config document `{origin}`: {message}")]
    ParseDocument { origin: String, message: String },
    #[error("config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("unsupported config format for `{0}` (expected .toml, .yaml, .yml or .json)")]
    UnsupportedFormat(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

pub const DEFAULT_CONFIG_CANDIDATES: [&str; 3] = ["grid.toml", "config/grid.toml", "config.yaml"];

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_agent: None,
            max_history: 15,
            max_turns: 10,
            agent_timeout_secs: 300,
            working_directory: PathBuf::from("."),
            config_directory: PathBuf::from("."),
            allow_path_override: true,
            mcp_enabled: true,
            enforce_guardrails: true,
            tools_common_rules: None,
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidEnvOverride {
                key: "log format".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl Settings {
    fn apply_patch(&mut self, patch: SettingsPatch) {
        if let Some(default_agent) = patch.default_agent {
            self.default_agent = Some(default_agent);
        }
        if let Some(max_history) = patch.max_history {
            self.max_history = max_history;
        }
        if let Some(max_turns) = patch.max_turns {
            self.max_turns = max_turns;
        }
        if let Some(agent_timeout_secs) = patch.agent_timeout_secs {
            self.agent_timeout_secs = agent_timeout_secs;
        }
        if let Some(working_directory) = patch.working_directory {
            self.working_directory = PathBuf::from(working_directory);
        }
        if let Some(config_directory) = patch.config_directory {
            self.config_directory = PathBuf::from(config_directory);
        }
        if let Some(allow_path_override) = patch.allow_path_override {
            self.allow_path_override = allow_path_override;
        }
        if let Some(mcp_enabled) = patch.mcp_enabled {
            self.mcp_enabled = mcp_enabled;
        }
        if let Some(enforce_guardrails) = patch.enforce_guardrails {
            self.enforce_guardrails = enforce_guardrails;
        }
        if let Some(rules) = patch.tools_common_rules {
            self.tools_common_rules = Some(rules);
        }
        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("GRID_WORKING_DIRECTORY") {
            self.override_working_directory(PathBuf::from(value), "GRID_WORKING_DIRECTORY");
        }
        if let Some(value) = read_env("GRID_MCP_ENABLED") {
            self.mcp_enabled = parse_bool("GRID_MCP_ENABLED", &value)?;
        }
        if let Some(value) = read_env("GRID_AGENT_TIMEOUT_SECS") {
            self.agent_timeout_secs = parse_u64("GRID_AGENT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("GRID_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("GRID_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(working_directory) = overrides.working_directory {
            self.override_working_directory(working_directory, "explicit override");
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(mcp_enabled) = overrides.mcp_enabled {
            self.mcp_enabled = mcp_enabled;
        }
    }

    fn override_working_directory(&mut self, path: PathBuf, origin: &str) {
        if self.allow_path_override {
            self.working_directory = path;
        } else {
            tracing::warn!(
                event_name = "config.override.ignored",
                origin,
                path = %path.display(),
                "working directory override ignored because allow_path_override is false"
            );
        }
    }

    fn anchor_directories(&mut self, config_dir: Option<&Path>, explicit_config_dir: bool) {
        let base = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.working_directory = absolutize(&base, &self.working_directory);
        self.config_directory = if explicit_config_dir {
            absolutize(&base, &self.config_directory)
        } else {
            config_dir
                .map(|dir| absolutize(&base, dir))
                .unwrap_or_else(|| self.working_directory.clone())
        };
    }
}

impl ConfigModel {
    /// Loads the document from disk, applies environment and explicit
    /// overrides to the settings, then validates the whole graph.
    pub fn load(options: LoadOptions) -> Result<Self, GridError> {
        let path = resolve_config_path(options.config_path.as_deref()).ok_or_else(|| {
            ConfigError::MissingConfigFile(
                options
                    .config_path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_CANDIDATES[0])),
            )
        })?;
        let format = DocumentFormat::from_path(&path)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.clone()))?;

        let raw = fs::read_to_string(&path)
            .map_err(|source| ConfigError::ReadFile { path: path.clone(), source })?;
        let interpolated = interpolate_env_vars(&raw)?;
        let mut document = parse_document(&interpolated, format, &path.display().to_string())?;

        let explicit_config_dir = document.settings.config_directory.is_some();
        let mut settings = Settings::default();
        settings.apply_patch(std::mem::take(&mut document.settings));
        settings.apply_env_overrides()?;
        settings.apply_overrides(options.overrides);
        settings.anchor_directories(path.parent(), explicit_config_dir);

        let source = path.display().to_string();
        let model = Self::assemble_document(document, settings, Some(path))?;
        tracing::info!(
            event_name = "config.load.completed",
            source = %source,
            agents = model.agents.len(),
            tools = model.tools.len(),
            "configuration loaded and validated"
        );
        Ok(model)
    }

    /// Parses and validates an in-memory document. Environment overrides are
    /// not consulted, so the result depends on `raw` alone.
    pub fn parse(raw: &str, format: DocumentFormat) -> Result<Self, GridError> {
        let mut document = parse_document(raw, format, "<inline>")?;
        let explicit_config_dir = document.settings.config_directory.is_some();
        let mut settings = Settings::default();
        settings.apply_patch(std::mem::take(&mut document.settings));
        settings.anchor_directories(None, explicit_config_dir);
        Self::assemble_document(document, settings, None)
    }

    /// Builds without the reference and cycle checks so assembly-time
    /// detection can be exercised.
    #[cfg(test)]
    pub(crate) fn parse_unchecked(raw: &str, format: DocumentFormat) -> Result<Self, GridError> {
        let mut document = parse_document(raw, format, "<inline>")?;
        let explicit_config_dir = document.settings.config_directory.is_some();
        let mut settings = Settings::default();
        settings.apply_patch(std::mem::take(&mut document.settings));
        settings.anchor_directories(None, explicit_config_dir);
        let (model, _, _) = Self::from_document(document, settings, None);
        Ok(model)
    }

    fn assemble_document(
        document: ConfigDocument,
        settings: Settings,
        source: Option<PathBuf>,
    ) -> Result<Self, GridError> {
        let (model, mut issues, rejected_tools) = Self::from_document(document, settings, source);
        // A tool that failed to convert already has its own issue.
        issues.extend(validation::validate_references(&model).into_iter().filter(|issue| {
            !rejected_tools.iter().any(|key| issue.is_dangling(EntityKind::Tool, key))
        }));
        let cycles = validation::detect_cycles(&model);

        if issues.is_empty() {
            if let Some(path) = cycles.into_iter().next() {
                return Err(GridError::CyclicDependency { path });
            }
            return Ok(model);
        }

        issues.extend(cycles.into_iter().map(ValidationIssue::cycle));
        tracing::warn!(
            event_name = "config.validation.failed",
            issue_count = issues.len(),
            "configuration failed validation"
        );
        Err(ValidationReport::new(issues).into())
    }

    fn from_document(
        document: ConfigDocument,
        settings: Settings,
        source: Option<PathBuf>,
    ) -> (Self, Vec<ValidationIssue>, BTreeSet<String>) {
        let mut issues = Vec::new();
        let mut tools = BTreeMap::new();
        let mut rejected_tools = BTreeSet::new();
        for (key, tool) in document.tools {
            match tool.into_spec(&key) {
                Ok(spec) => {
                    tools.insert(key, spec);
                }
                Err(problems) => {
                    issues.extend(
                        problems.into_iter().map(|problem| {
                            ValidationIssue::invalid(format!("tools.{key}"), problem)
                        }),
                    );
                    rejected_tools.insert(key);
                }
            }
        }

        let providers = document
            .providers
            .into_iter()
            .map(|(key, mut provider)| {
                provider.name = document::non_empty_or(provider.name, &key);
                provider.base_url = provider.base_url.trim_end_matches('/').to_string();
                (key, provider)
            })
            .collect();
        let models = document
            .models
            .into_iter()
            .map(|(key, mut model)| {
                model.name = document::non_empty_or(model.name, &key);
                (key, model)
            })
            .collect();
        let agents = document
            .agents
            .into_iter()
            .map(|(key, mut agent)| {
                agent.name = document::non_empty_or(agent.name, &key);
                (key, agent)
            })
            .collect();
        let profiles = document
            .agent_profiles
            .into_iter()
            .map(|(key, mut profile)| {
                profile.name = document::non_empty_or(profile.name, &key);
                let declared = profile
                    .capabilities
                    .iter()
                    .map(|cap| cap.trim().to_lowercase())
                    .collect::<Vec<_>>();
                profile.capabilities = match profile.template {
                    Some(template) => {
                        let seeded = template
                            .capabilities()
                            .iter()
                            .map(|cap| cap.to_string())
                            .collect::<Vec<_>>();
                        merge_unique(&seeded, &declared)
                    }
                    None => declared,
                };
                if let (Some(template), None) = (profile.template, &profile.base_instructions) {
                    profile.base_instructions = Some(template.base_instructions().to_string());
                }
                (key, profile)
            })
            .collect();
        let guardrails = document
            .guardrails
            .into_iter()
            .map(|(key, mut guardrail)| {
                guardrail.name = document::non_empty_or(guardrail.name, &key);
                (key, guardrail)
            })
            .collect();

        let model = Self {
            settings,
            providers,
            models,
            tools,
            agents,
            profiles,
            guardrails,
            prompt_templates: document.prompt_templates,
            source,
        };
        (model, issues, rejected_tools)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn get_provider(&self, key: &str) -> Result<&ProviderSpec, GridError> {
        self.providers.get(key).ok_or_else(|| GridError::not_found(EntityKind::Provider, key))
    }

    pub fn get_model(&self, key: &str) -> Result<&ModelSpec, GridError> {
        self.models.get(key).ok_or_else(|| GridError::not_found(EntityKind::Model, key))
    }

    pub fn get_tool(&self, key: &str) -> Result<&ToolSpec, GridError> {
        self.tools.get(key).ok_or_else(|| GridError::not_found(EntityKind::Tool, key))
    }

    pub fn get_agent(&self, key: &str) -> Result<&AgentSpec, GridError> {
        self.agents.get(key).ok_or_else(|| GridError::not_found(EntityKind::Agent, key))
    }

    pub fn get_profile(&self, key: &str) -> Result<&ProfileSpec, GridError> {
        self.profiles.get(key).ok_or_else(|| GridError::not_found(EntityKind::Profile, key))
    }

    pub fn get_guardrail(&self, key: &str) -> Result<&GuardrailSpec, GridError> {
        self.guardrails.get(key).ok_or_else(|| GridError::not_found(EntityKind::Guardrail, key))
    }

    pub fn get_prompt_template(&self, key: &str) -> Result<&str, GridError> {
        self.prompt_templates
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| GridError::not_found(EntityKind::PromptTemplate, key))
    }

    pub fn providers(&self) -> &BTreeMap<String, ProviderSpec> {
        &self.providers
    }

    pub fn models(&self) -> &BTreeMap<String, ModelSpec> {
        &self.models
    }

    pub fn tools(&self) -> &BTreeMap<String, ToolSpec> {
        &self.tools
    }

    pub fn agents(&self) -> &BTreeMap<String, AgentSpec> {
        &self.agents
    }

    pub fn profiles(&self) -> &BTreeMap<String, ProfileSpec> {
        &self.profiles
    }

    pub fn guardrails(&self) -> &BTreeMap<String, GuardrailSpec> {
        &self.guardrails
    }

    pub fn prompt_templates(&self) -> &BTreeMap<String, String> {
        &self.prompt_templates
    }

    pub fn has_tool(&self, key: &str) -> bool {
        self.tools.contains_key(key)
    }

    pub fn has_agent(&self, key: &str) -> bool {
        self.agents.contains_key(key)
    }

    /// Agent key to its description, falling back to the display name.
    pub fn list_agents(&self) -> BTreeMap<&str, &str> {
        self.agents
            .iter()
            .map(|(key, agent)| {
                let summary = agent.description.as_deref().unwrap_or(agent.name.as_str());
                (key.as_str(), summary)
            })
            .collect()
    }

    pub fn tools_by_category(&self, category: &str) -> Vec<&ToolSpec> {
        self.tools.values().filter(|tool| tool.category == category).collect()
    }

    pub fn tools_by_tag(&self, tag: &str) -> Vec<&ToolSpec> {
        self.tools.values().filter(|tool| tool.tags.iter().any(|candidate| candidate == tag)).collect()
    }

    pub fn default_agent(&self) -> Option<&str> {
        self.settings.default_agent.as_deref()
    }

    pub fn working_directory(&self) -> &Path {
        &self.settings.working_directory
    }

    pub fn config_directory(&self) -> &Path {
        &self.settings.config_directory
    }

    /// Resolves `path` against the working directory without touching the
    /// filesystem.
    pub fn absolute_path(&self, path: &str) -> PathBuf {
        absolutize(&self.settings.working_directory, Path::new(path))
    }

    /// Accepts a model key, an agent key (its model) or nothing (the default
    /// agent's model).
    pub fn resolve_model_key(&self, key: Option<&str>) -> Result<String, GridError> {
        match key {
            Some(key) if self.models.contains_key(key) => Ok(key.to_string()),
            Some(key) => self.get_agent(key).map(|agent| agent.model.clone()),
            None => {
                let default_agent = self
                    .default_agent()
                    .ok_or_else(|| GridError::not_found(EntityKind::Agent, "<default>"))?;
                self.get_agent(default_agent).map(|agent| agent.model.clone())
            }
        }
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_CANDIDATES.iter().map(PathBuf::from).find(|path| path.exists())
}

pub fn parse_document(
    raw: &str,
    format: DocumentFormat,
    origin: &str,
) -> Result<ConfigDocument, ConfigError> {
    let parsed = match format {
        DocumentFormat::Toml => toml::from_str::<ConfigDocument>(raw).map_err(|err| err.to_string()),
        DocumentFormat::Yaml => {
            serde_yaml::from_str::<ConfigDocument>(raw).map_err(|err| err.to_string())
        }
        DocumentFormat::Json => {
            serde_json::from_str::<ConfigDocument>(raw).map_err(|err| err.to_string())
        }
    };
    parsed.map_err(|message| ConfigError::ParseDocument { origin: origin.to_string(), message })
}

pub fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

/// Joins `path` onto `base` when relative and folds `.`/`..` lexically.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() { path.to_path_buf() } else { base.join(path) };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}
