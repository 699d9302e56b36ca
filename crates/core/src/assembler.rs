use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use uuid::Uuid;

use crate::config::{ConfigModel, GuardrailSpec, ModelSpec, ProviderSpec};
use crate::conversation::ConversationContext;
use crate::errors::{EntityKind, GridError};
use crate::profile::{EffectiveAgentConfig, ProfileResolver};
use crate::prompt::PromptComposer;
use crate::tool_graph::{NestedAgentAssembly, ToolGraph, ToolGraphBuilder};

/// Where provider credentials come from.
pub trait CredentialSource: Send + Sync {
    fn lookup(&self, variable: &str) -> Option<SecretString>;
}

/// Reads credentials from the process environment at assembly time.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn lookup(&self, variable: &str) -> Option<SecretString> {
        env::var(variable)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(SecretString::from)
    }
}

#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    values: HashMap<String, SecretString>,
}

impl StaticCredentials {
    pub fn with(mut self, variable: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(variable.into(), SecretString::from(value.into()));
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn lookup(&self, variable: &str) -> Option<SecretString> {
        self.values.get(variable).cloned()
    }
}

#[derive(Clone, Debug)]
pub struct ModelBinding {
    pub provider_key: String,
    pub provider: ProviderSpec,
    pub model_key: String,
    pub model: ModelSpec,
    pub api_key: SecretString,
}

#[derive(Clone, Debug)]
pub struct GuardrailBinding {
    pub key: String,
    pub spec: GuardrailSpec,
}

/// A fully resolved agent: model binding, instructions, tools and guardrails.
#[derive(Debug)]
pub struct AssembledAgent {
    pub key: String,
    pub name: String,
    pub model: ModelBinding,
    pub instructions: String,
    pub tools: ToolGraph,
    pub guardrails: Vec<GuardrailBinding>,
    pub config: EffectiveAgentConfig,
}

impl AssembledAgent {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    pub fn guardrail_keys(&self) -> Vec<String> {
        self.guardrails.iter().map(|binding| binding.key.clone()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathNode {
    Agent(String),
    Tool(String),
}

impl PathNode {
    fn key(&self) -> &str {
        match self {
            Self::Agent(key) | Self::Tool(key) => key,
        }
    }
}

/// Scope of one top-level `assemble` call: nested agents built during it are
/// shared, and the current resolution path is tracked to catch cycles.
pub struct AssemblySession {
    id: Uuid,
    agents: HashMap<String, Arc<AssembledAgent>>,
    path: Vec<PathNode>,
}

impl AssemblySession {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), agents: HashMap::new(), path: Vec::new() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn nested_count(&self) -> usize {
        self.agents.len()
    }

    pub(crate) fn enter(&mut self, node: PathNode) -> Result<(), GridError> {
        if let Some(start) = self.path.iter().position(|entry| *entry == node) {
            let mut path =
                self.path[start..].iter().map(|entry| entry.key().to_string()).collect::<Vec<_>>();
            path.push(node.key().to_string());
            return Err(GridError::CyclicDependency { path });
        }
        self.path.push(node);
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.path.pop();
    }
}

impl Default for AssemblySession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AssemblySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssemblySession")
            .field("id", &self.id)
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("path", &self.path)
            .finish()
    }
}

pub struct AgentAssembler {
    config: Arc<ConfigModel>,
    credentials: Arc<dyn CredentialSource>,
    resolver: ProfileResolver,
    tools: ToolGraphBuilder,
    composer: PromptComposer,
}

impl AgentAssembler {
    pub fn new(config: Arc<ConfigModel>) -> Self {
        Self::with_credentials(config, Arc::new(EnvCredentials))
    }

    pub fn with_credentials(
        config: Arc<ConfigModel>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            config,
            credentials,
            resolver: ProfileResolver::new(),
            tools: ToolGraphBuilder::new(),
            composer: PromptComposer::new(),
        }
    }

    pub fn config(&self) -> &ConfigModel {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<ConfigModel> {
        Arc::clone(&self.config)
    }

    pub fn assemble(
        &self,
        agent_key: &str,
        context_path: Option<&str>,
    ) -> Result<AssembledAgent, GridError> {
        self.assemble_with_conversation(agent_key, context_path, &ConversationContext::new())
    }

    /// Builds one agent and everything it reaches. Either every part
    /// resolves or the first failure is returned and nothing is kept.
    pub fn assemble_with_conversation(
        &self,
        agent_key: &str,
        context_path: Option<&str>,
        conversation: &ConversationContext,
    ) -> Result<AssembledAgent, GridError> {
        let mut session = AssemblySession::new();
        let result = self.assemble_in_session(agent_key, context_path, conversation, &mut session);

        match &result {
            Ok(agent) => tracing::info!(
                event_name = "assembly.agent.completed",
                correlation_id = %session.id(),
                agent = agent_key,
                tools = agent.tools.len(),
                nested_agents = session.nested_count(),
                "agent assembled"
            ),
            Err(error) => tracing::warn!(
                event_name = "assembly.agent.failed",
                correlation_id = %session.id(),
                agent = agent_key,
                error_class = error.class().as_str(),
                error = %error,
                "agent assembly failed"
            ),
        }
        result
    }

    fn assemble_in_session(
        &self,
        agent_key: &str,
        context_path: Option<&str>,
        conversation: &ConversationContext,
        session: &mut AssemblySession,
    ) -> Result<AssembledAgent, GridError> {
        session.enter(PathNode::Agent(agent_key.to_string()))?;
        let built = self.build_agent(agent_key, context_path, conversation, session);
        session.leave();
        built
    }

    fn build_agent(
        &self,
        agent_key: &str,
        context_path: Option<&str>,
        conversation: &ConversationContext,
        session: &mut AssemblySession,
    ) -> Result<AssembledAgent, GridError> {
        let config = self.config.as_ref();
        let effective = self.resolver.resolve(agent_key, config)?;
        let model = self.bind_model(&effective.model)?;
        let tools = self.tools.build(&effective, config, session, self)?;
        let guardrails = effective
            .guardrails
            .iter()
            .map(|key| {
                config
                    .get_guardrail(key)
                    .map(|spec| GuardrailBinding { key: key.clone(), spec: spec.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let instructions = self.composer.compose(&effective, context_path, conversation, config)?;

        Ok(AssembledAgent {
            key: agent_key.to_string(),
            name: effective.name.clone(),
            model,
            instructions,
            tools,
            guardrails,
            config: effective,
        })
    }

    /// Model, its provider, and the provider's credential read now.
    pub fn bind_model(&self, model_key: &str) -> Result<ModelBinding, GridError> {
        let model = self.config.get_model(model_key)?;
        let provider = self.config.get_provider(&model.provider)?;
        let api_key = self
            .credentials
            .lookup(&provider.api_key_env)
            .ok_or_else(|| GridError::not_found(EntityKind::Credential, &provider.api_key_env))?;

        Ok(ModelBinding {
            provider_key: model.provider.clone(),
            provider: provider.clone(),
            model_key: model_key.to_string(),
            model: model.clone(),
            api_key,
        })
    }
}

impl NestedAgentAssembly for AgentAssembler {
    fn assemble_nested(
        &self,
        agent_key: &str,
        session: &mut AssemblySession,
    ) -> Result<Arc<AssembledAgent>, GridError> {
        if let Some(existing) = session.agents.get(agent_key) {
            return Ok(Arc::clone(existing));
        }

        let agent = Arc::new(self.assemble_in_session(
            agent_key,
            None,
            &ConversationContext::new(),
            session,
        )?);
        tracing::debug!(
            event_name = "assembly.nested.completed",
            correlation_id = %session.id(),
            agent = agent_key,
            "nested agent assembled"
        );
        session.agents.insert(agent_key.to_string(), Arc::clone(&agent));
        Ok(agent)
    }
}

impl fmt::Debug for AgentAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentAssembler").field("agents", &self.config.agents().len()).finish()
    }
}
