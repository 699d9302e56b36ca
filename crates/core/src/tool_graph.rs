//! Resolution of an agent's tool keys into typed, executable descriptors.
//!
//! Every key becomes one [`ResolvedTool`] whose [`ToolKind`] is a closed set:
//! plain function bindings, nested agents, MCP placeholders expanded later by
//! the transport, and composite pipelines. A key requested more than once in
//! a build produces a single shared node.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::assembler::{AssembledAgent, AssemblySession, PathNode};
use crate::config::{ConfigModel, ContextSharing, ToolKindSpec, ToolSpec};
use crate::errors::GridError;
use crate::profile::EffectiveAgentConfig;

#[derive(Clone, Debug)]
pub struct ToolGraph {
    agent_key: String,
    entries: Vec<Arc<ResolvedTool>>,
}

#[derive(Debug)]
pub struct ResolvedTool {
    pub key: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub prompt_addition: Option<String>,
    pub kind: ToolKind,
}

#[derive(Debug)]
pub enum ToolKind {
    Function(FunctionBinding),
    Agent(AgentBinding),
    Mcp(McpPlaceholder),
    Composite(CompositePipeline),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionBinding {
    pub callable: String,
    pub parameters: Option<Value>,
}

#[derive(Clone, Debug)]
pub struct AgentBinding {
    pub agent: Arc<AssembledAgent>,
    pub sharing: ContextSharing,
}

/// MCP server launch details; the transport turns this into callables.
#[derive(Clone, Debug, PartialEq)]
pub struct McpPlaceholder {
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Ordered steps; step *i*'s output is step *i+1*'s input.
#[derive(Debug)]
pub struct CompositePipeline {
    pub steps: Vec<Arc<ResolvedTool>>,
}

/// Serializable outline of a graph for inspection output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolOutline {
    pub key: String,
    pub name: String,
    pub kind: &'static str,
    pub supports_streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<ToolOutline>,
}

impl ResolvedTool {
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ToolKind::Function(_) => "function",
            ToolKind::Agent(_) => "agent",
            ToolKind::Mcp(_) => "mcp",
            ToolKind::Composite(_) => "composite",
        }
    }

    /// Only nested agents stream, and only when the nested agent does.
    pub fn supports_streaming(&self) -> bool {
        match &self.kind {
            ToolKind::Agent(binding) => binding.agent.config.streaming_enabled,
            ToolKind::Function(_) | ToolKind::Mcp(_) | ToolKind::Composite(_) => false,
        }
    }

    pub fn outline(&self) -> ToolOutline {
        let (target, steps) = match &self.kind {
            ToolKind::Function(binding) => (Some(binding.callable.clone()), Vec::new()),
            ToolKind::Agent(binding) => (Some(binding.agent.key.clone()), Vec::new()),
            ToolKind::Mcp(placeholder) => (Some(placeholder.command.join(" ")), Vec::new()),
            ToolKind::Composite(pipeline) => {
                (None, pipeline.steps.iter().map(|step| step.outline()).collect())
            }
        };
        ToolOutline {
            key: self.key.clone(),
            name: self.name.clone(),
            kind: self.kind_name(),
            supports_streaming: self.supports_streaming(),
            target,
            steps,
        }
    }
}

impl ToolGraph {
    pub fn agent_key(&self) -> &str {
        &self.agent_key
    }

    /// Tools in declaration order; a repeated key repeats the same `Arc`.
    pub fn entries(&self) -> &[Arc<ResolvedTool>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.key.as_str()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&Arc<ResolvedTool>> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn nested_agents(&self) -> Vec<&Arc<AssembledAgent>> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.kind {
                ToolKind::Agent(binding) => Some(&binding.agent),
                _ => None,
            })
            .collect()
    }

    pub fn outline(&self) -> Vec<ToolOutline> {
        self.entries.iter().map(|entry| entry.outline()).collect()
    }
}

/// Assembles agents referenced as tools. Implemented by the assembler so the
/// builder can recurse without owning it.
pub trait NestedAgentAssembly {
    fn assemble_nested(
        &self,
        agent_key: &str,
        session: &mut AssemblySession,
    ) -> Result<Arc<AssembledAgent>, GridError>;
}

#[derive(Clone, Debug, Default)]
pub struct ToolGraphBuilder;

impl ToolGraphBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(
        &self,
        effective: &EffectiveAgentConfig,
        config: &ConfigModel,
        session: &mut AssemblySession,
        nested: &dyn NestedAgentAssembly,
    ) -> Result<ToolGraph, GridError> {
        let mut pass = BuildPass { effective, config, session, nested, memo: HashMap::new() };

        let entries = effective
            .tools
            .iter()
            .map(|key| pass.resolve(key))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            event_name = "tool_graph.build.completed",
            correlation_id = %pass.session.id(),
            agent = %effective.agent_key,
            entries = entries.len(),
            unique = pass.memo.len(),
            "tool graph built"
        );
        Ok(ToolGraph { agent_key: effective.agent_key.clone(), entries })
    }
}

struct BuildPass<'a> {
    effective: &'a EffectiveAgentConfig,
    config: &'a ConfigModel,
    session: &'a mut AssemblySession,
    nested: &'a dyn NestedAgentAssembly,
    memo: HashMap<String, Arc<ResolvedTool>>,
}

impl BuildPass<'_> {
    fn resolve(&mut self, key: &str) -> Result<Arc<ResolvedTool>, GridError> {
        if let Some(existing) = self.memo.get(key) {
            return Ok(Arc::clone(existing));
        }

        let config = self.config;
        let resolved = if let Some(spec) = config.tools().get(key) {
            self.session.enter(PathNode::Tool(key.to_string()))?;
            let built = self.from_spec(spec);
            self.session.leave();
            built?
        } else if let Some(agent) = config.agents().get(key) {
            let nested = self.nested.assemble_nested(key, self.session)?;
            ResolvedTool {
                key: key.to_string(),
                name: format!("call_{key}"),
                description: agent
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Delegates the task to agent `{}`", agent.name)),
                category: "agent".to_string(),
                tags: Vec::new(),
                prompt_addition: None,
                kind: ToolKind::Agent(AgentBinding {
                    agent: nested,
                    sharing: ContextSharing::default(),
                }),
            }
        } else {
            return Err(GridError::UnresolvedTool {
                agent: self.effective.agent_key.clone(),
                tool: key.to_string(),
            });
        };

        let resolved = Arc::new(resolved);
        self.memo.insert(key.to_string(), Arc::clone(&resolved));
        Ok(resolved)
    }

    fn from_spec(&mut self, spec: &ToolSpec) -> Result<ResolvedTool, GridError> {
        let kind = match &spec.kind {
            ToolKindSpec::Function { callable, parameters } => ToolKind::Function(FunctionBinding {
                callable: callable.clone(),
                parameters: parameters.clone(),
            }),
            ToolKindSpec::Agent { agent, sharing } => {
                let nested = self.nested.assemble_nested(agent, self.session)?;
                ToolKind::Agent(AgentBinding { agent: nested, sharing: *sharing })
            }
            ToolKindSpec::Mcp { command, env } => {
                if !self.effective.mcp_enabled {
                    return Err(GridError::McpDisabled {
                        agent: self.effective.agent_key.clone(),
                        tool: spec.key.clone(),
                    });
                }
                ToolKind::Mcp(McpPlaceholder { command: command.clone(), env: env.clone() })
            }
            ToolKindSpec::Composite { chain } => {
                let steps =
                    chain.iter().map(|step| self.resolve(step)).collect::<Result<Vec<_>, _>>()?;
                ToolKind::Composite(CompositePipeline { steps })
            }
        };

        Ok(ResolvedTool {
            key: spec.key.clone(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            category: spec.category.clone(),
            tags: spec.tags.clone(),
            prompt_addition: spec.prompt_addition.clone(),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ToolKind;
    use crate::assembler::{AgentAssembler, StaticCredentials};
    use crate::config::{ConfigModel, ContextStrategy, DocumentFormat};
    use crate::errors::GridError;

    const BASE: &str = r#"
[providers.p]
base_url = "https://x"
api_key_env = "X_KEY"

[models.m]
provider = "p"

[prompt_templates]
base = "Base."

[tools.read]
type = "function"
function_name = "read_file"
prompt_addition = "Use read for files."

[tools.summarize]
type = "function"
function_name = "summarize"

[tools.pipeline]
type = "composite"
tool_chain = ["read", "summarize"]

[tools.browse]
type = "mcp"
server_command = ["npx", "browser-server"]
"#;

    fn assembler(extra: &str) -> AgentAssembler {
        let config = ConfigModel::parse(&format!("{BASE}\n{extra}"), DocumentFormat::Toml)
            .expect("fixture config parses");
        AgentAssembler::with_credentials(
            Arc::new(config),
            Arc::new(StaticCredentials::default().with("X_KEY", "secret")),
        )
    }

    #[test]
    fn repeated_key_builds_one_node_referenced_twice() {
        let assembler = assembler(
            r#"
[agents.a]
model = "m"
tools = ["read", "read"]
"#,
        );
        let agent = assembler.assemble("a", None).expect("assembles");
        let entries = agent.tools.entries();

        assert_eq!(entries.len(), 2);
        assert!(Arc::ptr_eq(&entries[0], &entries[1]));
    }

    #[test]
    fn composite_steps_share_nodes_with_top_level_tools() {
        let assembler = assembler(
            r#"
[agents.a]
model = "m"
tools = ["read", "pipeline"]
"#,
        );
        let agent = assembler.assemble("a", None).expect("assembles");
        let read = Arc::clone(&agent.tools.entries()[0]);

        match &agent.tools.entries()[1].kind {
            ToolKind::Composite(pipeline) => {
                assert_eq!(pipeline.steps.len(), 2);
                assert!(Arc::ptr_eq(&pipeline.steps[0], &read));
                assert_eq!(pipeline.steps[1].key, "summarize");
            }
            other => panic!("expected composite, got {other:?}"),
        }
    }

    #[test]
    fn mcp_requires_global_or_agent_enablement() {
        let assembler = assembler(
            r#"
[settings]
mcp_enabled = false

[agents.blocked]
model = "m"
tools = ["browse"]

[agents.allowed]
model = "m"
tools = ["browse"]
mcp_enabled = true
"#,
        );

        assert!(matches!(
            assembler.assemble("blocked", None),
            Err(GridError::McpDisabled { ref agent, ref tool }) if agent == "blocked" && tool == "browse"
        ));

        let allowed = assembler.assemble("allowed", None).expect("assembles");
        match &allowed.tools.entries()[0].kind {
            ToolKind::Mcp(placeholder) => {
                assert_eq!(placeholder.command, vec!["npx", "browser-server"]);
            }
            other => panic!("expected mcp placeholder, got {other:?}"),
        }
    }

    #[test]
    fn global_mcp_enablement_wins_over_agent_opt_out() {
        let assembler = assembler(
            r#"
[settings]
mcp_enabled = true

[agents.a]
model = "m"
tools = ["browse"]
mcp_enabled = false
"#,
        );

        let agent = assembler.assemble("a", None).expect("global MCP enables the tool");
        assert!(agent.config.mcp_enabled);
        assert!(matches!(agent.tools.entries()[0].kind, ToolKind::Mcp(_)));
    }

    #[test]
    fn agent_tool_carries_sharing_policy_and_streaming_flag() {
        let assembler = assembler(
            r#"
[tools.ask_helper]
type = "agent"
agent_key = "helper"
context_strategy = "minimal"
context_depth = 2

[agents.helper]
model = "m"
streaming_enabled = false

[agents.lead]
model = "m"
tools = ["ask_helper", "helper"]
"#,
        );
        let lead = assembler.assemble("lead", None).expect("assembles");
        let entries = lead.tools.entries();

        match (&entries[0].kind, &entries[1].kind) {
            (ToolKind::Agent(explicit), ToolKind::Agent(bare)) => {
                assert_eq!(explicit.sharing.strategy, ContextStrategy::Minimal);
                assert_eq!(explicit.sharing.depth, 2);
                assert_eq!(bare.sharing.strategy, ContextStrategy::Conversation);
                assert!(Arc::ptr_eq(&explicit.agent, &bare.agent), "nested agent memoized");
            }
            other => panic!("expected two agent tools, got {other:?}"),
        }
        assert_eq!(entries[1].name, "call_helper");
        assert!(!entries[0].supports_streaming());
    }

    #[test]
    fn build_detects_cycles_missed_by_unchecked_configs() {
        let raw = format!(
            "{BASE}\n{}",
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
"#
        );
        let config = ConfigModel::parse_unchecked(&raw, DocumentFormat::Toml).expect("parses");
        let assembler = AgentAssembler::with_credentials(
            Arc::new(config),
            Arc::new(StaticCredentials::default().with("X_KEY", "secret")),
        );

        match assembler.assemble("a", None) {
            Err(GridError::CyclicDependency { path }) => {
                assert_eq!(path, vec!["a", "call_b", "b", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn unknown_key_is_unresolved() {
        let raw = format!(
            "{BASE}\n{}",
            r#"
[agents.a]
model = "m"
tools = ["nowhere"]
"#
        );
        let config = ConfigModel::parse_unchecked(&raw, DocumentFormat::Toml).expect("parses");
        let assembler = AgentAssembler::with_credentials(
            Arc::new(config),
            Arc::new(StaticCredentials::default().with("X_KEY", "secret")),
        );

        assert!(matches!(
            assembler.assemble("a", None),
            Err(GridError::UnresolvedTool { ref agent, ref tool }) if agent == "a" && tool == "nowhere"
        ));
    }
}
