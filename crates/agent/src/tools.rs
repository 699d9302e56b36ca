use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use grid_core::{AssembledAgent, ContextSharing, ConversationContext, ResolvedTool, ToolKind};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::llm::{AgentExecutor, ExecutionRequest};
use crate::mcp::{McpServer, McpTransport};

/// Argument names accepted as the task text of an agent tool, in priority order.
pub const INPUT_ALIASES: [&str; 4] = ["task", "message", "prompt", "input"];

pub type SharedConversation = Arc<RwLock<ConversationContext>>;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Anything an agent can call: named arguments in, text out.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn invoke(&self, arguments: Value) -> Result<String>;
}

/// Host code behind a function tool.
#[async_trait]
pub trait Callable: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<String>;
}

struct FnCallable<F>(F);

#[async_trait]
impl<F> Callable for FnCallable<F>
where
    F: Fn(Value) -> Result<String> + Send + Sync,
{
    async fn call(&self, arguments: Value) -> Result<String> {
        (self.0)(arguments)
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool `{tool}` is bound to callable `{callable}` which is not registered")]
    UnknownCallable { tool: String, callable: String },
    #[error("tool `{tool}` is served over MCP but no MCP transport is configured")]
    McpUnavailable { tool: String },
    #[error("MCP server for tool `{tool}` could not be started: {message}")]
    McpConnect { tool: String, message: String },
    #[error("composite tool `{tool}` step `{step}` must expand to exactly one tool")]
    UnsupportedStep { tool: String, step: String },
    #[error("tool `{tool}` needs one of the arguments: {}", INPUT_ALIASES.join(", "))]
    MissingInput { tool: String },
}

/// Host functions that function tools bind to by name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    callables: HashMap<String, Arc<dyn Callable>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C>(&mut self, name: impl Into<String>, callable: C)
    where
        C: Callable + 'static,
    {
        self.callables.insert(name.into(), Arc::new(callable));
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(Value) -> Result<String> + Send + Sync + 'static,
    {
        self.register(name, FnCallable(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Callable>> {
        self.callables.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callables.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names = self.callables.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.callables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callables.is_empty()
    }
}

/// Tools offered to one agent, in declaration order with unique names.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    /// Returns false when the name is taken. The first tool keeps the name;
    /// a different tool arriving under it is logged and dropped.
    pub fn insert(&mut self, tool: Arc<dyn Tool>) -> bool {
        let Some(existing) = self.get(tool.name()) else {
            self.tools.push(tool);
            return true;
        };
        if !Arc::ptr_eq(existing, &tool) {
            tracing::warn!(
                event_name = "tools.set.name_collision",
                tool = tool.name(),
                kept = existing.description(),
                dropped = tool.description(),
                "tool name already taken, keeping the first"
            );
        }
        false
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub struct FunctionTool {
    name: String,
    description: String,
    callable: Arc<dyn Callable>,
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, arguments: Value) -> Result<String> {
        self.callable.call(arguments).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed(String),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// 1-based position in the chain.
    pub index: usize,
    pub tool: String,
    pub outcome: StepOutcome,
}

/// What happened to each attempted step. Steps after a failure are absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainOutcome {
    pub steps: Vec<StepRecord>,
    pub failed_at: Option<usize>,
}

impl ChainOutcome {
    pub fn succeeded(&self) -> bool {
        self.failed_at.is_none()
    }

    pub fn final_output(&self) -> Option<&str> {
        match self.steps.last().map(|step| &step.outcome) {
            Some(StepOutcome::Completed(text)) if self.succeeded() => Some(text),
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(|step| match &step.outcome {
                StepOutcome::Completed(text) => format!("Step {} ({}): {text}", step.index, step.tool),
                StepOutcome::Failed(error) => {
                    format!("Step {} ({}): error: {error}", step.index, step.tool)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs its steps in order, feeding each output to the next step as `input`.
pub struct CompositeTool {
    name: String,
    description: String,
    steps: Vec<Arc<dyn Tool>>,
}

impl CompositeTool {
    pub async fn run_chain(&self, input: String) -> ChainOutcome {
        let mut current = input;
        let mut steps = Vec::with_capacity(self.steps.len());

        for (position, step) in self.steps.iter().enumerate() {
            let index = position + 1;
            match step.invoke(json!({ "input": current })).await {
                Ok(output) => {
                    steps.push(StepRecord {
                        index,
                        tool: step.name().to_string(),
                        outcome: StepOutcome::Completed(output.clone()),
                    });
                    current = output;
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "tool.composite.step_failed",
                        tool = %self.name,
                        step = step.name(),
                        index,
                        error = %error,
                        "composite chain stopped"
                    );
                    steps.push(StepRecord {
                        index,
                        tool: step.name().to_string(),
                        outcome: StepOutcome::Failed(format!("{error:#}")),
                    });
                    return ChainOutcome { steps, failed_at: Some(index) };
                }
            }
        }

        ChainOutcome { steps, failed_at: None }
    }
}

#[async_trait]
impl Tool for CompositeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, arguments: Value) -> Result<String> {
        let input = extract_input(&arguments).unwrap_or_default();
        Ok(self.run_chain(input).await.render())
    }
}

/// A nested agent exposed as a tool. Each call runs the agent once with the
/// task plus whatever slice of the shared conversation its policy allows.
pub struct AgentTool {
    name: String,
    description: String,
    agent: Arc<AssembledAgent>,
    tools: ToolSet,
    sharing: ContextSharing,
    executor: Arc<dyn AgentExecutor>,
    conversation: SharedConversation,
    max_turns: u32,
}

impl AgentTool {
    pub fn agent(&self) -> &AssembledAgent {
        &self.agent
    }

    pub fn sharing(&self) -> ContextSharing {
        self.sharing
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn supports_streaming(&self) -> bool {
        self.agent.config.streaming_enabled
    }

    async fn invoke(&self, arguments: Value) -> Result<String> {
        let task = extract_input(&arguments)
            .ok_or_else(|| ToolError::MissingInput { tool: self.name.clone() })?;
        let input = self.conversation.read().await.delegate_input(&self.sharing, &task);

        tracing::debug!(
            event_name = "tool.agent.delegated",
            tool = %self.name,
            agent = %self.agent.key,
            strategy = self.sharing.strategy.as_str(),
            "delegating to nested agent"
        );
        let result = self
            .executor
            .execute(ExecutionRequest {
                agent: &self.agent,
                tools: &self.tools,
                input: &input,
                max_turns: self.max_turns,
            })
            .await?;
        Ok(result.content)
    }
}

/// Task text from a bare string or the first non-empty alias argument.
pub fn extract_input(arguments: &Value) -> Option<String> {
    let text = match arguments {
        Value::String(text) => Some(text.as_str()),
        Value::Object(map) => INPUT_ALIASES
            .iter()
            .filter_map(|alias| map.get(*alias).and_then(Value::as_str))
            .find(|text| !text.trim().is_empty()),
        _ => None,
    };
    text.filter(|text| !text.trim().is_empty()).map(str::to_string)
}

/// Turns an assembled agent's tool graph into invocable tools.
pub struct ToolMaterializer {
    functions: Arc<FunctionRegistry>,
    executor: Arc<dyn AgentExecutor>,
    conversation: SharedConversation,
    mcp: Option<Arc<dyn McpTransport>>,
    working_directory: PathBuf,
    max_turns: u32,
}

#[derive(Default)]
struct Memo {
    tools: HashMap<usize, Vec<Arc<dyn Tool>>>,
    agents: HashMap<usize, ToolSet>,
}

impl ToolMaterializer {
    pub fn new(
        functions: Arc<FunctionRegistry>,
        executor: Arc<dyn AgentExecutor>,
        conversation: SharedConversation,
    ) -> Self {
        Self {
            functions,
            executor,
            conversation,
            mcp: None,
            working_directory: PathBuf::from("."),
            max_turns: 10,
        }
    }

    pub fn with_mcp(mut self, transport: Arc<dyn McpTransport>) -> Self {
        self.mcp = Some(transport);
        self
    }

    pub fn with_working_directory(mut self, working_directory: impl Into<PathBuf>) -> Self {
        self.working_directory = working_directory.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Shared graph nodes become shared tools; a nested agent reached twice
    /// gets one tool set.
    pub async fn materialize(&self, agent: &AssembledAgent) -> Result<ToolSet, ToolError> {
        let mut memo = Memo::default();
        let tools = self.tool_set(agent, &mut memo).await?;
        tracing::debug!(
            event_name = "tool.materialize.completed",
            agent = %agent.key,
            tools = tools.len(),
            "tool set materialized"
        );
        Ok(tools)
    }

    fn tool_set<'a>(
        &'a self,
        agent: &'a AssembledAgent,
        memo: &'a mut Memo,
    ) -> BoxFuture<'a, Result<ToolSet, ToolError>> {
        Box::pin(async move {
            let mut set = ToolSet::default();
            for entry in agent.tools.entries() {
                for tool in self.entry(entry, memo).await? {
                    set.insert(tool);
                }
            }
            Ok(set)
        })
    }

    fn entry<'a>(
        &'a self,
        entry: &'a Arc<ResolvedTool>,
        memo: &'a mut Memo,
    ) -> BoxFuture<'a, Result<Vec<Arc<dyn Tool>>, ToolError>> {
        Box::pin(async move {
            let id = Arc::as_ptr(entry) as usize;
            if let Some(existing) = memo.tools.get(&id) {
                return Ok(existing.clone());
            }

            let built: Vec<Arc<dyn Tool>> = match &entry.kind {
                ToolKind::Function(binding) => {
                    let callable = self.functions.get(&binding.callable).ok_or_else(|| {
                        ToolError::UnknownCallable {
                            tool: entry.key.clone(),
                            callable: binding.callable.clone(),
                        }
                    })?;
                    vec![Arc::new(FunctionTool {
                        name: entry.name.clone(),
                        description: entry.description.clone(),
                        callable,
                    })]
                }
                ToolKind::Agent(binding) => {
                    let agent_id = Arc::as_ptr(&binding.agent) as usize;
                    let tools = match memo.agents.get(&agent_id) {
                        Some(existing) => existing.clone(),
                        None => {
                            let tools = self.tool_set(&binding.agent, memo).await?;
                            memo.agents.insert(agent_id, tools.clone());
                            tools
                        }
                    };
                    vec![Arc::new(AgentTool {
                        name: entry.name.clone(),
                        description: entry.description.clone(),
                        agent: Arc::clone(&binding.agent),
                        tools,
                        sharing: binding.sharing,
                        executor: Arc::clone(&self.executor),
                        conversation: Arc::clone(&self.conversation),
                        max_turns: self.max_turns,
                    })]
                }
                ToolKind::Mcp(placeholder) => {
                    let transport = self
                        .mcp
                        .as_ref()
                        .ok_or_else(|| ToolError::McpUnavailable { tool: entry.key.clone() })?;
                    let server = McpServer {
                        tool_key: &entry.key,
                        command: &placeholder.command,
                        env: &placeholder.env,
                        working_directory: &self.working_directory,
                    };
                    transport.connect(server).await.map_err(|error| ToolError::McpConnect {
                        tool: entry.key.clone(),
                        message: format!("{error:#}"),
                    })?
                }
                ToolKind::Composite(pipeline) => {
                    let mut steps = Vec::with_capacity(pipeline.steps.len());
                    for step in &pipeline.steps {
                        let mut expanded = self.entry(step, memo).await?;
                        if expanded.len() != 1 {
                            return Err(ToolError::UnsupportedStep {
                                tool: entry.key.clone(),
                                step: step.key.clone(),
                            });
                        }
                        steps.push(expanded.remove(0));
                    }
                    vec![Arc::new(CompositeTool {
                        name: entry.name.clone(),
                        description: entry.description.clone(),
                        steps,
                    })]
                }
            };

            memo.tools.insert(id, built.clone());
            Ok(built)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use grid_core::{
        AgentAssembler, AssembledAgent, ConfigModel, ConversationContext, DocumentFormat, Role,
        StaticCredentials,
    };
    use serde_json::{json, Value};
    use tokio::sync::RwLock;

    use super::{
        extract_input, FunctionRegistry, SharedConversation, StepOutcome, Tool, ToolError,
        ToolMaterializer, ToolSet,
    };
    use crate::llm::{AgentExecutor, ExecutionRequest, ExecutionResult};
    use crate::mcp::{McpServer, McpTransport};

    const DOC: &str = r#"
[providers.p]
base_url = "https://x"
api_key_env = "X_KEY"

[models.m]
provider = "p"

[prompt_templates]
base = "Base."

[tools.upper]
type = "function"
function_name = "upper"

[tools.explode]
type = "function"
function_name = "explode"

[tools.count]
type = "function"
function_name = "count"

[tools.chain]
type = "composite"
tool_chain = ["upper", "explode", "count"]

[tools.happy_chain]
type = "composite"
tool_chain = ["upper", "upper"]

[tools.browse]
type = "mcp"
server_command = ["browser-server"]

[tools.ask_helper]
type = "agent"
agent_key = "helper"
context_strategy = "conversation"
context_depth = 1
include_tool_history = false

[agents.helper]
model = "m"
tools = ["upper"]

[agents.lead]
model = "m"
tools = ["upper", "chain", "happy_chain", "ask_helper", "helper", "upper"]

[agents.surfer]
model = "m"
tools = ["browse"]

[agents.orphan]
model = "m"
tools = ["count"]
"#;

    #[derive(Default)]
    struct RecordingExecutor {
        inputs: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AgentExecutor for RecordingExecutor {
        async fn execute(&self, request: ExecutionRequest<'_>) -> Result<ExecutionResult> {
            self.inputs
                .lock()
                .expect("inputs lock")
                .push((request.agent.key.clone(), request.input.to_string()));
            Ok(ExecutionResult::text(format!("{} handled it", request.agent.key)))
        }
    }

    struct FakeTransport;

    struct RemoteTool(&'static str);

    #[async_trait]
    impl Tool for RemoteTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "remote"
        }

        async fn invoke(&self, _arguments: Value) -> Result<String> {
            Ok(format!("{} ok", self.0))
        }
    }

    #[async_trait]
    impl McpTransport for FakeTransport {
        async fn connect(&self, server: McpServer<'_>) -> Result<Vec<Arc<dyn Tool>>> {
            assert_eq!(server.program(), Some("browser-server"));
            Ok(vec![Arc::new(RemoteTool("navigate")), Arc::new(RemoteTool("click"))])
        }
    }

    fn assemble(agent: &str) -> AssembledAgent {
        let config = ConfigModel::parse(DOC, DocumentFormat::Toml).expect("fixture parses");
        AgentAssembler::with_credentials(
            Arc::new(config),
            Arc::new(StaticCredentials::default().with("X_KEY", "k")),
        )
        .assemble(agent, None)
        .expect("fixture agent assembles")
    }

    fn registry(count_calls: Arc<AtomicUsize>) -> Arc<FunctionRegistry> {
        let mut registry = FunctionRegistry::new();
        registry.register_fn("upper", |arguments: Value| {
            Ok(extract_input(&arguments).unwrap_or_default().to_uppercase())
        });
        registry.register_fn("explode", |_arguments: Value| -> Result<String> {
            bail!("disk is full")
        });
        registry.register_fn("count", move |_arguments: Value| {
            count_calls.fetch_add(1, Ordering::SeqCst);
            Ok("counted".to_string())
        });
        Arc::new(registry)
    }

    fn materializer(executor: Arc<RecordingExecutor>, conversation: SharedConversation) -> ToolMaterializer {
        ToolMaterializer::new(registry(Arc::new(AtomicUsize::new(0))), executor, conversation)
    }

    fn conversation() -> SharedConversation {
        Arc::new(RwLock::new(ConversationContext::new()))
    }

    #[tokio::test]
    async fn composite_failure_reports_partial_progress_and_skips_the_rest() {
        let counted = Arc::new(AtomicUsize::new(0));
        let tools = ToolMaterializer::new(
            registry(Arc::clone(&counted)),
            Arc::new(RecordingExecutor::default()),
            conversation(),
        )
        .materialize(&assemble("lead"))
        .await
        .expect("materializes");

        let output = tools
            .get("chain")
            .expect("chain tool")
            .invoke(json!({ "input": "abc" }))
            .await
            .expect("chain reports instead of failing");

        assert_eq!(output, "Step 1 (upper): ABC\nStep 2 (explode): error: disk is full");
        assert_eq!(counted.load(Ordering::SeqCst), 0, "step 3 must not run");
    }

    #[tokio::test]
    async fn chain_outcome_is_structured() {
        let executor = Arc::new(RecordingExecutor::default());
        let agent = assemble("lead");
        let materializer = materializer(executor, conversation());
        let tools = materializer.materialize(&agent).await.expect("materializes");

        let output = tools
            .get("happy_chain")
            .expect("happy chain")
            .invoke(json!("quiet"))
            .await
            .expect("runs");
        assert_eq!(output, "Step 1 (upper): QUIET\nStep 2 (upper): QUIET");

        let chain = match &agent.tools.get("chain").expect("chain node").kind {
            grid_core::ToolKind::Composite(pipeline) => pipeline.steps.len(),
            _ => 0,
        };
        assert_eq!(chain, 3);
    }

    #[tokio::test]
    async fn repeated_and_shared_nodes_become_one_tool() {
        let tools = materializer(Arc::new(RecordingExecutor::default()), conversation())
            .materialize(&assemble("lead"))
            .await
            .expect("materializes");

        assert_eq!(tools.names(), vec!["upper", "chain", "happy_chain", "ask_helper", "call_helper"]);
    }

    #[test]
    fn name_collision_keeps_the_first_tool() {
        let first: Arc<dyn Tool> = Arc::new(RemoteTool("navigate"));
        let mut set = ToolSet::default();

        assert!(set.insert(Arc::clone(&first)));
        assert!(!set.insert(Arc::clone(&first)));
        assert!(!set.insert(Arc::new(RemoteTool("navigate"))));
        assert_eq!(set.len(), 1);
        assert!(set.get("navigate").is_some_and(|kept| Arc::ptr_eq(kept, &first)));
    }

    #[tokio::test]
    async fn agent_tool_shares_conversation_per_policy() {
        let executor = Arc::new(RecordingExecutor::default());
        let shared = conversation();
        {
            let mut history = shared.write().await;
            history.push(Role::User, "first question");
            history.push(Role::Tool, "tool noise");
            history.push(Role::Assistant, "first answer");
        }

        let tools = materializer(Arc::clone(&executor), Arc::clone(&shared))
            .materialize(&assemble("lead"))
            .await
            .expect("materializes");

        let reply = tools
            .get("ask_helper")
            .expect("agent tool")
            .invoke(json!({ "message": "summarize", "input": "ignored" }))
            .await
            .expect("delegates");
        assert_eq!(reply, "helper handled it");

        tools
            .get("call_helper")
            .expect("bare agent tool")
            .invoke(json!({ "prompt": "again" }))
            .await
            .expect("delegates");

        let inputs = executor.inputs.lock().expect("inputs lock").clone();
        assert_eq!(
            inputs[0],
            (
                "helper".to_string(),
                "Conversation context:\n1. Assistant: first answer\n\nTask: summarize".to_string()
            )
        );
        assert!(inputs[1].1.contains("1. User: first question\n2. Tool: tool noise"));
        assert!(inputs[1].1.ends_with("Task: again"));
    }

    #[tokio::test]
    async fn agent_tool_without_task_is_an_error() {
        let tools = materializer(Arc::new(RecordingExecutor::default()), conversation())
            .materialize(&assemble("lead"))
            .await
            .expect("materializes");

        let error = tools
            .get("call_helper")
            .expect("agent tool")
            .invoke(json!({ "query": "nope" }))
            .await
            .expect_err("no alias present");
        assert!(error.to_string().contains("task, message, prompt, input"));
    }

    #[tokio::test]
    async fn mcp_tools_need_a_transport() {
        let agent = assemble("surfer");
        let without = materializer(Arc::new(RecordingExecutor::default()), conversation())
            .materialize(&agent)
            .await;
        assert!(matches!(without, Err(ToolError::McpUnavailable { ref tool }) if tool == "browse"));

        let with = materializer(Arc::new(RecordingExecutor::default()), conversation())
            .with_mcp(Arc::new(FakeTransport))
            .materialize(&agent)
            .await
            .expect("materializes");
        assert_eq!(with.names(), vec!["navigate", "click"]);
    }

    #[tokio::test]
    async fn unregistered_callable_is_reported() {
        let executor: Arc<RecordingExecutor> = Arc::new(RecordingExecutor::default());
        let empty = ToolMaterializer::new(Arc::new(FunctionRegistry::new()), executor, conversation());

        assert!(matches!(
            empty.materialize(&assemble("orphan")).await,
            Err(ToolError::UnknownCallable { ref callable, .. }) if callable == "count"
        ));
    }

    #[test]
    fn input_aliases_are_checked_in_order() {
        assert_eq!(extract_input(&json!("plain")), Some("plain".to_string()));
        assert_eq!(
            extract_input(&json!({ "input": "d", "prompt": "c", "message": "b" })),
            Some("b".to_string())
        );
        assert_eq!(extract_input(&json!({ "task": "  ", "input": "x" })), Some("x".to_string()));
        assert_eq!(extract_input(&json!({ "other": "x" })), None);
        assert_eq!(extract_input(&json!(42)), None);
    }

    #[test]
    fn step_outcome_serializes_with_status_tag() {
        let value = serde_json::to_value(StepOutcome::Failed("boom".to_string())).expect("json");
        assert_eq!(value, json!({ "status": "failed", "text": "boom" }));
    }
}
