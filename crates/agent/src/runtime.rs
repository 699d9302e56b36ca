use std::sync::Arc;

use grid_core::{
    AgentAssembler, ConversationContext, EntityKind, ErrorClass, GridError, Role,
    PROMPT_MESSAGE_PREVIEW,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::guardrails::{
    CheckResult, GuardrailError, GuardrailPipeline, VerificationContext,
};
use crate::llm::{AgentExecutor, ExecutionRequest};
use crate::mcp::McpTransport;
use crate::tools::{FunctionRegistry, SharedConversation, ToolError, ToolMaterializer};
use crate::verification::Verifier;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Tools(#[from] ToolError),
    #[error(transparent)]
    Guardrails(#[from] GuardrailError),
    #[error("agent `{agent}` failed: {message}")]
    Execution { agent: String, message: String },
}

impl RuntimeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Grid(error) => error.class(),
            Self::Tools(_) | Self::Guardrails(_) | Self::Execution { .. } => ErrorClass::Assembly,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RunRequest {
    /// Falls back to the configured default agent.
    pub agent: Option<String>,
    pub message: String,
    pub context_path: Option<String>,
}

impl RunRequest {
    pub fn new(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self { agent: Some(agent.into()), message: message.into(), context_path: None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunOutcome {
    pub correlation_id: String,
    pub agent: String,
    pub content: String,
    pub tools_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub input_checks: Vec<CheckResult>,
    pub output_checks: Vec<CheckResult>,
}

/// One conversational session: every run shares the same history.
pub struct AgentRunner {
    assembler: Arc<AgentAssembler>,
    executor: Arc<dyn AgentExecutor>,
    functions: Arc<FunctionRegistry>,
    mcp: Option<Arc<dyn McpTransport>>,
    verifier: Option<Arc<dyn Verifier>>,
    conversation: SharedConversation,
}

impl AgentRunner {
    pub fn new(
        assembler: Arc<AgentAssembler>,
        executor: Arc<dyn AgentExecutor>,
        functions: Arc<FunctionRegistry>,
    ) -> Self {
        let max_history = assembler.config().settings().max_history;
        Self {
            assembler,
            executor,
            functions,
            mcp: None,
            verifier: None,
            conversation: Arc::new(RwLock::new(ConversationContext::with_max_history(max_history))),
        }
    }

    pub fn with_mcp(mut self, transport: Arc<dyn McpTransport>) -> Self {
        self.mcp = Some(transport);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn conversation(&self) -> SharedConversation {
        Arc::clone(&self.conversation)
    }

    pub async fn clear_conversation(&self) {
        self.conversation.write().await.clear();
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, RuntimeError> {
        let correlation_id = Uuid::new_v4().to_string();
        let config = self.assembler.config();
        let agent_key = match request.agent.as_deref().or(config.default_agent()) {
            Some(key) => key.to_string(),
            None => return Err(GridError::not_found(EntityKind::Agent, "<default>").into()),
        };

        let history = self.conversation.read().await.clone();
        let agent = self.assembler.assemble_with_conversation(
            &agent_key,
            request.context_path.as_deref(),
            &history,
        )?;

        let mut pipeline = GuardrailPipeline::for_agent(&agent, config.settings())?;
        if let Some(verifier) = &self.verifier {
            pipeline = pipeline.with_verifier(Arc::clone(verifier));
        }

        let input_check = pipeline.check_input(&request.message);
        if !input_check.allowed {
            return Err(GridError::GuardrailViolation { violations: input_check.violations() }.into());
        }

        let mut materializer = ToolMaterializer::new(
            Arc::clone(&self.functions),
            Arc::clone(&self.executor),
            Arc::clone(&self.conversation),
        )
        .with_working_directory(config.working_directory())
        .with_max_turns(config.settings().max_turns);
        if let Some(transport) = &self.mcp {
            materializer = materializer.with_mcp(Arc::clone(transport));
        }
        let tools = materializer.materialize(&agent).await?;

        tracing::info!(
            event_name = "runtime.run.started",
            correlation_id = %correlation_id,
            agent = %agent_key,
            tools = tools.len(),
            guardrails = pipeline.len(),
            "agent run started"
        );

        let execution = self.executor.execute(ExecutionRequest {
            agent: &agent,
            tools: &tools,
            input: &request.message,
            max_turns: config.settings().max_turns,
        });
        let result = match tokio::time::timeout(agent.timeout(), execution).await {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                return Err(RuntimeError::Execution {
                    agent: agent_key,
                    message: format!("{error:#}"),
                })
            }
            Err(_) => {
                tracing::warn!(
                    event_name = "runtime.run.timeout",
                    correlation_id = %correlation_id,
                    agent = %agent_key,
                    timeout_secs = agent.config.timeout_secs,
                    "agent run timed out"
                );
                return Err(GridError::ExecutionTimeout {
                    agent: agent_key,
                    timeout: agent.timeout(),
                }
                .into());
            }
        };

        let verification = VerificationContext {
            agent_key: agent_key.clone(),
            instructions: agent.instructions.clone(),
            transcript: history.transcript(PROMPT_MESSAGE_PREVIEW),
            tools_used: result.tools_used.clone(),
        };
        let output_check = pipeline.check_output(&result.content, &verification).await;
        if !output_check.allowed {
            return Err(GridError::GuardrailViolation { violations: output_check.violations() }.into());
        }

        {
            let mut conversation = self.conversation.write().await;
            conversation.push(Role::User, request.message.as_str());
            conversation.push(Role::Assistant, output_check.text.as_str());
        }

        tracing::info!(
            event_name = "runtime.run.completed",
            correlation_id = %correlation_id,
            agent = %agent_key,
            tools_used = result.tools_used.len(),
            "agent run completed"
        );
        Ok(RunOutcome {
            correlation_id,
            agent: agent_key,
            content: output_check.text,
            tools_used: result.tools_used,
            metadata: result.metadata,
            input_checks: input_check.results,
            output_checks: output_check.results,
        })
    }
}
