use anyhow::Result;
use async_trait::async_trait;
use grid_core::AssembledAgent;
use serde::Serialize;
use serde_json::Value;

use crate::tools::ToolSet;

/// One agent turn handed to the model-facing executor.
pub struct ExecutionRequest<'a> {
    pub agent: &'a AssembledAgent,
    pub tools: &'a ToolSet,
    pub input: &'a str,
    pub max_turns: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub content: String,
    /// Tool names in the order they were called.
    pub tools_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ExecutionResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), ..Self::default() }
    }
}

/// Drives the model for one agent: sends instructions and input, lets the
/// model call tools from the set, returns the final answer.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<ExecutionResult>;
}
