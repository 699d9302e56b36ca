use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::tools::Tool;

/// Launch description for one MCP server declared as a tool.
#[derive(Clone, Copy, Debug)]
pub struct McpServer<'a> {
    pub tool_key: &'a str,
    pub command: &'a [String],
    pub env: &'a BTreeMap<String, String>,
    pub working_directory: &'a Path,
}

impl McpServer<'_> {
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }
}

/// Starts or connects to an MCP server and exposes its remote tools with the
/// same contract as local ones.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn connect(&self, server: McpServer<'_>) -> Result<Vec<Arc<dyn Tool>>>;
}
