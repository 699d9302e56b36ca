//! Agent runtime on top of `grid-core` assemblies.
//!
//! An [`AgentRunner`](runtime::AgentRunner) owns one conversation and drives
//! each request through a constrained loop:
//!
//! 1. **Assembly** - the agent is assembled with the current history
//! 2. **Input guardrails** (`guardrails`) - rejected input never reaches a model
//! 3. **Tool materialization** (`tools`, `mcp`) - the tool graph becomes callables
//! 4. **Execution** (`llm`) - a pluggable [`AgentExecutor`](llm::AgentExecutor) under a timeout
//! 5. **Output guardrails** - sanitization and hallucination verification (`verification`)
//!
//! Model providers and MCP servers are traits here; concrete clients live
//! with the embedding application.

pub mod guardrails;
pub mod llm;
pub mod mcp;
pub mod runtime;
pub mod tools;
pub mod verification;
