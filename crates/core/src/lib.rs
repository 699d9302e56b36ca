//! Configuration-driven agent assembly.
//!
//! A [`ConfigModel`] is loaded and validated once, then an [`AgentAssembler`]
//! turns agent keys into [`AssembledAgent`]s: profile merged, model bound,
//! tool graph built, guardrails attached and instructions composed.

pub mod assembler;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod profile;
pub mod prompt;
pub mod tool_graph;

pub use assembler::{
    AgentAssembler, AssembledAgent, AssemblySession, CredentialSource, EnvCredentials,
    GuardrailBinding, ModelBinding, StaticCredentials,
};
pub use config::validation::{IssueKind, ValidationIssue, ValidationReport};
pub use config::{
    AgentSpec, ConfigError, ConfigModel, ConfigOverrides, ContextSharing, ContextStrategy,
    DocumentFormat, GuardrailSpec, GuardrailType, LoadOptions, LogFormat, ModelSpec, ProfileSpec,
    ProfileTemplate, ProviderSpec, Settings, ToolKindSpec, ToolSpec, ToolType,
};
pub use conversation::{ConversationContext, Message, Role, PROMPT_MESSAGE_PREVIEW};
pub use errors::{EntityKind, ErrorClass, GridError, InterfaceError, Violation};
pub use profile::{merge_unique, EffectiveAgentConfig, ProfileResolver};
pub use prompt::PromptComposer;
pub use tool_graph::{
    AgentBinding, CompositePipeline, FunctionBinding, McpPlaceholder, ResolvedTool, ToolGraph,
    ToolGraphBuilder, ToolKind, ToolOutline,
};
