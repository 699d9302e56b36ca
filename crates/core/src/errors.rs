use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::validation::ValidationReport;
use crate::config::ConfigError;

/// Kind of configuration entity a lookup or reference points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Provider,
    Model,
    Tool,
    Agent,
    Profile,
    Guardrail,
    PromptTemplate,
    Credential,
    Callable,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Model => "model",
            Self::Tool => "tool",
            Self::Agent => "agent",
            Self::Profile => "profile",
            Self::Guardrail => "guardrail",
            Self::PromptTemplate => "prompt template",
            Self::Credential => "credential environment variable",
            Self::Callable => "callable",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single guardrail rule that rejected a request, with its reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub guardrail: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum GridError {
    #[error(transparent)]
    ConfigParse(#[from] ConfigError),
    #[error(transparent)]
    ConfigValidation(#[from] ValidationReport),
    #[error("cyclic dependency detected: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
    #[error("{kind} `{key}` not found")]
    NotFound { kind: EntityKind, key: String },
    #[error(
        "agent `{agent}` requires capabilities [{}] not provided by profile `{profile}`",
        .missing.join(", ")
    )]
    IncompatibleProfile { agent: String, profile: String, missing: Vec<String> },
    #[error("agent `{agent}` declares tool `{tool}` which is neither a tool nor an agent")]
    UnresolvedTool { agent: String, tool: String },
    #[error("agent `{agent}` requests MCP tool `{tool}` but MCP is disabled for it")]
    McpDisabled { agent: String, tool: String },
    #[error("rejected by guardrails: {}", render_violations(.violations))]
    GuardrailViolation { violations: Vec<Violation> },
    #[error("agent `{agent}` did not finish within {}s", .timeout.as_secs_f64())]
    ExecutionTimeout { agent: String, timeout: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    ConfigParse,
    ConfigValidation,
    CyclicDependency,
    NotFound,
    Assembly,
    Guardrail,
    Timeout,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigParse => "config_parse",
            Self::ConfigValidation => "config_validation",
            Self::CyclicDependency => "cyclic_dependency",
            Self::NotFound => "not_found",
            Self::Assembly => "assembly",
            Self::Guardrail => "guardrail",
            Self::Timeout => "timeout",
        }
    }
}

impl GridError {
    pub fn not_found(kind: EntityKind, key: impl Into<String>) -> Self {
        Self::NotFound { kind, key: key.into() }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ConfigParse(_) => ErrorClass::ConfigParse,
            Self::ConfigValidation(_) => ErrorClass::ConfigValidation,
            Self::CyclicDependency { .. } => ErrorClass::CyclicDependency,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::IncompatibleProfile { .. }
            | Self::UnresolvedTool { .. }
            | Self::McpDisabled { .. } => ErrorClass::Assembly,
            Self::GuardrailViolation { .. } => ErrorClass::Guardrail,
            Self::ExecutionTimeout { .. } => ErrorClass::Timeout,
        }
    }

    /// Configuration and assembly failures are permanent until the
    /// configuration or environment changes; request-level failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GuardrailViolation { .. } | Self::ExecutionTimeout { .. })
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|violation| format!("{} ({})", violation.guardrail, violation.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request was rejected by a safety check. Adjust the input and try again."
            }
            Self::NotFound { .. } => "The requested agent or one of its dependencies does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The agent did not respond in time. Please retry shortly."
            }
            Self::Internal { .. } => "The agent configuration is invalid.",
        }
    }
}

impl From<GridError> for InterfaceError {
    fn from(value: GridError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            GridError::NotFound { .. } => Self::NotFound { message, correlation_id },
            GridError::GuardrailViolation { .. } => Self::BadRequest { message, correlation_id },
            GridError::ExecutionTimeout { .. } => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            GridError::ConfigParse(_)
            | GridError::ConfigValidation(_)
            | GridError::CyclicDependency { .. }
            | GridError::IncompatibleProfile { .. }
            | GridError::UnresolvedTool { .. }
            | GridError::McpDisabled { .. } => Self::Internal { message, correlation_id },
        }
    }
}
