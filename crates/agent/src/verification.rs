//! Hallucination verification of agent answers.
//!
//! A verifier agent reads the answer, the answering agent's instructions and
//! the conversation, and returns a [`VerificationVerdict`]. Any failure on
//! the verifier side is a [`VerifierDegradedError`]; the guardrail pipeline
//! logs it and lets the answer through.

use std::sync::Arc;

use async_trait::async_trait;
use grid_core::{AgentAssembler, GuardrailSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{AgentExecutor, ExecutionRequest};
use crate::tools::ToolSet;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Everything the verifier sees. Built explicitly by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VerificationRequest {
    pub agent_key: String,
    pub response: String,
    pub instructions: String,
    pub transcript: String,
    /// Tools the agent reported calling, in call order.
    pub tools_used: Vec<String>,
}

impl VerificationRequest {
    pub fn render(&self) -> String {
        let mut sections = vec![
            "TASK: Check the following assistant response for statements that are not supported \
             by the conversation or by tool results."
                .to_string(),
            format!("ASSISTANT RESPONSE:\n{}", self.response),
        ];
        if !self.instructions.trim().is_empty() {
            sections.push(format!("AGENT INSTRUCTIONS:\n{}", self.instructions));
        }
        if !self.transcript.trim().is_empty() {
            sections.push(format!("CONVERSATION CONTEXT:\n{}", self.transcript));
        }
        sections.push(if self.tools_used.is_empty() {
            "TOOLS USED:\n(none; claims of reading, running or fetching anything are unsupported)"
                .to_string()
        } else {
            let lines =
                self.tools_used.iter().map(|tool| format!("- {tool}")).collect::<Vec<_>>();
            format!("TOOLS USED:\n{}", lines.join("\n"))
        });
        sections.push(
            "Reply with JSON only: {\"has_hallucination\": bool, \"confidence\": 0.0-1.0, \
             \"analysis\": string, \"flagged_statements\": [string]}"
                .to_string(),
        );
        sections.join("\n\n")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub has_hallucination: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub flagged_statements: Vec<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("verifier `{verifier}` degraded: {reason}")]
pub struct VerifierDegradedError {
    pub verifier: String,
    pub reason: String,
}

impl VerifierDegradedError {
    pub fn new(verifier: &str, reason: impl Into<String>) -> Self {
        Self { verifier: verifier.to_string(), reason: reason.into() }
    }
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        verifier_agent: &str,
        request: &VerificationRequest,
    ) -> Result<VerificationVerdict, VerifierDegradedError>;
}

/// When a verdict blocks the answer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HallucinationPolicy {
    pub strict_mode: bool,
    pub confidence_threshold: f64,
}

impl Default for HallucinationPolicy {
    fn default() -> Self {
        Self { strict_mode: true, confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD }
    }
}

impl HallucinationPolicy {
    pub fn from_spec(spec: &GuardrailSpec) -> Self {
        let defaults = Self::default();
        Self {
            strict_mode: spec.param_bool("strict_mode").unwrap_or(defaults.strict_mode),
            confidence_threshold: spec
                .param_f64("confidence_threshold")
                .unwrap_or(defaults.confidence_threshold),
        }
    }

    /// Strict mode blocks on any finding; otherwise only confident ones.
    pub fn trips(&self, verdict: &VerificationVerdict) -> bool {
        verdict.has_hallucination
            && (self.strict_mode || verdict.confidence >= self.confidence_threshold)
    }
}

/// Runs a configured agent as the verifier and parses its JSON verdict.
pub struct AgentVerifier {
    assembler: Arc<AgentAssembler>,
    executor: Arc<dyn AgentExecutor>,
}

impl AgentVerifier {
    pub fn new(assembler: Arc<AgentAssembler>, executor: Arc<dyn AgentExecutor>) -> Self {
        Self { assembler, executor }
    }
}

#[async_trait]
impl Verifier for AgentVerifier {
    async fn verify(
        &self,
        verifier_agent: &str,
        request: &VerificationRequest,
    ) -> Result<VerificationVerdict, VerifierDegradedError> {
        let agent = self
            .assembler
            .assemble(verifier_agent, None)
            .map_err(|error| VerifierDegradedError::new(verifier_agent, error.to_string()))?;
        let input = request.render();
        let tools = ToolSet::default();

        let result = self
            .executor
            .execute(ExecutionRequest { agent: &agent, tools: &tools, input: &input, max_turns: 1 })
            .await
            .map_err(|error| VerifierDegradedError::new(verifier_agent, format!("{error:#}")))?;

        parse_verdict(&result.content).map_err(|reason| VerifierDegradedError::new(verifier_agent, reason))
    }
}

/// Reads the first JSON object in `text`, tolerating surrounding prose or
/// code fences.
pub fn parse_verdict(text: &str) -> Result<VerificationVerdict, String> {
    let start = text.find('{').ok_or_else(|| "verifier reply contains no JSON object".to_string())?;
    let end = text.rfind('}').filter(|end| *end > start).ok_or_else(|| {
        "verifier reply contains an unterminated JSON object".to_string()
    })?;
    serde_json::from_str(&text[start..=end])
        .map_err(|error| format!("verifier reply is not a verdict: {error}"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_verdict, HallucinationPolicy, VerificationRequest, VerificationVerdict};
    use grid_core::GuardrailSpec;

    fn verdict(has_hallucination: bool, confidence: f64) -> VerificationVerdict {
        VerificationVerdict { has_hallucination, confidence, ..VerificationVerdict::default() }
    }

    #[test]
    fn strict_mode_trips_on_any_finding() {
        let policy = HallucinationPolicy::default();
        assert!(policy.trips(&verdict(true, 0.1)));
        assert!(!policy.trips(&verdict(false, 0.99)));
    }

    #[test]
    fn lenient_mode_uses_confidence_threshold() {
        let spec: GuardrailSpec = serde_json::from_value(json!({
            "type": "hallucination",
            "parameters": {
                "verifier_agent": "checker",
                "strict_mode": false,
                "confidence_threshold": 0.8
            }
        }))
        .expect("spec");
        let policy = HallucinationPolicy::from_spec(&spec);

        assert!(!policy.trips(&verdict(true, 0.79)));
        assert!(policy.trips(&verdict(true, 0.8)));
    }

    #[test]
    fn verdict_is_found_inside_fenced_reply() {
        let reply = "Here you go:\n```json\n{\"has_hallucination\": true, \"confidence\": 0.9, \
                     \"analysis\": \"made up a file\", \"flagged_statements\": [\"x.txt exists\"]}\n```";
        let parsed = parse_verdict(reply).expect("parses");

        assert!(parsed.has_hallucination);
        assert_eq!(parsed.flagged_statements, vec!["x.txt exists"]);
    }

    #[test]
    fn prose_reply_is_rejected() {
        assert!(parse_verdict("looks fine to me").is_err());
        assert!(parse_verdict("} backwards {").is_err());
    }

    #[test]
    fn rendered_request_omits_empty_sections() {
        let request = VerificationRequest {
            agent_key: "a".to_string(),
            response: "42".to_string(),
            instructions: String::new(),
            transcript: "1. User: what is it?".to_string(),
            tools_used: Vec::new(),
        };
        let rendered = request.render();

        assert!(rendered.contains("ASSISTANT RESPONSE:\n42"));
        assert!(rendered.contains("CONVERSATION CONTEXT:\n1. User: what is it?"));
        assert!(rendered.contains("TOOLS USED:\n(none;"));
        assert!(!rendered.contains("AGENT INSTRUCTIONS"));
    }

    #[test]
    fn rendered_request_lists_tools_as_data() {
        let request = VerificationRequest {
            response: "I read notes.md".to_string(),
            tools_used: vec!["read_file".to_string(), "summarize".to_string()],
            ..VerificationRequest::default()
        };
        let rendered = request.render();

        assert!(rendered.contains("TOOLS USED:\n- read_file\n- summarize"));
        let tools_at = rendered.find("TOOLS USED").unwrap_or_default();
        assert!(tools_at > rendered.find("ASSISTANT RESPONSE").unwrap_or_default());
    }
}
