use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use grid_core::config::absolutize;
use grid_core::{AssembledAgent, GuardrailBinding, GuardrailType, Settings, Violation};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::verification::{
    HallucinationPolicy, VerificationRequest, Verifier, VerifierDegradedError,
};

pub const DEFAULT_MIN_INPUT_CHARS: usize = 1;
pub const DEFAULT_MAX_INPUT_CHARS: usize = 50_000;
pub const DEFAULT_VERIFIER_TIMEOUT: Duration = Duration::from_secs(60);

const BLOCKED_PATH_PATTERNS: [&str; 8] = [
    r"\.\./",
    r"\.\.\\",
    r"/etc/",
    r"/proc/",
    r"/sys/",
    r"/dev/",
    r"c:\\windows\\",
    r"c:\\program files\\",
];

const PATH_CANDIDATES: &str =
    r#"(?:^|[\s"'(=`])((?:[A-Za-z]:[\\/]|\.{1,2}[\\/]|/)[^\s"'`()<>,;]*)"#;

const DANGEROUS_CODE_PATTERNS: [&str; 9] = [
    r"eval\s*\(",
    r"exec\s*\(",
    r"subprocess\.",
    r"os\.system",
    r"rm\s+-rf",
    r"del\s+/[fqsh]",
    r"format\s+[a-z]:",
    r"__import__",
    r#"open\s*\(.+["']w["']"#,
];

const BLOCKED_TASK_KEYWORDS: [&str; 9] =
    ["hack", "crack", "exploit", "malware", "virus", "illegal", "piracy", "fraud", "spam"];

const REDACTIONS: [(&str, &str); 5] = [
    (r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}", "[EMAIL_REDACTED]"),
    (r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b", "[CARD_REDACTED]"),
    (r"\b(?:\d{3}-\d{2}-\d{4}|\d{9})\b", "[SSN_REDACTED]"),
    (r"(?:password|passwd|pwd)[\s:=]+[\w!@#$%^&*]+", "[PASSWORD_REDACTED]"),
    (r"(?:api_key|apikey|token)[\s:=]+[\w-]+", "[API_KEY_REDACTED]"),
];

#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error("guardrail `{guardrail}` has an invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        guardrail: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("guardrail `{guardrail}` has no verifier agent")]
    MissingVerifier { guardrail: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Modified,
    Skipped,
    /// The check could not run; the text was let through.
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub guardrail: String,
    pub kind: GuardrailType,
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    fn new(guardrail: &Guardrail, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            guardrail: guardrail.key.clone(),
            kind: guardrail.kind,
            status,
            message: message.into(),
        }
    }
}

fn violations(results: &[CheckResult]) -> Vec<Violation> {
    results
        .iter()
        .filter(|result| result.status == CheckStatus::Failed)
        .map(|result| Violation { guardrail: result.guardrail.clone(), reason: result.message.clone() })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InputCheck {
    pub allowed: bool,
    pub results: Vec<CheckResult>,
}

impl InputCheck {
    pub fn violations(&self) -> Vec<Violation> {
        violations(&self.results)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutputCheck {
    /// The answer after any redactions.
    pub text: String,
    pub allowed: bool,
    pub results: Vec<CheckResult>,
}

impl OutputCheck {
    pub fn violations(&self) -> Vec<Violation> {
        violations(&self.results)
    }
}

/// Facts about the answering agent that output checks may need.
#[derive(Clone, Debug, Default)]
pub struct VerificationContext {
    pub agent_key: String,
    pub instructions: String,
    pub transcript: String,
    pub tools_used: Vec<String>,
}

enum Rule {
    InputLength { min: usize, max: usize },
    PathSafety { base: PathBuf, allowed_roots: Vec<PathBuf>, blocked: Vec<Regex>, candidates: Regex },
    CodeSafety { patterns: Vec<Regex> },
    TaskKeywords { keywords: Vec<(String, Regex)> },
    Sanitize { redactions: Vec<(Regex, &'static str)> },
    Hallucination { verifier_agent: String, policy: HallucinationPolicy },
}

struct Guardrail {
    key: String,
    kind: GuardrailType,
    enabled: bool,
    rule: Rule,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Input,
    Output,
}

impl Rule {
    fn applies_to(&self, phase: Phase) -> bool {
        match self {
            Self::InputLength { .. } | Self::TaskKeywords { .. } => phase == Phase::Input,
            Self::Sanitize { .. } | Self::Hallucination { .. } => phase == Phase::Output,
            Self::PathSafety { .. } | Self::CodeSafety { .. } => true,
        }
    }
}

/// An agent's guardrails in declaration order.
///
/// With enforcement off every check still runs and is reported, but nothing
/// is blocked.
pub struct GuardrailPipeline {
    guardrails: Vec<Guardrail>,
    enforce: bool,
    verifier: Option<Arc<dyn Verifier>>,
    verifier_timeout: Duration,
}

impl GuardrailPipeline {
    pub fn for_agent(agent: &AssembledAgent, settings: &Settings) -> Result<Self, GuardrailError> {
        Ok(Self::from_bindings(
            &agent.guardrails,
            &settings.working_directory,
            settings.enforce_guardrails,
        )?
        .with_verifier_timeout(agent.timeout()))
    }

    pub fn from_bindings(
        bindings: &[GuardrailBinding],
        working_directory: &Path,
        enforce: bool,
    ) -> Result<Self, GuardrailError> {
        let guardrails = bindings
            .iter()
            .map(|binding| {
                Ok(Guardrail {
                    key: binding.key.clone(),
                    kind: binding.spec.kind,
                    enabled: binding.spec.enabled,
                    rule: build_rule(binding, working_directory)?,
                })
            })
            .collect::<Result<Vec<_>, GuardrailError>>()?;
        Ok(Self { guardrails, enforce, verifier: None, verifier_timeout: DEFAULT_VERIFIER_TIMEOUT })
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Bounds each verifier call; expiry counts as a degraded check.
    pub fn with_verifier_timeout(mut self, timeout: Duration) -> Self {
        self.verifier_timeout = timeout;
        self
    }

    pub fn enforcing(&self) -> bool {
        self.enforce
    }

    pub fn len(&self) -> usize {
        self.guardrails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guardrails.is_empty()
    }

    pub fn check_input(&self, text: &str) -> InputCheck {
        let mut results = Vec::new();
        for guardrail in &self.guardrails {
            if let Some(result) = self.check_static(guardrail, Phase::Input, text) {
                results.push(result);
            }
        }
        let allowed = self.decide("input", &results);
        InputCheck { allowed, results }
    }

    /// Output checks run in order; redactions are visible to later checks.
    pub async fn check_output(&self, text: &str, context: &VerificationContext) -> OutputCheck {
        let mut current = text.to_string();
        let mut results = Vec::new();

        for guardrail in &self.guardrails {
            let result = match &guardrail.rule {
                Rule::Sanitize { redactions } if guardrail.enabled => {
                    let (sanitized, count) = redact(&current, redactions);
                    if count == 0 {
                        CheckResult::new(guardrail, CheckStatus::Passed, "no sensitive data found")
                    } else {
                        current = sanitized;
                        CheckResult::new(
                            guardrail,
                            CheckStatus::Modified,
                            format!("redacted {count} sensitive value(s)"),
                        )
                    }
                }
                Rule::Hallucination { verifier_agent, policy } if guardrail.enabled => {
                    self.verify(guardrail, verifier_agent, policy, &current, context).await
                }
                _ => match self.check_static(guardrail, Phase::Output, &current) {
                    Some(result) => result,
                    None => continue,
                },
            };
            results.push(result);
        }

        let allowed = self.decide("output", &results);
        OutputCheck { text: current, allowed, results }
    }

    fn check_static(&self, guardrail: &Guardrail, phase: Phase, text: &str) -> Option<CheckResult> {
        if !guardrail.rule.applies_to(phase) {
            return None;
        }
        if !guardrail.enabled {
            return Some(CheckResult::new(guardrail, CheckStatus::Skipped, "disabled"));
        }

        let outcome = match &guardrail.rule {
            Rule::InputLength { min, max } => check_length(text, *min, *max),
            Rule::PathSafety { base, allowed_roots, blocked, candidates } => {
                check_paths(text, base, allowed_roots, blocked, candidates)
            }
            Rule::CodeSafety { patterns } => patterns
                .iter()
                .find(|pattern| pattern.is_match(text))
                .map(|pattern| format!("potentially dangerous code pattern `{}`", pattern.as_str()))
                .map_or(Ok(()), Err),
            Rule::TaskKeywords { keywords } => keywords
                .iter()
                .find(|(_, pattern)| pattern.is_match(text))
                .map(|(keyword, _)| format!("task contains blocked keyword `{keyword}`"))
                .map_or(Ok(()), Err),
            Rule::Sanitize { .. } | Rule::Hallucination { .. } => Ok(()),
        };

        Some(match outcome {
            Ok(()) => CheckResult::new(guardrail, CheckStatus::Passed, "passed"),
            Err(reason) => CheckResult::new(guardrail, CheckStatus::Failed, reason),
        })
    }

    async fn verify(
        &self,
        guardrail: &Guardrail,
        verifier_agent: &str,
        policy: &HallucinationPolicy,
        text: &str,
        context: &VerificationContext,
    ) -> CheckResult {
        if text.trim().is_empty() {
            return CheckResult::new(guardrail, CheckStatus::Skipped, "empty output");
        }
        let Some(verifier) = self.verifier.as_ref() else {
            tracing::warn!(
                event_name = "guardrail.verifier.degraded",
                guardrail = %guardrail.key,
                verifier = verifier_agent,
                reason = "no verifier configured",
                "hallucination check skipped"
            );
            return CheckResult::new(guardrail, CheckStatus::Degraded, "no verifier configured");
        };

        let request = VerificationRequest {
            agent_key: context.agent_key.clone(),
            response: text.to_string(),
            instructions: context.instructions.clone(),
            transcript: context.transcript.clone(),
            tools_used: context.tools_used.clone(),
        };
        let verdict =
            match tokio::time::timeout(self.verifier_timeout, verifier.verify(verifier_agent, &request))
                .await
            {
                Ok(verdict) => verdict,
                Err(_) => Err(VerifierDegradedError::new(
                    verifier_agent,
                    format!("no verdict within {}s", self.verifier_timeout.as_secs()),
                )),
            };
        match verdict {
            Ok(verdict) if policy.trips(&verdict) => CheckResult::new(
                guardrail,
                CheckStatus::Failed,
                format!(
                    "possible hallucination (confidence {:.2}): {}",
                    verdict.confidence, verdict.analysis
                ),
            ),
            Ok(_) => CheckResult::new(guardrail, CheckStatus::Passed, "no hallucination found"),
            Err(error) => {
                tracing::warn!(
                    event_name = "guardrail.verifier.degraded",
                    guardrail = %guardrail.key,
                    verifier = %error.verifier,
                    reason = %error.reason,
                    "verifier failed; answer let through"
                );
                CheckResult::new(guardrail, CheckStatus::Degraded, error.to_string())
            }
        }
    }

    fn decide(&self, phase: &str, results: &[CheckResult]) -> bool {
        let failed = results.iter().filter(|result| result.status == CheckStatus::Failed).count();
        if failed == 0 {
            return true;
        }
        if self.enforce {
            tracing::warn!(
                event_name = "guardrail.check.blocked",
                phase,
                failed,
                "guardrails rejected {phase}"
            );
            false
        } else {
            tracing::info!(
                event_name = "guardrail.check.reported",
                phase,
                failed,
                "guardrail failures reported without enforcement"
            );
            true
        }
    }
}

fn build_rule(binding: &GuardrailBinding, working_directory: &Path) -> Result<Rule, GuardrailError> {
    let spec = &binding.spec;
    let key = binding.key.as_str();

    Ok(match spec.kind {
        GuardrailType::InputValidation => Rule::InputLength {
            min: spec.param_u64("min_length").map_or(DEFAULT_MIN_INPUT_CHARS, |value| value as usize),
            max: spec.param_u64("max_length").map_or(DEFAULT_MAX_INPUT_CHARS, |value| value as usize),
        },
        GuardrailType::PathSafety => {
            let roots = spec.param_strings("allowed_paths").unwrap_or_else(|| vec![".".to_string()]);
            let blocked = match spec.param_strings("blocked_patterns") {
                Some(patterns) => compile_all(key, patterns.iter().map(String::as_str))?,
                None => compile_all(key, BLOCKED_PATH_PATTERNS)?,
            };
            Rule::PathSafety {
                base: working_directory.to_path_buf(),
                allowed_roots: roots
                    .iter()
                    .map(|root| absolutize(working_directory, Path::new(root)))
                    .collect(),
                blocked,
                candidates: compile(key, PATH_CANDIDATES, false)?,
            }
        }
        GuardrailType::CodeSafety => Rule::CodeSafety {
            patterns: match spec.param_strings("patterns") {
                Some(patterns) => compile_all(key, patterns.iter().map(String::as_str))?,
                None => compile_all(key, DANGEROUS_CODE_PATTERNS)?,
            },
        },
        GuardrailType::TaskValidation => {
            let keywords = spec.param_strings("blocked_keywords").unwrap_or_else(|| {
                BLOCKED_TASK_KEYWORDS.iter().map(|keyword| keyword.to_string()).collect()
            });
            Rule::TaskKeywords {
                keywords: keywords
                    .into_iter()
                    .map(|keyword| {
                        let pattern = format!(r"\b{}\b", regex::escape(&keyword));
                        compile(key, &pattern, true).map(|regex| (keyword, regex))
                    })
                    .collect::<Result<_, _>>()?,
            }
        }
        GuardrailType::OutputSanitization => Rule::Sanitize {
            redactions: REDACTIONS
                .iter()
                .map(|(pattern, replacement)| {
                    compile(key, pattern, true).map(|regex| (regex, *replacement))
                })
                .collect::<Result<_, _>>()?,
        },
        GuardrailType::Hallucination => Rule::Hallucination {
            verifier_agent: spec
                .verifier_agent()
                .ok_or_else(|| GuardrailError::MissingVerifier { guardrail: key.to_string() })?
                .to_string(),
            policy: HallucinationPolicy::from_spec(spec),
        },
    })
}

fn compile(guardrail: &str, pattern: &str, case_insensitive: bool) -> Result<Regex, GuardrailError> {
    let source = if case_insensitive { format!("(?i){pattern}") } else { pattern.to_string() };
    Regex::new(&source).map_err(|source| GuardrailError::InvalidPattern {
        guardrail: guardrail.to_string(),
        pattern: pattern.to_string(),
        source,
    })
}

fn compile_all<'a>(
    guardrail: &str,
    patterns: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<Regex>, GuardrailError> {
    patterns.into_iter().map(|pattern| compile(guardrail, pattern, true)).collect()
}

fn check_length(text: &str, min: usize, max: usize) -> Result<(), String> {
    let trimmed = text.trim().chars().count();
    let total = text.chars().count();
    if trimmed < min {
        return Err(format!("input is too short or empty ({trimmed} < {min} characters)"));
    }
    if total > max {
        return Err(format!("input exceeds maximum length ({total} > {max} characters)"));
    }
    Ok(())
}

fn check_paths(
    text: &str,
    base: &Path,
    allowed_roots: &[PathBuf],
    blocked: &[Regex],
    candidates: &Regex,
) -> Result<(), String> {
    for capture in candidates.captures_iter(text) {
        let Some(path) = capture.get(1).map(|found| found.as_str()) else {
            continue;
        };
        if let Some(pattern) = blocked.iter().find(|pattern| pattern.is_match(path)) {
            return Err(format!("unsafe path `{path}` matches `{}`", pattern.as_str()));
        }
        let absolute = absolutize(base, Path::new(path));
        if !allowed_roots.iter().any(|root| absolute.starts_with(root)) {
            return Err(format!("path `{path}` is outside the allowed directories"));
        }
    }
    Ok(())
}

fn redact(text: &str, redactions: &[(Regex, &'static str)]) -> (String, usize) {
    let mut current = text.to_string();
    let mut count = 0;
    for (pattern, replacement) in redactions {
        let found = pattern.find_iter(&current).count();
        if found > 0 {
            count += found;
            current = pattern.replace_all(&current, *replacement).into_owned();
        }
    }
    (current, count)
}
