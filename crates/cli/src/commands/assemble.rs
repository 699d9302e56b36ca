use std::sync::Arc;

use grid_core::{AgentAssembler, AssembledAgent, EffectiveAgentConfig, ToolOutline};
use serde::Serialize;

use super::prompt::PreviewCredentials;
use super::{render_json, CommandResult, Invocation};

#[derive(Debug, Serialize)]
struct AssemblyReport<'a> {
    agent: &'a str,
    name: &'a str,
    model: ModelReport<'a>,
    tools: Vec<ToolOutline>,
    guardrails: Vec<String>,
    config: &'a EffectiveAgentConfig,
    instructions_chars: usize,
}

#[derive(Debug, Serialize)]
struct ModelReport<'a> {
    key: &'a str,
    name: &'a str,
    provider: &'a str,
    base_url: &'a str,
    api_key_env: &'a str,
}

impl<'a> AssemblyReport<'a> {
    fn new(agent: &'a AssembledAgent) -> Self {
        let binding = &agent.model;
        Self {
            agent: &agent.key,
            name: &agent.name,
            model: ModelReport {
                key: &binding.model_key,
                name: &binding.model.name,
                provider: &binding.provider_key,
                base_url: &binding.provider.base_url,
                api_key_env: &binding.provider.api_key_env,
            },
            tools: agent.tools.outline(),
            guardrails: agent.guardrail_keys(),
            config: &agent.config,
            instructions_chars: agent.instructions.chars().count(),
        }
    }
}

/// Assembles `agent` and prints its resolved model, tool graph and
/// guardrails. Credentials must be present unless `preview` is set.
pub fn run(invocation: &Invocation, agent: &str, preview: bool) -> CommandResult {
    let config = Arc::new(match invocation.load() {
        Ok(config) => config,
        Err(error) => return CommandResult::from_error("assemble", &error),
    });
    let assembler = if preview {
        AgentAssembler::with_credentials(config, Arc::new(PreviewCredentials))
    } else {
        AgentAssembler::new(config)
    };

    match assembler.assemble(agent, None) {
        Ok(assembled) => render_json("assemble", &AssemblyReport::new(&assembled)),
        Err(error) => CommandResult::from_error("assemble", &error),
    }
}
