use super::{CommandResult, Invocation};

pub fn run(invocation: &Invocation) -> CommandResult {
    let config = match invocation.load() {
        Ok(config) => config,
        Err(error) => return CommandResult::from_error("validate", &error),
    };

    let source = config
        .source_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<memory>".to_string());
    CommandResult::success(
        "validate",
        format!(
            "{source} is valid: {} provider(s), {} model(s), {} tool(s), {} agent(s), {} guardrail(s)",
            config.providers().len(),
            config.models().len(),
            config.tools().len(),
            config.agents().len(),
            config.guardrails().len(),
        ),
    )
}
