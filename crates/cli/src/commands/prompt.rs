use std::sync::Arc;

use grid_core::{AgentAssembler, CredentialSource, EnvCredentials};
use secrecy::SecretString;

use super::{CommandResult, Invocation};

pub const PLACEHOLDER_CREDENTIAL: &str = "<unset>";

/// Environment credentials with a placeholder for anything unset, so
/// inspection commands work on machines without provider keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct PreviewCredentials;

impl CredentialSource for PreviewCredentials {
    fn lookup(&self, variable: &str) -> Option<SecretString> {
        EnvCredentials
            .lookup(variable)
            .or_else(|| Some(SecretString::from(PLACEHOLDER_CREDENTIAL.to_string())))
    }
}

pub fn run(invocation: &Invocation, agent: &str, context_path: Option<&str>) -> CommandResult {
    let config = match invocation.load() {
        Ok(config) => config,
        Err(error) => return CommandResult::from_error("prompt", &error),
    };
    let assembler = AgentAssembler::with_credentials(Arc::new(config), Arc::new(PreviewCredentials));

    match assembler.assemble(agent, context_path) {
        Ok(assembled) => CommandResult::output(assembled.instructions.clone()),
        Err(error) => CommandResult::from_error("prompt", &error),
    }
}
