pub mod agents;
pub mod assemble;
pub mod config;
pub mod doctor;
pub mod prompt;
pub mod validate;

use std::path::PathBuf;

use grid_core::{ConfigModel, ConfigOverrides, ErrorClass, GridError, LoadOptions};
use serde::Serialize;

pub const EXIT_RUNTIME_FAILURE: u8 = 1;
pub const EXIT_CONFIG_FAILURE: u8 = 2;

/// Command-line inputs shared by every command.
#[derive(Clone, Debug, Default)]
pub struct Invocation {
    pub config_path: Option<PathBuf>,
    pub overrides: ConfigOverrides,
}

impl Invocation {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions { config_path: self.config_path.clone(), overrides: self.overrides.clone() }
    }

    pub fn load(&self) -> Result<ConfigModel, GridError> {
        ConfigModel::load(self.load_options())
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    /// Raw command output that is not wrapped in an outcome envelope.
    pub fn output(output: impl Into<String>) -> Self {
        Self { exit_code: 0, output: output.into() }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn from_error(command: &str, error: &GridError) -> Self {
        let class = error.class();
        let exit_code = match class {
            ErrorClass::ConfigParse | ErrorClass::ConfigValidation | ErrorClass::CyclicDependency => {
                EXIT_CONFIG_FAILURE
            }
            _ => EXIT_RUNTIME_FAILURE,
        };
        Self::failure(command, class.as_str(), error.to_string(), exit_code)
    }
}

pub(crate) fn render_json<T: Serialize>(command: &str, value: &T) -> CommandResult {
    match serde_json::to_string_pretty(value) {
        Ok(output) => CommandResult::output(output),
        Err(error) => {
            CommandResult::failure(command, "serialization", error.to_string(), EXIT_RUNTIME_FAILURE)
        }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
