pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use grid_core::ConfigOverrides;

use commands::{CommandResult, Invocation};

#[derive(Debug, Parser)]
#[command(
    name = "grid",
    about = "Agent grid operator CLI",
    long_about = "Validate agent configuration, inspect effective settings, and preview assembled agents.",
    after_help = "Examples:\n  grid validate --config grid.toml\n  grid prompt researcher --context-path docs/brief.md\n  grid assemble researcher --preview\n  grid doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Configuration file (default: grid.toml, config/grid.toml, config.yaml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override settings.working_directory")]
    working_dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Override settings.logging.level")]
    log_level: Option<String>,
    #[arg(long, global = true, help = "Override settings.mcp_enabled")]
    mcp_enabled: Option<bool>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Load and validate the configuration, reporting every issue found")]
    Validate,
    #[command(about = "Inspect effective settings with source attribution and redaction")]
    Config,
    #[command(about = "List configured agents and the default agent")]
    Agents {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the composed instructions for an agent")]
    Prompt {
        agent: String,
        #[arg(long, help = "Path to reference in the prompt, relative to the working directory")]
        context_path: Option<String>,
    },
    #[command(about = "Assemble an agent and print its model, tool graph and guardrails as JSON")]
    Assemble {
        agent: String,
        #[arg(long, help = "Use a placeholder for unset provider credentials")]
        preview: bool,
    },
    #[command(about = "Check configuration, credentials, assembly and guardrail readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Config => "config",
            Self::Agents { .. } => "agents",
            Self::Prompt { .. } => "prompt",
            Self::Assemble { .. } => "assemble",
            Self::Doctor { .. } => "doctor",
        }
    }
}

impl Cli {
    fn invocation(&self) -> Invocation {
        Invocation {
            config_path: self.config.clone(),
            overrides: ConfigOverrides {
                working_directory: self.working_dir.clone(),
                log_level: self.log_level.clone(),
                mcp_enabled: self.mcp_enabled,
            },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let invocation = cli.invocation();
    init_logging(&invocation);

    let name = cli.command.name();
    let result = execute(cli.command, &invocation);
    tracing::debug!(
        event_name = "cli.command.completed",
        command = name,
        exit_code = result.exit_code,
        "command completed"
    );

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn execute(command: Command, invocation: &Invocation) -> CommandResult {
    match command {
        Command::Validate => commands::validate::run(invocation),
        Command::Config => commands::config::run(invocation),
        Command::Agents { json } => commands::agents::run(invocation, json),
        Command::Prompt { agent, context_path } => {
            commands::prompt::run(invocation, &agent, context_path.as_deref())
        }
        Command::Assemble { agent, preview } => commands::assemble::run(invocation, &agent, preview),
        Command::Doctor { json } => commands::doctor::run(invocation, json),
    }
}

/// Logging follows the configured settings when the configuration loads;
/// otherwise warnings still reach stderr and the command reports the error.
fn init_logging(invocation: &Invocation) {
    match invocation.load() {
        Ok(config) => logging::init(Some(config.settings())),
        Err(_) => logging::init(None),
    }
}
