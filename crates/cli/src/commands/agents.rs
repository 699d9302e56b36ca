use std::collections::BTreeMap;

use serde::Serialize;

use super::{render_json, CommandResult, Invocation};

#[derive(Debug, Serialize)]
struct AgentListing<'a> {
    default_agent: Option<&'a str>,
    agents: BTreeMap<&'a str, &'a str>,
}

pub fn run(invocation: &Invocation, json_output: bool) -> CommandResult {
    let config = match invocation.load() {
        Ok(config) => config,
        Err(error) => return CommandResult::from_error("agents", &error),
    };
    let listing = AgentListing { default_agent: config.default_agent(), agents: config.list_agents() };

    if json_output {
        return render_json("agents", &listing);
    }

    let mut lines = vec![format!("{} agent(s) configured:", listing.agents.len())];
    for (key, description) in &listing.agents {
        let marker = if listing.default_agent == Some(*key) { " (default)" } else { "" };
        lines.push(format!("- {key}{marker}: {description}"));
    }
    CommandResult::output(lines.join("\n"))
}
