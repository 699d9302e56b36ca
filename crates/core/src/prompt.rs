use std::collections::HashSet;
use std::path::Path;

use crate::config::ConfigModel;
use crate::conversation::{ConversationContext, PROMPT_MESSAGE_PREVIEW};
use crate::errors::GridError;
use crate::profile::EffectiveAgentConfig;

/// Builds an agent's instruction text.
///
/// Sections appear in a fixed order and are separated by a blank line:
/// the base template (or the custom prompt), tool guidance, the path block,
/// and finally the conversation so far. Identical inputs give identical text.
#[derive(Clone, Debug, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(
        &self,
        effective: &EffectiveAgentConfig,
        context_path: Option<&str>,
        conversation: &ConversationContext,
        config: &ConfigModel,
    ) -> Result<String, GridError> {
        let mut sections = vec![base_section(effective, config)?];

        if let Some(tools) = tool_section(effective, config) {
            sections.push(tools);
        }
        sections.push(path_section(config, context_path));
        if !conversation.is_empty() {
            sections.push(format!(
                "Conversation so far:\n{}",
                conversation.transcript(PROMPT_MESSAGE_PREVIEW)
            ));
        }

        Ok(sections.join("\n\n"))
    }
}

fn base_section(effective: &EffectiveAgentConfig, config: &ConfigModel) -> Result<String, GridError> {
    let base = match effective.custom_prompt.as_deref().filter(|prompt| !prompt.trim().is_empty()) {
        Some(custom) => custom.trim_end().to_string(),
        None => config.get_prompt_template(&effective.base_prompt)?.trim_end().to_string(),
    };

    let instructions = effective.base_instructions.trim();
    if instructions.is_empty() {
        Ok(base)
    } else {
        Ok(format!("{base}\n\n{instructions}"))
    }
}

fn tool_section(effective: &EffectiveAgentConfig, config: &ConfigModel) -> Option<String> {
    let mut seen: HashSet<&String> = HashSet::new();
    let fragments = effective
        .tools
        .iter()
        .filter(|key| seen.insert(*key))
        .filter_map(|key| config.tools().get(key))
        .filter_map(|tool| tool.prompt_addition.as_deref())
        .map(str::trim)
        .filter(|addition| !addition.is_empty())
        .collect::<Vec<_>>();

    let rules = config
        .settings()
        .tools_common_rules
        .as_deref()
        .map(str::trim)
        .filter(|rules| !rules.is_empty());

    if effective.tools.is_empty() || (fragments.is_empty() && rules.is_none()) {
        return None;
    }

    let mut paragraphs = Vec::with_capacity(fragments.len() + 1);
    if let Some(rules) = rules {
        paragraphs.push(format!("Tool usage rules:\n{rules}"));
    }
    paragraphs.extend(fragments.into_iter().map(str::to_string));
    Some(paragraphs.join("\n\n"))
}

fn path_section(config: &ConfigModel, context_path: Option<&str>) -> String {
    let mut lines = vec![
        "Paths:".to_string(),
        format!("  Working directory: {}", display(config.working_directory())),
        format!("  Config directory: {}", display(config.config_directory())),
    ];

    if let Some(context_path) = context_path.filter(|path| !path.trim().is_empty()) {
        lines.push(format!("  Context path: {context_path}"));
        lines.push(format!(
            "  Absolute context path: {}",
            display(&config.absolute_path(context_path))
        ));
    }
    lines.join("\n")
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
