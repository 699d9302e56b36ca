use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ContextSharing, ContextStrategy};

/// Characters of each message kept when rendering history into a prompt.
pub const PROMPT_MESSAGE_PREVIEW: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::Tool => "Tool",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}

/// Ordered, role-tagged history of one session.
///
/// Append-only until [`ConversationContext::clear`]; when a history cap is
/// set the oldest messages are dropped first.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConversationContext {
    messages: Vec<Message>,
    max_history: Option<usize>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_history(max_history: usize) -> Self {
        Self { messages: Vec::new(), max_history: Some(max_history) }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message { role, content: content.into(), recorded_at: Utc::now() });
        if let Some(limit) = self.max_history {
            let overflow = self.messages.len().saturating_sub(limit);
            if overflow > 0 {
                self.messages.drain(..overflow);
            }
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }

    /// Numbered transcript, one line per message, each message cut to
    /// `preview` characters. Timestamps are left out so the output depends on
    /// content alone.
    pub fn transcript(&self, preview: usize) -> String {
        render_lines(self.messages.iter(), preview)
    }

    /// Input handed to an agent used as a tool, carrying as much of this
    /// conversation as the sharing policy allows.
    pub fn delegate_input(&self, sharing: &ContextSharing, task: &str) -> String {
        let visible = self
            .messages
            .iter()
            .filter(|message| sharing.include_tool_history || message.role != Role::Tool)
            .collect::<Vec<_>>();

        let selected: &[&Message] = match sharing.strategy {
            ContextStrategy::Minimal => &[],
            ContextStrategy::Conversation => {
                let depth = sharing.depth as usize;
                &visible[visible.len().saturating_sub(depth)..]
            }
            ContextStrategy::Full => &visible,
        };

        if selected.is_empty() {
            return task.to_string();
        }

        format!(
            "Conversation context:\n{}\n\nTask: {task}",
            render_lines(selected.iter().copied(), usize::MAX)
        )
    }
}

fn render_lines<'a>(messages: impl Iterator<Item = &'a Message>, preview: usize) -> String {
    messages
        .enumerate()
        .map(|(index, message)| {
            format!("{}. {}: {}", index + 1, message.role.label(), truncate(&message.content, preview))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversationContext, Role};
    use crate::config::{ContextSharing, ContextStrategy};

    fn sample() -> ConversationContext {
        let mut conversation = ConversationContext::new();
        conversation.push(Role::User, "list the files");
        conversation.push(Role::Tool, "file_list -> a.txt, b.txt");
        conversation.push(Role::Assistant, "There are two files.");
        conversation.push(Role::User, "summarize a.txt");
        conversation
    }

    #[test]
    fn history_cap_drops_oldest_messages() {
        let mut conversation = ConversationContext::with_max_history(2);
        conversation.push(Role::User, "one");
        conversation.push(Role::Assistant, "two");
        conversation.push(Role::User, "three");

        let contents =
            conversation.messages().iter().map(|m| m.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["two", "three"]);
        assert_eq!(conversation.last_user_message(), Some("three"));
    }

    #[test]
    fn transcript_truncates_long_messages_on_char_boundaries() {
        let mut conversation = ConversationContext::new();
        conversation.push(Role::User, "é".repeat(10));

        assert_eq!(conversation.transcript(4), "1. User: éééé...");
    }

    #[test]
    fn minimal_sharing_passes_task_only() {
        let sharing = ContextSharing { strategy: ContextStrategy::Minimal, ..ContextSharing::default() };
        assert_eq!(sample().delegate_input(&sharing, "do it"), "do it");
    }

    #[test]
    fn conversation_sharing_takes_last_depth_messages() {
        let sharing = ContextSharing {
            strategy: ContextStrategy::Conversation,
            depth: 2,
            include_tool_history: false,
        };
        let input = sample().delegate_input(&sharing, "do it");

        assert_eq!(
            input,
            "Conversation context:\n1. Assistant: There are two files.\n2. User: summarize a.txt\n\nTask: do it"
        );
    }

    #[test]
    fn full_sharing_respects_tool_history_flag() {
        let with_tools = ContextSharing {
            strategy: ContextStrategy::Full,
            depth: 1,
            include_tool_history: true,
        };
        let without_tools = ContextSharing { include_tool_history: false, ..with_tools };

        assert!(sample().delegate_input(&with_tools, "x").contains("Tool: file_list"));
        assert!(!sample().delegate_input(&without_tools, "x").contains("Tool: file_list"));
    }

    #[test]
    fn clear_empties_history() {
        let mut conversation = sample();
        conversation.clear();
        assert!(conversation.is_empty());
        assert_eq!(conversation.delegate_input(&ContextSharing::default(), "t"), "t");
    }
}
