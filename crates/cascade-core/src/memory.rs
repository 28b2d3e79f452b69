//! Ordered message memory for the agent step loop.

use serde::{Deserialize, Serialize};

/// Author of a memory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instruction.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool result.
    Tool,
}

/// A single memory entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the entry.
    pub role: Role,
    /// Entry content. Empty content is legal (e.g. pure tool-call turns).
    pub content: String,
}

impl Message {
    /// System message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Tool message.
    #[must_use]
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// Ordered, bounded message memory.
///
/// Oldest entries are trimmed once the cap is exceeded, so a
/// long-running loop cannot grow memory without bound.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    messages: Vec<Message>,
    max_messages: usize,
}

/// Default message cap.
const DEFAULT_MAX_MESSAGES: usize = 100;

impl Default for Memory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl Memory {
    /// Create a memory bounded to `max_messages` entries.
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages,
        }
    }

    /// Append a message, trimming the oldest entries past the cap.
    pub fn add(&mut self, message: Message) {
        self.messages.push(message);
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            let _ = self.messages.drain(..excess);
        }
    }

    /// The most recent entry.
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// All entries, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the memory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_last() {
        let mut m = Memory::default();
        m.add(Message::user("hi"));
        m.add(Message::assistant("hello"));
        assert_eq!(m.len(), 2);
        assert_eq!(m.last().unwrap().role, Role::Assistant);
    }

    #[test]
    fn trims_oldest_past_cap() {
        let mut m = Memory::new(3);
        for i in 0..5 {
            m.add(Message::user(format!("m{i}")));
        }
        assert_eq!(m.len(), 3);
        assert_eq!(m.messages()[0].content, "m2");
        assert_eq!(m.last().unwrap().content, "m4");
    }

    #[test]
    fn clear_empties() {
        let mut m = Memory::default();
        m.add(Message::system("s"));
        m.clear();
        assert!(m.is_empty());
    }
}
