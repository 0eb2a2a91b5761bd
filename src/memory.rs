//! Session conversation memory
//!
//! Append-only log of what the user has said, oldest first. Lives as long as
//! the session that owns it; nothing is ever removed, reordered or persisted.

#[derive(Debug, Default)]
pub struct ConversationMemory {
    entries: Vec<String>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` to the end of the log
    pub fn add(&mut self, text: impl Into<String>) {
        self.entries.push(text.into());
    }

    /// The whole log, oldest first
    pub fn get(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)] // Pairs with len()
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
