use std::collections::HashMap;

use crate::message::{Author, ConversationMessage, MessageId};

/// Combined text length kept when loading a conversation.
pub const MAX_HISTORY_CHARS: usize = 100_000;

/// Ordered messages exchanged with one agent.
///
/// Messages are addressed by id, never by position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conversation {
    agent: String,
    messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            messages: Vec::new(),
        }
    }

    pub fn with_messages(agent: impl Into<String>, messages: Vec<ConversationMessage>) -> Self {
        Self {
            agent: agent.into(),
            messages,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Appends a message and returns its id.
    pub fn push(&mut self, message: ConversationMessage) -> MessageId {
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    /// Replaces the text of message `id`. Returns `false` when it is gone.
    pub fn set_text(&mut self, id: &MessageId, text: String) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                message.text = text;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<ConversationMessage> {
        let index = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(index))
    }

    /// Keeps the most recent messages whose combined text length fits
    /// `budget` characters.
    pub fn trim_to_budget(&mut self, budget: usize) {
        let mut total = 0usize;
        let mut keep_from = self.messages.len();
        for (index, message) in self.messages.iter().enumerate().rev() {
            let len = message.text.chars().count();
            if total + len > budget {
                break;
            }
            total += len;
            keep_from = index;
        }
        self.messages.drain(..keep_from);
    }
}

/// Merges server history with locally stored messages.
///
/// Every server message is kept. A local message is dropped only when it
/// pairs up with a server message of the same `(author, text)`; each server
/// message absorbs at most one local copy, so repeated prompts survive. The
/// result is stably sorted by timestamp, server messages first on ties.
pub fn merge_history(
    server: Vec<ConversationMessage>,
    local: Vec<ConversationMessage>,
) -> Vec<ConversationMessage> {
    let mut unmatched: HashMap<(Author, String), usize> = HashMap::new();
    for message in &server {
        *unmatched
            .entry((message.author.clone(), message.text.clone()))
            .or_default() += 1;
    }

    let mut merged = server;
    for message in local {
        let key = (message.author.clone(), message.text.clone());
        match unmatched.get_mut(&key) {
            Some(count) if *count > 0 => *count -= 1,
            _ => merged.push(message),
        }
    }
    merged.sort_by_key(|m| m.timestamp);
    merged
}
