use std::fmt;

use chat_transport::HistoryRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a conversation message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// A fresh random id (32 lowercase hex digits).
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Who wrote a message. Serialized as `me`, `system`, or the agent id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Author {
    User,
    System,
    Agent(String),
}

impl Author {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "me",
            Self::System => "system",
            Self::Agent(agent) => agent,
        }
    }
}

impl From<String> for Author {
    fn from(value: String) -> Self {
        match value.as_str() {
            "me" => Self::User,
            "system" => Self::System,
            _ => Self::Agent(value),
        }
    }
}

impl From<Author> for String {
    fn from(value: Author) -> Self {
        match value {
            Author::Agent(agent) => agent,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bubble of the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: MessageId,
    #[serde(rename = "from")]
    pub author: Author,
    pub text: String,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(author: Author, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            author,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Author::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Author::System, text)
    }

    pub fn agent(agent: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Author::Agent(agent.into()), text)
    }

    /// Builds a message from a history record, filling in missing fields with
    /// a fresh id, the `system` author, empty text, and the current time.
    pub fn from_history(record: HistoryRecord) -> Self {
        let timestamp = record
            .ts
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Self {
            id: record.id.map(MessageId).unwrap_or_default(),
            author: record.from.map(Author::from).unwrap_or(Author::System),
            text: record.text.unwrap_or_default(),
            timestamp,
        }
    }
}
