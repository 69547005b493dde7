//! Local persistence of conversations, keyed by agent.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::debug;

use crate::errors::StoreError;
use crate::message::ConversationMessage;

/// Stores the full message list of each agent's conversation.
pub trait ConversationStore: Send + Sync {
    /// Messages saved for `agent`; empty when nothing was saved yet.
    fn load(&self, agent: &str) -> Result<Vec<ConversationMessage>, StoreError>;

    /// Replaces the saved messages for `agent`.
    fn save(&self, agent: &str, messages: &[ConversationMessage]) -> Result<(), StoreError>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: DashMap<String, Vec<ConversationMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for MemoryStore {
    fn load(&self, agent: &str) -> Result<Vec<ConversationMessage>, StoreError> {
        Ok(self
            .conversations
            .get(agent)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    fn save(&self, agent: &str, messages: &[ConversationMessage]) -> Result<(), StoreError> {
        self.conversations.insert(agent.to_string(), messages.to_vec());
        Ok(())
    }
}

/// One JSON file per agent inside a directory.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding `agent`'s conversation. The agent id is percent-encoded
    /// so any id maps to a distinct file name inside the directory.
    pub fn path_for(&self, agent: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(agent)))
    }
}

impl ConversationStore for JsonFileStore {
    fn load(&self, agent: &str) -> Result<Vec<ConversationMessage>, StoreError> {
        let path = self.path_for(agent);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&content).map_err(|source| StoreError::Json { path, source })
    }

    fn save(&self, agent: &str, messages: &[ConversationMessage]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(agent);
        let body = serde_json::to_vec_pretty(messages).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(agent, count = messages.len(), path = %path.display(), "conversation saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ConversationMessage> {
        vec![
            ConversationMessage::user("hi"),
            ConversationMessage::agent("bot", "hello"),
            ConversationMessage::system("⚠️ stream cancelled"),
        ]
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load("bot").expect("load").is_empty());
        let messages = sample();
        store.save("bot", &messages).expect("save");
        assert_eq!(store.load("bot").expect("load"), messages);
        assert!(store.load("other").expect("load").is_empty());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let messages = sample();
        JsonFileStore::new(dir.path()).save("bot", &messages).expect("save");

        let loaded = JsonFileStore::new(dir.path()).load("bot").expect("load");
        assert_eq!(loaded, messages);
        assert!(!dir.path().join("bot.json.tmp").exists());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().join("not-yet-created"));
        assert!(store.load("bot").expect("load").is_empty());
    }

    #[test]
    fn agent_names_are_sanitized() {
        let store = JsonFileStore::new("/tmp/chats");
        assert_eq!(store.path_for("llama-3_b"), PathBuf::from("/tmp/chats/llama-3_b.json"));
        assert_eq!(store.path_for("../x"), PathBuf::from("/tmp/chats/..%2Fx.json"));
        assert_ne!(store.path_for("a/b"), store.path_for("a_b"));
        assert_eq!(store.path_for("my agent").parent(), Some(Path::new("/tmp/chats")));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path());
        std::fs::write(store.path_for("bot"), "not json").expect("write");
        let err = store.load("bot").expect_err("corrupt file");
        assert!(matches!(err, StoreError::Json { .. }));
    }
}
