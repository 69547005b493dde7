//! Conversation state for the streaming chat client.
//!
//! A [`ChatSession`] owns one agent's [`Conversation`], runs turns over a
//! [`chat_transport::ChatClient`] and folds each stream into the
//! conversation with a [`Turn`].

pub mod cleanup;
pub mod conversation;
pub mod errors;
pub mod message;
pub mod observability;
pub mod persistence;
pub mod prelude;
pub mod reconciler;
pub mod session;

pub use cleanup::clean;
pub use conversation::{Conversation, MAX_HISTORY_CHARS, merge_history};
pub use errors::{SessionError, StoreError};
pub use message::{Author, ConversationMessage, MessageId};
pub use observability::init_observability;
pub use persistence::{ConversationStore, JsonFileStore, MemoryStore};
pub use reconciler::{Applied, CANCELLED_NOTICE, Turn, TurnStatus, failure_notice};
pub use session::{ChatSession, HISTORY_LIMIT, TurnOutcome, TurnUpdate};
