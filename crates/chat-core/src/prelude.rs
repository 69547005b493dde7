//! Common imports for hosting a chat session.

pub use crate::{
    Author, ChatSession, Conversation, ConversationMessage, ConversationStore, JsonFileStore,
    MemoryStore, SessionError, TurnOutcome, TurnUpdate, init_observability,
};
pub use chat_transport::{ChatClient, StreamFailure, TransportConfig, TransportError};
