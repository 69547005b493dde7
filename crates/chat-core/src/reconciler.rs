//! Folds the chunk sequence of one turn into a single assistant message.

use chat_transport::{StreamFailure, StreamItem};
use tracing::debug;

use crate::cleanup::clean;
use crate::conversation::Conversation;
use crate::message::{ConversationMessage, MessageId};

/// System message appended when a turn is cancelled.
pub const CANCELLED_NOTICE: &str = "⚠️ stream cancelled";

/// Text of the system message that ends a failed turn.
pub fn failure_notice(failure: &StreamFailure) -> String {
    match failure {
        StreamFailure::Cancelled => CANCELLED_NOTICE.to_string(),
        other => format!("⚠️ stream error: {other}"),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnStatus {
    Streaming,
    Completed,
    Failed(StreamFailure),
}

/// Effect of applying one stream item to the conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The visible assistant text changed.
    Updated,
    /// Nothing changed.
    Ignored,
    /// The turn finished successfully.
    Completed,
    /// The turn ended with a system message.
    Failed,
}

/// State of one user turn.
///
/// The raw accumulated text is kept separately from what is shown so that
/// cleanup always runs over the full text and never feeds back into it.
#[derive(Debug)]
pub struct Turn {
    user_id: MessageId,
    assistant_id: MessageId,
    raw: String,
    shown: String,
    status: TurnStatus,
}

impl Turn {
    /// Appends the user message and an empty assistant placeholder.
    pub fn begin(conversation: &mut Conversation, prompt: &str) -> Self {
        let user_id = conversation.push(ConversationMessage::user(prompt));
        let agent = conversation.agent().to_string();
        let assistant_id = conversation.push(ConversationMessage::agent(agent, ""));
        debug!(user_id = %user_id, assistant_id = %assistant_id, "turn started");
        Self {
            user_id,
            assistant_id,
            raw: String::new(),
            shown: String::new(),
            status: TurnStatus::Streaming,
        }
    }

    pub fn user_id(&self) -> &MessageId {
        &self.user_id
    }

    pub fn assistant_id(&self) -> &MessageId {
        &self.assistant_id
    }

    pub fn status(&self) -> &TurnStatus {
        &self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status != TurnStatus::Streaming
    }

    /// Text accumulated so far, before cleanup.
    pub fn raw_text(&self) -> &str {
        &self.raw
    }

    /// Folds one stream item into `conversation`.
    pub fn apply(&mut self, conversation: &mut Conversation, item: StreamItem) -> Applied {
        if self.is_finished() {
            return Applied::Ignored;
        }
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(failure) => return self.fail(conversation, failure),
        };

        let mut applied = Applied::Ignored;
        let delta = chunk.delta();
        if !delta.trim().is_empty() {
            self.raw.push_str(delta);
            let shown = clean(&self.raw);
            if shown != self.shown {
                conversation.set_text(&self.assistant_id, shown.clone());
                self.shown = shown;
                applied = Applied::Updated;
            }
        }

        if chunk.is_done() {
            return self.complete(conversation);
        }
        applied
    }

    /// Ends the turn with a failure: the placeholder goes away and exactly
    /// one system message is appended.
    pub fn fail(&mut self, conversation: &mut Conversation, failure: StreamFailure) -> Applied {
        if self.is_finished() {
            return Applied::Ignored;
        }
        conversation.remove(&self.assistant_id);
        conversation.push(ConversationMessage::system(failure_notice(&failure)));
        self.status = TurnStatus::Failed(failure);
        Applied::Failed
    }

    fn complete(&mut self, conversation: &mut Conversation) -> Applied {
        if self.shown.trim().is_empty() {
            conversation.remove(&self.assistant_id);
        }
        self.status = TurnStatus::Completed;
        Applied::Completed
    }
}
