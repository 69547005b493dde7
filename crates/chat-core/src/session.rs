//! Per-agent chat session: wires the transport, the reconciler and the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chat_transport::{AbortHandle, ChatClient, StreamFailure, StreamRequest};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::conversation::{Conversation, MAX_HISTORY_CHARS, merge_history};
use crate::errors::SessionError;
use crate::message::{Author, ConversationMessage, MessageId};
use crate::persistence::ConversationStore;
use crate::reconciler::{Applied, Turn, TurnStatus, failure_notice};

/// Number of past messages requested when a session opens.
pub const HISTORY_LIMIT: usize = 200;

/// Visible change reported while a turn runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnUpdate {
    /// The user message and the assistant placeholder were appended.
    Started { user_id: MessageId, assistant_id: MessageId },
    /// The assistant text now reads `text`.
    Text { assistant_id: MessageId, text: String },
    /// The turn is over.
    Finished(TurnOutcome),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream completed. Empty `text` means the placeholder was dropped.
    Completed { assistant_id: MessageId, text: String },
    /// The stream failed and `notice` was appended as a system message.
    Failed { failure: StreamFailure, notice: String },
}

/// An assistant message that has not received any text yet.
fn is_placeholder(message: &ConversationMessage) -> bool {
    matches!(message.author, Author::Agent(_)) && message.text.trim().is_empty()
}

fn without_placeholders(messages: Vec<ConversationMessage>) -> Vec<ConversationMessage> {
    messages.into_iter().filter(|m| !is_placeholder(m)).collect()
}

/// Conversation with one agent.
///
/// Turns run one at a time. Sending while a turn is in flight cancels it,
/// waits for it to end, then starts the new one.
pub struct ChatSession {
    client: ChatClient,
    agent: String,
    conversation: Mutex<Conversation>,
    store: Arc<dyn ConversationStore>,
    active: Mutex<Option<(u64, AbortHandle)>>,
    turn_gate: Mutex<()>,
    next_turn: AtomicU64,
}

impl ChatSession {
    /// Starts a session with whatever `store` holds for `agent`, without
    /// contacting the server.
    pub fn new(
        client: ChatClient,
        agent: impl Into<String>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self, SessionError> {
        let agent = agent.into();
        let messages = without_placeholders(store.load(&agent)?);
        Ok(Self::with_conversation(
            client,
            Conversation::with_messages(agent, messages),
            store,
        ))
    }

    /// Selects `agent`: merges server history with the local copy, keeps the
    /// most recent messages, and saves the result.
    ///
    /// An unreachable history endpoint only logs a warning.
    pub async fn open(
        client: ChatClient,
        agent: impl Into<String>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self, SessionError> {
        let agent = agent.into();
        let server = match client.fetch_history(&agent, Some(HISTORY_LIMIT)).await {
            Ok(records) => records
                .into_iter()
                .map(ConversationMessage::from_history)
                .collect(),
            Err(error) => {
                warn!(agent = %agent, error = %error, "history unavailable, using local messages");
                Vec::new()
            }
        };
        let local = without_placeholders(store.load(&agent)?);

        let mut conversation = Conversation::with_messages(agent.clone(), merge_history(server, local));
        conversation.trim_to_budget(MAX_HISTORY_CHARS);
        store.save(&agent, conversation.messages())?;
        info!(agent = %agent, messages = conversation.len(), "conversation loaded");

        Ok(Self::with_conversation(client, conversation, store))
    }

    fn with_conversation(
        client: ChatClient,
        conversation: Conversation,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            client,
            agent: conversation.agent().to_string(),
            conversation: Mutex::new(conversation),
            store,
            active: Mutex::new(None),
            turn_gate: Mutex::new(()),
            next_turn: AtomicU64::new(0),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Copy of the current conversation.
    pub async fn snapshot(&self) -> Conversation {
        self.conversation.lock().await.clone()
    }

    /// Cancels the turn in flight, if any.
    pub async fn cancel_active(&self) -> bool {
        match self.active.lock().await.take() {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn send(&self, prompt: &str) -> Result<TurnOutcome, SessionError> {
        self.send_with(prompt, |_| {}).await
    }

    /// Runs one turn, reporting every visible change to `on_update`.
    ///
    /// Only a blank prompt is an error; every stream failure ends the turn
    /// with [`TurnOutcome::Failed`].
    pub async fn send_with<F>(&self, prompt: &str, mut on_update: F) -> Result<TurnOutcome, SessionError>
    where
        F: FnMut(TurnUpdate),
    {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SessionError::Validation("prompt is empty".into()));
        }

        // Registered before waiting on the gate so a later send can cancel
        // this one even before it starts.
        let seq = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let abort = AbortHandle::new();
        let previous = self.active.lock().await.replace((seq, abort.clone()));
        if let Some((superseded, handle)) = previous {
            info!(agent = %self.agent, superseded, "cancelling previous turn");
            handle.abort();
        }
        let _gate = self.turn_gate.lock().await;

        let mut turn = {
            let mut conversation = self.conversation.lock().await;
            let turn = Turn::begin(&mut conversation, prompt);
            self.persist(&conversation);
            turn
        };
        let assistant_id = turn.assistant_id().clone();

        info!(agent = %self.agent, turn = %assistant_id, "turn started");
        on_update(TurnUpdate::Started {
            user_id: turn.user_id().clone(),
            assistant_id: assistant_id.clone(),
        });

        let request = StreamRequest::new(prompt, self.agent.as_str());
        let mut stream = self.client.open(&request, abort.signal());
        while let Some(item) = stream.next_chunk().await {
            let mut conversation = self.conversation.lock().await;
            match turn.apply(&mut conversation, item) {
                Applied::Ignored => {}
                Applied::Updated => {
                    self.persist(&conversation);
                    let text = conversation
                        .get(&assistant_id)
                        .map(|m| m.text.clone())
                        .unwrap_or_default();
                    drop(conversation);
                    on_update(TurnUpdate::Text {
                        assistant_id: assistant_id.clone(),
                        text,
                    });
                }
                Applied::Completed | Applied::Failed => {
                    self.persist(&conversation);
                    break;
                }
            }
        }
        drop(stream);

        if !turn.is_finished() {
            let mut conversation = self.conversation.lock().await;
            turn.fail(
                &mut conversation,
                StreamFailure::Protocol {
                    message: "stream ended without a terminal item".into(),
                },
            );
            self.persist(&conversation);
        }

        {
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|(id, _)| *id == seq) {
                *active = None;
            }
        }

        let outcome = match turn.status() {
            TurnStatus::Failed(failure) => TurnOutcome::Failed {
                notice: failure_notice(failure),
                failure: failure.clone(),
            },
            _ => TurnOutcome::Completed {
                text: self
                    .conversation
                    .lock()
                    .await
                    .get(&assistant_id)
                    .map(|m| m.text.clone())
                    .unwrap_or_default(),
                assistant_id,
            },
        };
        match &outcome {
            TurnOutcome::Completed { assistant_id, text } => {
                info!(agent = %self.agent, turn = %assistant_id, chars = text.chars().count(), "turn completed")
            }
            TurnOutcome::Failed { failure, .. } => {
                warn!(agent = %self.agent, kind = failure.kind(), error = %failure, "turn failed")
            }
        }
        on_update(TurnUpdate::Finished(outcome.clone()));
        Ok(outcome)
    }

    /// Saves the conversation, leaving out assistant placeholders that have
    /// no text yet.
    fn persist(&self, conversation: &Conversation) {
        let messages = without_placeholders(conversation.messages().to_vec());
        match self.store.save(&self.agent, &messages) {
            Ok(()) => debug!(agent = %self.agent, count = messages.len(), "conversation persisted"),
            Err(error) => warn!(agent = %self.agent, error = %error, "failed to save conversation"),
        }
    }
}
