//! Per-conversation session: sends prompts, drives stream → decoder → reducer,
//! and publishes the transcript after every applied event.
//!
//! Every send and every conversation switch bumps an epoch. A stream loop only
//! mutates the transcript while the epoch it started under is still current, so
//! a stream abandoned by a switch stops at its next frame without touching the
//! new conversation.
//!
//! Switches also bump a separate switch generation that sends leave alone, so
//! a history fetch still lands after a send made while it was in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio::sync::watch;

use crate::client::{ChatBackend, ClientError};
use crate::decoder::decode_stream;
use crate::messages::{Action, ChatRequest};
use crate::transcript::{Applied, EventReducer, Transcript, Turn, TurnId};

/// Result of one [`Session::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Empty input, or another send was still in flight. Nothing changed.
    Rejected,
    /// The stream ended and every event was applied.
    Completed,
    /// The transport failed; the transcript holds partial content or a diagnostic turn.
    Faulted,
    /// A newer send or a conversation switch took over; remaining events were discarded.
    Superseded,
}

type AssignedCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Default)]
struct State {
    transcript: Transcript,
    conversation_id: Option<String>,
    epoch: u64,
    switch_gen: u64,
    busy: bool,
    next_turn: u64,
}

impl State {
    fn next_id(&mut self, kind: &str) -> TurnId {
        self.next_turn += 1;
        TurnId::new(format!("local-{kind}-{}", self.next_turn))
    }

    /// Returns the new switch generation.
    fn reset(&mut self, conversation_id: Option<String>) -> u64 {
        self.epoch += 1;
        self.switch_gen += 1;
        self.busy = false;
        self.conversation_id = conversation_id;
        self.transcript.clear();
        self.switch_gen
    }
}

/// Text of the turn synthesized when the transport fails before any output.
pub fn network_error_text(err: &ClientError) -> String {
    format!("Network error: check that the backend service is running.\n\nDetails: {err}")
}

pub struct Session<B> {
    backend: B,
    state: Mutex<State>,
    updates: watch::Sender<Transcript>,
    on_assigned: Mutex<Option<AssignedCallback>>,
}

/// Clears `busy` when a send ends, however it ends, unless a newer epoch owns it.
struct BusyGuard<'a> {
    state: &'a Mutex<State>,
    epoch: u64,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.epoch == self.epoch {
            state.busy = false;
        }
    }
}

impl<B: ChatBackend> Session<B> {
    pub fn new(backend: B) -> Self {
        let (updates, _) = watch::channel(Transcript::new());
        Self {
            backend,
            state: Mutex::new(State::default()),
            updates,
            on_assigned: Mutex::new(None),
        }
    }

    /// Start inside an existing conversation without loading its history.
    pub fn with_conversation(backend: B, conversation_id: impl Into<String>) -> Self {
        let session = Self::new(backend);
        session.state().conversation_id = Some(conversation_id.into());
        session
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Called once when the backend mints an id for a conversation that had none.
    pub fn on_conversation_assigned<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self
            .on_assigned
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Receives a fresh transcript snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<Transcript> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> Transcript {
        self.state().transcript.clone()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.state().conversation_id.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &State) {
        self.updates.send_replace(state.transcript.clone());
    }

    fn notify_assigned(&self, id: &str) {
        let callback = self
            .on_assigned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(id);
        }
    }

    /// Send `text` and consume the reply stream to its end.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let message = text.trim();
        let (epoch, request, assistant_id, identity_known) = {
            let mut state = self.state();
            if message.is_empty() {
                return SendOutcome::Rejected;
            }
            if state.busy {
                tracing::debug!("send rejected: previous reply still streaming");
                return SendOutcome::Rejected;
            }
            state.busy = true;
            state.epoch += 1;
            let user_id = state.next_id("u");
            state.transcript.push(Turn::user(user_id, message));
            let assistant_id = state.next_id("a");
            state.transcript.push(Turn::assistant(assistant_id.clone()));
            self.publish(&state);
            let request = ChatRequest::new(message, state.conversation_id.as_deref());
            (
                state.epoch,
                request,
                assistant_id,
                state.conversation_id.is_some(),
            )
        };
        let _busy = BusyGuard {
            state: &self.state,
            epoch,
        };

        tracing::info!(epoch, conversation = ?request.conversation_id, "sending message");
        let outcome = self
            .drive(epoch, &request, &assistant_id, identity_known)
            .await;
        tracing::info!(epoch, ?outcome, "reply finished");
        outcome
    }

    /// Send the prompt behind a `callback` card action. Other actions are rejected.
    pub async fn send_action(&self, action: &Action) -> SendOutcome {
        match action.callback_prompt() {
            Some(prompt) => self.send(prompt).await,
            None => SendOutcome::Rejected,
        }
    }

    async fn drive(
        &self,
        epoch: u64,
        request: &ChatRequest,
        assistant_id: &TurnId,
        identity_known: bool,
    ) -> SendOutcome {
        let body = match self.backend.open_chat_stream(request).await {
            Ok(body) => body,
            Err(e) => return self.fault(epoch, assistant_id, &e),
        };
        let mut events = decode_stream(body);
        let mut reducer = EventReducer::new(identity_known);

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => return self.fault(epoch, assistant_id, &e),
            };
            let assigned = {
                let mut state = self.state();
                if state.epoch != epoch {
                    tracing::debug!(epoch, current = state.epoch, "dropping stale stream");
                    return SendOutcome::Superseded;
                }
                let Some(turn) = state.transcript.get_mut(assistant_id) else {
                    return SendOutcome::Superseded;
                };
                match reducer.apply(turn, event) {
                    Applied::Updated => {
                        self.publish(&state);
                        None
                    }
                    Applied::ConversationAssigned(id) if state.conversation_id.is_none() => {
                        state.conversation_id = Some(id.clone());
                        Some(id)
                    }
                    Applied::ConversationAssigned(_) | Applied::Ignored => None,
                }
            };
            if let Some(id) = assigned {
                tracing::info!(conversation = %id, "conversation created");
                self.notify_assigned(&id);
            }
        }

        if self.state().epoch != epoch {
            return SendOutcome::Superseded;
        }
        SendOutcome::Completed
    }

    fn fault(&self, epoch: u64, assistant_id: &TurnId, err: &ClientError) -> SendOutcome {
        let mut state = self.state();
        if state.epoch != epoch {
            return SendOutcome::Superseded;
        }
        tracing::warn!(error = %err, "chat stream failed");
        let blank = state
            .transcript
            .get(assistant_id)
            .map_or(true, Turn::is_blank);
        if blank {
            let mut diagnostic = Turn::assistant(state.next_id("e"));
            diagnostic.content = network_error_text(err);
            state.transcript.replace(assistant_id, diagnostic);
            self.publish(&state);
        }
        SendOutcome::Faulted
    }

    /// Leave the current conversation for a fresh one.
    pub fn new_conversation(&self) {
        let mut state = self.state();
        state.reset(None);
        self.publish(&state);
    }

    /// Switch to `id` and load its stored turns. Turns sent while the fetch
    /// was in flight stay after the loaded history.
    pub async fn open_conversation(&self, id: &str) -> Result<(), ClientError> {
        let switch_gen = {
            let mut state = self.state();
            let switch_gen = state.reset(Some(id.to_string()));
            self.publish(&state);
            switch_gen
        };
        let mut turns = self.backend.fetch_messages(id).await?;
        let mut state = self.state();
        if state.switch_gen != switch_gen {
            tracing::debug!(conversation = %id, "dropping history of abandoned conversation");
            return Ok(());
        }
        turns.extend(state.transcript.turns().iter().cloned());
        state.transcript = Transcript::from_turns(turns);
        self.publish(&state);
        Ok(())
    }

    /// Delete `id` on the backend; deleting the active conversation starts a new one.
    pub async fn delete_conversation(&self, id: &str) -> Result<(), ClientError> {
        self.backend.delete_conversation(id).await?;
        if self.conversation_id().as_deref() == Some(id) {
            self.new_conversation();
        }
        Ok(())
    }
}
