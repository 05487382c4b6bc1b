//! Conversation transcript and the reducer that folds stream events into it.

use serde::Serialize;

use crate::messages::{Card, HistoryMessage, StreamEvent, DEFAULT_ERROR_TEXT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Opaque turn identifier. Local turns get `local-<kind>-<n>`; history turns keep the server id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TurnId(String);

impl TurnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One message in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
    pub cards: Vec<Card>,
    pub follow_ups: Vec<String>,
}

impl Turn {
    pub fn user(id: TurnId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            cards: Vec::new(),
            follow_ups: Vec::new(),
        }
    }

    /// Empty assistant turn, ready to receive stream events.
    pub fn assistant(id: TurnId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            cards: Vec::new(),
            follow_ups: Vec::new(),
        }
    }

    /// `None` for roles the transcript does not show (system, tool).
    pub fn from_history(row: HistoryMessage) -> Option<Self> {
        let role = match row.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => return None,
        };
        Some(Self {
            id: TurnId::new(row.id),
            role,
            content: row.content.unwrap_or_default(),
            cards: row.cards.unwrap_or_default(),
            follow_ups: row.follow_ups.unwrap_or_default(),
        })
    }

    /// No text and no cards yet. Follow-ups alone do not count.
    pub fn is_blank(&self) -> bool {
        self.content.is_empty() && self.cards.is_empty()
    }
}

/// Ordered turns of the active conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn get(&self, id: &TurnId) -> Option<&Turn> {
        self.turns.iter().find(|t| &t.id == id)
    }

    pub fn get_mut(&mut self, id: &TurnId) -> Option<&mut Turn> {
        self.turns.iter_mut().find(|t| &t.id == id)
    }

    /// Swap the turn `id` for `replacement` in place. Appends if `id` is gone.
    pub fn replace(&mut self, id: &TurnId, replacement: Turn) {
        match self.turns.iter().position(|t| &t.id == id) {
            Some(pos) => self.turns[pos] = replacement,
            None => self.turns.push(replacement),
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// What applying one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The turn changed.
    Updated,
    /// The backend minted the identity of a conversation that had none.
    ConversationAssigned(String),
    /// Nothing observable happened.
    Ignored,
}

/// Folds one stream's events into its open assistant turn.
#[derive(Debug, Clone)]
pub struct EventReducer {
    identity_known: bool,
}

impl EventReducer {
    /// `identity_known` is whether the session already has a conversation id.
    pub fn new(identity_known: bool) -> Self {
        Self { identity_known }
    }

    pub fn apply(&mut self, turn: &mut Turn, event: StreamEvent) -> Applied {
        match event {
            StreamEvent::Token(text) => {
                turn.content.push_str(&text);
                Applied::Updated
            }
            StreamEvent::Card(card) => {
                turn.cards.push(card);
                Applied::Updated
            }
            StreamEvent::FollowUps(questions) => {
                turn.follow_ups = questions;
                Applied::Updated
            }
            StreamEvent::Done {
                conversation_id: Some(id),
                ..
            } if !self.identity_known => {
                self.identity_known = true;
                Applied::ConversationAssigned(id)
            }
            StreamEvent::Done { .. } => Applied::Ignored,
            StreamEvent::Error(message) => {
                turn.content
                    .push_str(message.as_deref().unwrap_or(DEFAULT_ERROR_TEXT));
                Applied::Updated
            }
            StreamEvent::Unknown(kind) => {
                tracing::debug!(kind = %kind, "ignoring unknown event kind");
                Applied::Ignored
            }
        }
    }

    /// Apply `events` in order, returning any identity assigned along the way.
    #[cfg(test)]
    fn fold<I>(&mut self, turn: &mut Turn, events: I) -> Option<String>
    where
        I: IntoIterator<Item = StreamEvent>,
    {
        let mut assigned = None;
        for event in events {
            if let Applied::ConversationAssigned(id) = self.apply(turn, event) {
                assigned = Some(id);
            }
        }
        assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn card(title: &str) -> Card {
        Card {
            card_type: "data_report".into(),
            title: title.into(),
            data: json!({"plays": 12}),
            actions: vec![],
        }
    }

    fn open_turn() -> Turn {
        Turn::assistant(TurnId::new("a-1"))
    }

    #[test]
    fn tokens_and_cards_append_in_order() {
        let mut turn = open_turn();
        let mut reducer = EventReducer::new(false);
        reducer.fold(
            &mut turn,
            [
                StreamEvent::Token("A".into()),
                StreamEvent::Token("B".into()),
                StreamEvent::Card(card("C1")),
                StreamEvent::Token("!".into()),
            ],
        );
        assert_eq!(turn.content, "AB!");
        assert_eq!(turn.cards, vec![card("C1")]);
    }

    #[test]
    fn follow_ups_replace() {
        let mut turn = open_turn();
        EventReducer::new(false).fold(
            &mut turn,
            [
                StreamEvent::FollowUps(vec!["x".into(), "y".into()]),
                StreamEvent::FollowUps(vec!["z".into()]),
            ],
        );
        assert_eq!(turn.follow_ups, vec!["z".to_string()]);
    }

    #[test]
    fn identity_assigned_once() {
        let mut turn = open_turn();
        let mut reducer = EventReducer::new(false);
        let done = |id: &str| StreamEvent::Done {
            conversation_id: Some(id.into()),
            message_id: None,
        };
        assert_eq!(
            reducer.apply(&mut turn, done("c1")),
            Applied::ConversationAssigned("c1".into())
        );
        assert_eq!(reducer.apply(&mut turn, done("c2")), Applied::Ignored);
        assert!(turn.is_blank());
    }

    #[test]
    fn known_identity_is_never_reassigned() {
        let mut turn = open_turn();
        let assigned = EventReducer::new(true).fold(
            &mut turn,
            [StreamEvent::Done {
                conversation_id: Some("c9".into()),
                message_id: Some("m1".into()),
            }],
        );
        assert_eq!(assigned, None);
    }

    #[test]
    fn error_event_reads_as_text() {
        let mut turn = open_turn();
        EventReducer::new(false).fold(
            &mut turn,
            [
                StreamEvent::Token("partial ".into()),
                StreamEvent::Error(Some("backend busy".into())),
                StreamEvent::Error(None),
            ],
        );
        assert_eq!(turn.content, format!("partial backend busy{DEFAULT_ERROR_TEXT}"));
    }

    #[test]
    fn unknown_kinds_change_nothing() {
        let mut turn = open_turn();
        let before = turn.clone();
        let mut reducer = EventReducer::new(false);
        assert_eq!(
            reducer.apply(&mut turn, StreamEvent::Unknown("evidence".into())),
            Applied::Ignored
        );
        assert_eq!(turn, before);
    }

    #[test]
    fn history_skips_tool_rows() {
        let row = |role: &str| HistoryMessage {
            id: format!("{role}-1"),
            role: role.into(),
            content: Some("text".into()),
            cards: None,
            follow_ups: None,
        };
        assert!(Turn::from_history(row("tool")).is_none());
        let turn = Turn::from_history(row("assistant")).unwrap();
        assert_eq!(turn.role, Role::Assistant);
        assert!(turn.cards.is_empty());
    }

    #[test]
    fn replace_keeps_position() {
        let mut transcript = Transcript::new();
        transcript.push(Turn::user(TurnId::new("u"), "hi"));
        transcript.push(open_turn());
        let err = Turn {
            content: "boom".into(),
            ..Turn::assistant(TurnId::new("e"))
        };
        transcript.replace(&TurnId::new("a-1"), err.clone());
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.last(), Some(&err));
    }
}
