//! HTTP/SSE message types exchanged with the assistant backend. Client ↔ server JSON.

use serde::{Deserialize, Serialize};

/// Text appended for an `error` event that carries no message.
pub const DEFAULT_ERROR_TEXT: &str = "Something went wrong.";

/// Client → server: chat request body for `POST /chat`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, conversation_id: Option<&str>) -> Self {
        Self {
            message: message.into(),
            conversation_id: conversation_id.map(str::to_string),
        }
    }
}

/// What a card action does when activated. The set is open: a type this
/// client does not know is kept verbatim so the card survives re-serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    /// Feeds a prompt back into the conversation.
    Callback,
    #[default]
    Link,
    Deeplink,
    Other(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Callback => "callback",
            Self::Link => "link",
            Self::Deeplink => "deeplink",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ActionType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "callback" => Self::Callback,
            "link" => Self::Link,
            "deeplink" => Self::Deeplink,
            _ => Self::Other(name),
        }
    }
}

impl From<ActionType> for String {
    fn from(action_type: ActionType) -> Self {
        match action_type {
            ActionType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// A button attached to a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub label: String,
    #[serde(default)]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Action {
    /// Prompt to send when a `callback` action is activated: `payload.action`
    /// if it is a non-empty string, otherwise the label. `None` for
    /// non-callback actions.
    pub fn callback_prompt(&self) -> Option<&str> {
        if !matches!(self.action_type, ActionType::Callback) {
            return None;
        }
        let from_payload = self
            .payload
            .as_ref()
            .and_then(|p| p.get("action"))
            .and_then(|a| a.as_str())
            .filter(|a| !a.trim().is_empty());
        Some(from_payload.unwrap_or(&self.label))
    }
}

/// Rich data panel. `data` is interpreted only by the card renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub card_type: String,
    pub title: String,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Server → client: one decoded stream event; discriminator is the JSON "type" field.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Card(Card),
    FollowUps(Vec<String>),
    Done {
        conversation_id: Option<String>,
        message_id: Option<String>,
    },
    Error(Option<String>),
    /// Any `type` this client does not understand. Applying it is a no-op.
    Unknown(String),
}

#[derive(Deserialize)]
struct TokenPayload {
    content: String,
}

#[derive(Deserialize)]
struct CardPayload {
    card: Card,
}

#[derive(Deserialize)]
struct DonePayload {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
}

impl StreamEvent {
    /// Decode one event object. Errors only for payloads that claim a known
    /// type but do not carry its required fields.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        let Some(typ) = value.get("type").and_then(|t| t.as_str()) else {
            return Ok(StreamEvent::Unknown(String::new()));
        };
        match typ {
            "token" => {
                let m: TokenPayload =
                    serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(StreamEvent::Token(m.content))
            }
            "card" => {
                let m: CardPayload =
                    serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(StreamEvent::Card(m.card))
            }
            "follow_ups" => {
                let questions = value
                    .get("questions")
                    .and_then(|q| serde_json::from_value::<Vec<String>>(q.clone()).ok())
                    .unwrap_or_default();
                Ok(StreamEvent::FollowUps(questions))
            }
            "done" => {
                let m: DonePayload =
                    serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
                Ok(StreamEvent::Done {
                    conversation_id: m.conversation_id.filter(|id| !id.is_empty()),
                    message_id: m.message_id,
                })
            }
            "error" => {
                let content = value
                    .get("content")
                    .and_then(|c| c.as_str())
                    .filter(|c| !c.is_empty())
                    .map(str::to_string);
                Ok(StreamEvent::Error(content))
            }
            other => Ok(StreamEvent::Unknown(other.to_string())),
        }
    }
}

/// Server → client: one entry of `GET /conversations`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub updated_at: String,
    #[serde(default)]
    pub message_count: u64,
}

/// Server → client: one entry of `GET /quick-actions`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QuickAction {
    pub id: String,
    pub icon: String,
    pub label: String,
    pub prompt: String,
}

/// Server → client: one stored message of `GET /conversations/{id}/messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub cards: Option<Vec<Card>>,
    #[serde(default)]
    pub follow_ups: Option<Vec<String>>,
}
