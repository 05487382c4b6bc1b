//! Streaming chat client core: decodes the assistant's SSE reply stream and
//! folds it into an observable conversation transcript.
//! Used by the `studio-chat` CLI; any other front end can drive [`Session`] the same way.

pub mod client;
pub mod config;
pub mod decoder;
pub mod messages;
pub mod session;
pub mod transcript;

pub use client::{ByteStream, ChatBackend, Client, ClientError};
pub use config::{default_config_path, Config, ConfigError, LogSection, ServerSection, StreamSection};
pub use decoder::{decode_stream, FrameDecoder, Utf8Accumulator};
pub use messages::{Action, ActionType, Card, ChatRequest, ConversationSummary, QuickAction, StreamEvent};
pub use session::{network_error_text, SendOutcome, Session};
pub use transcript::{Applied, EventReducer, Role, Transcript, Turn, TurnId};
