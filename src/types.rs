use crate::ai::CompletionError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Title every conversation carries until its first user message arrives.
pub const DEFAULT_TITLE: &str = "New Chat";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Feedback left on a message. Absence of a rating is `None`, never a third variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rating {
    ThumbsUp,
    ThumbsDown,
}

impl Rating {
    /// Raw value used in persisted records.
    pub fn as_raw(self) -> i8 {
        match self {
            Rating::ThumbsUp => 1,
            Rating::ThumbsDown => -1,
        }
    }

    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            1 => Some(Rating::ThumbsUp),
            -1 => Some(Rating::ThumbsDown),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub role: Role,
    pub created_at: OffsetDateTime,
    pub is_streaming: bool,
    pub rating: Option<Rating>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            role: Role::User,
            created_at: OffsetDateTime::now_utc(),
            is_streaming: false,
            rating: None,
        }
    }

    /// Empty assistant message shown while a reply is on its way.
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            content: String::new(),
            role: Role::Assistant,
            created_at: OffsetDateTime::now_utc(),
            is_streaming: true,
            rating: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Same rating twice clears it; a different rating replaces it.
    pub fn toggle_rating(&mut self, rating: Rating) {
        self.rating = if self.rating == Some(rating) {
            None
        } else {
            Some(rating)
        };
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Conversation {
    pub fn new() -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(Message::is_user)
    }

    pub fn position(&self, message_id: Uuid) -> Option<usize> {
        self.messages.iter().position(|msg| msg.id == message_id)
    }

    pub fn message(&self, message_id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|msg| msg.id == message_id)
    }

    pub fn message_mut(&mut self, message_id: Uuid) -> Option<&mut Message> {
        self.messages.iter_mut().find(|msg| msg.id == message_id)
    }

    pub fn remove_message(&mut self, message_id: Uuid) -> Option<(usize, Message)> {
        let index = self.position(message_id)?;
        Some((index, self.messages.remove(index)))
    }

    pub fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }

    /// Copy of the conversation as it may be written to storage: no in-flight placeholders.
    pub fn settled(&self) -> Conversation {
        Conversation {
            messages: self
                .messages
                .iter()
                .filter(|msg| !msg.is_streaming)
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Reason a send or regeneration failed, as shown to the user.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChatFailure {
    #[error("You appear to be offline. Check your connection and try again.")]
    Offline,

    #[error("The response took too long. Please try again.")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl From<CompletionError> for ChatFailure {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Offline => ChatFailure::Offline,
            CompletionError::Timeout => ChatFailure::Timeout,
            CompletionError::Transport(detail) => ChatFailure::Other(detail),
        }
    }
}

impl From<StoreError> for ChatFailure {
    fn from(err: StoreError) -> Self {
        ChatFailure::Other(format!("Failed to save conversation: {err}"))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ChatState {
    #[default]
    Idle,
    /// Request issued, no tokens yet.
    Thinking,
    /// Tokens arriving.
    Streaming,
    Error(ChatFailure),
}

impl ChatState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ChatState::Idle)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, ChatState::Thinking | ChatState::Streaming)
    }
}
