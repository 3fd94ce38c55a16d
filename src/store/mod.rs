//! Durable conversation storage.
//!
//! This module provides:
//! - [`ConversationStore`], the key-value contract the session engine persists through
//! - [`FileStore`], one JSON document per conversation under a data directory
//! - [`MemoryStore`], the same contract held in process memory
//!
//! Both implementations go through the versioned record codec in `record`,
//! so anything saved loads back as an equal value.

mod file;
mod memory;
mod record;

use crate::types::Conversation;
use async_trait::async_trait;
use uuid::Uuid;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use record::{RECORD_VERSION, decode_conversation, encode_conversation};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("conversation {0} not found")]
    NotFound(Uuid),

    #[error("corrupt record {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable mapping from conversation id to conversation, plus a single
/// "last active conversation" slot.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert or overwrite the record for `conversation.id`. Streaming
    /// placeholders are never written.
    async fn save(&self, conversation: &Conversation) -> StoreResult<()>;

    /// `Ok(None)` when no record exists.
    async fn load(&self, id: Uuid) -> StoreResult<Option<Conversation>>;

    /// Every readable record. Corrupt records are logged and skipped.
    async fn load_all(&self) -> StoreResult<Vec<Conversation>>;

    /// Fails with [`StoreError::NotFound`] when there is nothing to delete.
    async fn delete(&self, id: Uuid) -> StoreResult<()>;

    async fn save_last_active(&self, id: Uuid) -> StoreResult<()>;

    /// `Ok(None)` when no session was recorded.
    async fn load_last_active(&self) -> StoreResult<Option<Uuid>>;
}
