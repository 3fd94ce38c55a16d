use super::record::{decode_conversation, encode_conversation};
use super::{ConversationStore, StoreError, StoreResult};
use crate::types::Conversation;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

/// In-process store holding encoded records, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Uuid, String>>,
    last_active: Mutex<Option<Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&id)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn save(&self, conversation: &Conversation) -> StoreResult<()> {
        let raw = encode_conversation(conversation)?;
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conversation.id, raw);
        Ok(())
    }

    async fn load(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        let raw = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned();
        match raw {
            Some(raw) => decode_conversation(&raw, OffsetDateTime::now_utc())
                .map(Some)
                .map_err(|reason| StoreError::Corrupt {
                    path: format!("memory:{id}"),
                    reason,
                }),
            None => Ok(None),
        }
    }

    async fn load_all(&self) -> StoreResult<Vec<Conversation>> {
        let loaded_at = OffsetDateTime::now_utc();
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .filter_map(|(id, raw)| match decode_conversation(raw, loaded_at) {
                Ok(conversation) => Some(conversation),
                Err(reason) => {
                    tracing::warn!(conversation_id = %id, %reason, "skipping corrupt conversation record");
                    None
                }
            })
            .collect())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn save_last_active(&self, id: Uuid) -> StoreResult<()> {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
        Ok(())
    }

    async fn load_last_active(&self) -> StoreResult<Option<Uuid>> {
        Ok(*self.last_active.lock().unwrap_or_else(|e| e.into_inner()))
    }
}
