use super::record::{LastActiveRecord, decode_conversation, decode_last_active, encode_conversation};
use super::{ConversationStore, StoreError, StoreResult};
use crate::types::Conversation;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use uuid::Uuid;

const CONVERSATIONS_DIR: &str = "conversations";
const LAST_ACTIVE_FILE: &str = "last_active.json";
const RECORD_EXTENSION: &str = "json";

/// One JSON document per conversation under `<root>/conversations/`, plus
/// `<root>/last_active.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn conversations_dir(&self) -> PathBuf {
        self.root.join(CONVERSATIONS_DIR)
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.conversations_dir()
            .join(format!("{}.{RECORD_EXTENSION}", id.as_hyphenated()))
    }

    fn last_active_path(&self) -> PathBuf {
        self.root.join(LAST_ACTIVE_FILE)
    }
}

/// Write through a sibling temp file so a crash never leaves a half-written record.
async fn write_atomic(path: &Path, contents: &str) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> StoreResult<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(e)),
    }
}

fn corrupt(path: &Path, reason: String) -> StoreError {
    StoreError::Corrupt {
        path: path.display().to_string(),
        reason,
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn save(&self, conversation: &Conversation) -> StoreResult<()> {
        let raw = encode_conversation(conversation)?;
        write_atomic(&self.record_path(conversation.id), &raw).await
    }

    async fn load(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        let path = self.record_path(id);
        let Some(raw) = read_optional(&path).await? else {
            return Ok(None);
        };
        decode_conversation(&raw, OffsetDateTime::now_utc())
            .map(Some)
            .map_err(|reason| corrupt(&path, reason))
    }

    async fn load_all(&self) -> StoreResult<Vec<Conversation>> {
        let dir = self.conversations_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let loaded_at = OffsetDateTime::now_utc();
        let mut conversations = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let raw = match fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable conversation record");
                    continue;
                }
            };
            match decode_conversation(&raw, loaded_at) {
                Ok(conversation) => conversations.push(conversation),
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "skipping corrupt conversation record");
                }
            }
        }
        Ok(conversations)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn save_last_active(&self, id: Uuid) -> StoreResult<()> {
        let raw = serde_json::to_string(&LastActiveRecord::new(id))?;
        write_atomic(&self.last_active_path(), &raw).await
    }

    async fn load_last_active(&self) -> StoreResult<Option<Uuid>> {
        let path = self.last_active_path();
        let Some(raw) = read_optional(&path).await? else {
            return Ok(None);
        };
        decode_last_active(&raw)
            .map(Some)
            .map_err(|reason| corrupt(&path, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_path_layout() {
        let store = FileStore::new("/data");
        let id = Uuid::parse_str("7d3c0a3e-8f52-4a4e-9a0b-0f3f1b7e2c11").unwrap();
        assert_eq!(
            store.record_path(id),
            PathBuf::from("/data/conversations/7d3c0a3e-8f52-4a4e-9a0b-0f3f1b7e2c11.json")
        );
        assert_eq!(store.last_active_path(), PathBuf::from("/data/last_active.json"));
    }

    #[tokio::test]
    async fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let convo = Conversation::new();
        store.save(&convo).await.unwrap();

        let mut names = Vec::new();
        let mut entries = fs::read_dir(store.conversations_dir()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec![format!("{}.json", convo.id)]);
    }

    #[tokio::test]
    async fn test_missing_directory_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("never-created"));
        assert!(store.load_all().await.unwrap().is_empty());
        assert_eq!(store.load_last_active().await.unwrap(), None);
    }
}
