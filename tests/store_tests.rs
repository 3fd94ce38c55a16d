//! Integration tests for the conversation stores
//!
//! Exercises the file-backed store against a scratch directory

use jumpchat::store::{ConversationStore, FileStore, MemoryStore, StoreError};
use jumpchat::types::{Conversation, Message, Rating};
use tempfile::TempDir;
use uuid::Uuid;

fn sample_conversation() -> Conversation {
    let mut convo = Conversation::new();
    convo.title = "Rust lifetimes".to_string();
    convo.messages.push(Message::user("Explain lifetimes"));
    let mut reply = Message::placeholder();
    reply.content = "A lifetime names how long a borrow is valid.".to_string();
    reply.is_streaming = false;
    reply.rating = Some(Rating::ThumbsUp);
    convo.messages.push(reply);
    convo
}

mod file_store_tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let convo = sample_conversation();

        store.save(&convo).await.expect("Failed to save");
        let loaded = store.load(convo.id).await.expect("Failed to load");
        assert_eq!(loaded, Some(convo));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.load(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let mut convo = sample_conversation();
        store.save(&convo).await.unwrap();

        convo.messages[1].rating = None;
        convo.title = "Lifetimes, revisited".to_string();
        store.save(&convo).await.unwrap();

        let loaded = store.load(convo.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Lifetimes, revisited");
        assert_eq!(loaded.messages[1].rating, None);
        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_messages_are_not_written() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let mut convo = sample_conversation();
        convo.messages.push(Message::user("And variance?"));
        convo.messages.push(Message::placeholder());

        store.save(&convo).await.unwrap();
        let loaded = store.load(convo.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 3);
        assert!(loaded.messages.iter().all(|m| !m.is_streaming));
    }

    #[tokio::test]
    async fn test_load_all_skips_corrupt_records() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let first = sample_conversation();
        let second = Conversation::new();
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let conversations_dir = dir.path().join("conversations");
        std::fs::write(conversations_dir.join(format!("{}.json", Uuid::new_v4())), "{ truncated").unwrap();
        std::fs::write(conversations_dir.join("notes.txt"), "not a record").unwrap();

        let mut ids: Vec<Uuid> = store.load_all().await.unwrap().iter().map(|c| c.id).collect();
        ids.sort();
        let mut expected = vec![first.id, second.id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_load_corrupt_record_is_error() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let id = Uuid::new_v4();
        let conversations_dir = dir.path().join("conversations");
        std::fs::create_dir_all(&conversations_dir).unwrap();
        std::fs::write(conversations_dir.join(format!("{id}.json")), "[]").unwrap();

        assert!(matches!(store.load(id).await, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let convo = sample_conversation();
        store.save(&convo).await.unwrap();

        store.delete(convo.id).await.expect("Failed to delete");
        assert_eq!(store.load(convo.id).await.unwrap(), None);
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let id = Uuid::new_v4();
        assert!(matches!(
            store.delete(id).await,
            Err(StoreError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_records_survive_a_new_store_instance() {
        let dir = TempDir::new().unwrap();
        let convo = sample_conversation();
        FileStore::new(dir.path()).save(&convo).await.unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.load(convo.id).await.unwrap(), Some(convo));
    }
}

mod last_active_tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.load_last_active().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        store.save_last_active(first).await.unwrap();
        store.save_last_active(second).await.unwrap();
        assert_eq!(store.load_last_active().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_independent_of_conversation_records() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let convo = sample_conversation();
        store.save(&convo).await.unwrap();
        store.save_last_active(convo.id).await.unwrap();

        store.delete(convo.id).await.unwrap();
        assert_eq!(store.load_last_active().await.unwrap(), Some(convo.id));
        assert_eq!(store.load_all().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_pointer_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("last_active.json"), "nonsense").unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.load_last_active().await,
            Err(StoreError::Corrupt { .. })
        ));
    }
}

mod memory_store_tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_matches_file_store() {
        let dir = TempDir::new().unwrap();
        let file = FileStore::new(dir.path());
        let memory = MemoryStore::new();
        let convo = sample_conversation();

        file.save(&convo).await.unwrap();
        memory.save(&convo).await.unwrap();
        assert_eq!(
            file.load(convo.id).await.unwrap(),
            memory.load(convo.id).await.unwrap()
        );
    }
}
