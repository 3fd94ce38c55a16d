//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream;
use jumpchat::ai::{CompletionError, CompletionResult, CompletionSource, SnapshotStream};
use jumpchat::reachability::NetworkMonitor;
use jumpchat::session::{SessionConfig, SessionEngine};
use jumpchat::store::{ConversationStore, MemoryStore, StoreError, StoreResult};
use jumpchat::types::Conversation;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// How the next `stream` call behaves.
pub enum Script {
    /// Yield these items in order, then end.
    Snapshots(Vec<CompletionResult<String>>),
    /// Yield whatever the test pushes into the paired sender.
    Channel(mpsc::UnboundedReceiver<CompletionResult<String>>),
    /// Never yield anything.
    Pending,
    /// Fail before any stream is opened.
    Refuse(CompletionError),
}

/// Completion source replaying scripted replies and recording every prompt.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<VecDeque<Script>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn reply(&self, snapshots: &[&str]) {
        self.push(Script::Snapshots(
            snapshots.iter().map(|s| Ok(s.to_string())).collect(),
        ));
    }

    /// Script a stream driven by the returned sender.
    pub fn channel(&self) -> mpsc::UnboundedSender<CompletionResult<String>> {
        let (tx, rx) = mpsc::unbounded();
        self.push(Script::Channel(rx));
        tx
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionSource for ScriptedSource {
    async fn send(&self, prompt: &str) -> CompletionResult<String> {
        let mut snapshots = self.stream(prompt).await?;
        let mut last = String::new();
        while let Some(snapshot) = snapshots.next().await {
            last = snapshot?;
        }
        Ok(last)
    }

    async fn stream(&self, prompt: &str) -> CompletionResult<SnapshotStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Snapshots(Vec::new()));
        match script {
            Script::Snapshots(items) => Ok(stream::iter(items).boxed()),
            Script::Channel(rx) => Ok(rx.boxed()),
            Script::Pending => Ok(stream::pending::<CompletionResult<String>>().boxed()),
            Script::Refuse(err) => Err(err),
        }
    }
}

/// [`MemoryStore`] with switchable save and delete failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_saves: AtomicBool,
    fail_deletes: AtomicBool,
    saves: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

fn disk_full() -> StoreError {
    StoreError::Io(io::Error::other("disk full"))
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn save(&self, conversation: &Conversation) -> StoreResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(conversation).await
    }

    async fn load(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        self.inner.load(id).await
    }

    async fn load_all(&self) -> StoreResult<Vec<Conversation>> {
        self.inner.load_all().await
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.delete(id).await
    }

    async fn save_last_active(&self, id: Uuid) -> StoreResult<()> {
        self.inner.save_last_active(id).await
    }

    async fn load_last_active(&self) -> StoreResult<Option<Uuid>> {
        self.inner.load_last_active().await
    }
}

pub fn online_monitor() -> Arc<NetworkMonitor> {
    let monitor = Arc::new(NetworkMonitor::new());
    monitor.initialize_manual(true);
    monitor
}

pub fn fast_config() -> SessionConfig {
    SessionConfig {
        stream_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(2),
    }
}

pub struct Harness {
    pub engine: SessionEngine,
    pub source: Arc<ScriptedSource>,
    pub store: Arc<FlakyStore>,
    pub monitor: Arc<NetworkMonitor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let source = ScriptedSource::new();
        let store = FlakyStore::new();
        let monitor = online_monitor();
        let engine = SessionEngine::new(store.clone(), source.clone(), monitor.clone(), config);
        Self {
            engine,
            source,
            store,
            monitor,
        }
    }
}

/// Poll until `check` holds, failing the test after two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
