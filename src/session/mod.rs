//! Conversation session engine.
//!
//! [`SessionEngine`] owns the active conversation, the interaction state and
//! the in-memory registry of persisted conversations. Every mutation goes
//! through the engine; observers read snapshots from `watch` channels and
//! discrete happenings (first token, completed or failed reply) from a
//! broadcast channel.
//!
//! At most one send or regeneration flow runs at a time. Each flow is bound
//! to the conversation and placeholder it started with, and is cancelled as
//! soon as the user switches away, so late snapshots are never applied to a
//! different conversation.

mod flow;

use crate::ai::CompletionSource;
use crate::config::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_STREAM_TIMEOUT_SECS};
use crate::history::compare_recency;
use crate::reachability::NetworkMonitor;
use crate::store::{ConversationStore, StoreError};
use crate::title::generate_title;
use crate::types::{ChatFailure, ChatState, Conversation, Message, Rating};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use flow::PendingFlow;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Deadline for a whole streaming reply.
    pub stream_timeout: Duration,
    /// Longest allowed silence between two snapshots.
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stream_timeout: Duration::from_secs(DEFAULT_STREAM_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// First snapshot of a reply arrived. Fired once per flow.
    FirstToken {
        conversation_id: Uuid,
        message_id: Uuid,
    },
    ResponseCompleted {
        conversation_id: Uuid,
        message_id: Uuid,
    },
    ResponseFailed {
        conversation_id: Uuid,
        failure: ChatFailure,
    },
}

/// The send or regeneration currently in flight.
struct Flow {
    conversation_id: Uuid,
    placeholder_id: Uuid,
    cancel: CancellationToken,
    /// Reply removed by a regeneration, put back if the new one fails.
    restore: Option<(usize, Message)>,
}

struct Core {
    active: Conversation,
    state: ChatState,
    registry: HashMap<Uuid, Conversation>,
    /// Deleted this session; a save finishing late must not resurrect them.
    deleted: HashSet<Uuid>,
    /// Set once the user opens, starts or deletes a conversation.
    user_switched: bool,
    flow: Option<Flow>,
}

impl Core {
    fn owns(&self, pending: &PendingFlow) -> bool {
        self.active.id == pending.conversation_id
            && self
                .flow
                .as_ref()
                .is_some_and(|flow| flow.placeholder_id == pending.placeholder_id)
    }

    fn cancel_flow(&mut self) {
        if let Some(flow) = self.flow.take() {
            tracing::debug!(conversation_id = %flow.conversation_id, "cancelling in-flight reply");
            flow.cancel.cancel();
        }
    }

    fn replace_active(&mut self, conversation: Conversation) {
        self.cancel_flow();
        self.active = conversation;
        self.state = ChatState::Idle;
        self.user_switched = true;
    }

    fn record_saved(&mut self, conversation: Conversation) {
        if !self.deleted.contains(&conversation.id) {
            self.registry.insert(conversation.id, conversation);
        }
    }

    fn sorted_registry(&self) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> = self.registry.values().cloned().collect();
        conversations.sort_by(compare_recency);
        conversations
    }
}

struct Shared {
    core: Mutex<Core>,
    /// Serializes writes so a rating save never interleaves with a reply save.
    persist: tokio::sync::Mutex<()>,
    store: Arc<dyn ConversationStore>,
    source: Arc<dyn CompletionSource>,
    monitor: Arc<NetworkMonitor>,
    config: SessionConfig,
    state_tx: watch::Sender<ChatState>,
    active_tx: watch::Sender<Conversation>,
    registry_tx: watch::Sender<Vec<Conversation>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Push the state and active conversation to observers.
    fn publish(&self, core: &Core) {
        self.state_tx.send_if_modified(|state| {
            if *state == core.state {
                false
            } else {
                *state = core.state.clone();
                true
            }
        });
        self.active_tx.send_replace(core.active.clone());
    }

    fn publish_registry(&self, core: &Core) {
        self.registry_tx.send_replace(core.sorted_registry());
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Handle to the session engine. Clones share the same session.
#[derive(Clone)]
pub struct SessionEngine {
    shared: Arc<Shared>,
}

impl SessionEngine {
    /// Build an engine with a fresh, empty active conversation. Nothing is
    /// read from storage; see [`SessionEngine::start`].
    pub fn new(
        store: Arc<dyn ConversationStore>,
        source: Arc<dyn CompletionSource>,
        monitor: Arc<NetworkMonitor>,
        config: SessionConfig,
    ) -> Self {
        let active = Conversation::new();
        let (state_tx, _) = watch::channel(ChatState::Idle);
        let (active_tx, _) = watch::channel(active.clone());
        let (registry_tx, _) = watch::channel(Vec::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    active,
                    state: ChatState::Idle,
                    registry: HashMap::new(),
                    deleted: HashSet::new(),
                    user_switched: false,
                    flow: None,
                }),
                persist: tokio::sync::Mutex::new(()),
                store,
                source,
                monitor,
                config,
                state_tx,
                active_tx,
                registry_tx,
                events,
            }),
        }
    }

    /// Build an engine and restore the previous session in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        store: Arc<dyn ConversationStore>,
        source: Arc<dyn CompletionSource>,
        monitor: Arc<NetworkMonitor>,
        config: SessionConfig,
    ) -> (Self, JoinHandle<()>) {
        let engine = Self::new(store, source, monitor, config);
        let restore = engine.spawn_restore();
        (engine, restore)
    }

    pub fn state(&self) -> ChatState {
        self.shared.lock().state.clone()
    }

    pub fn active_conversation(&self) -> Conversation {
        self.shared.lock().active.clone()
    }

    /// Registry snapshot, most recently updated first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.shared.lock().sorted_registry()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChatState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe_conversation(&self) -> watch::Receiver<Conversation> {
        self.shared.active_tx.subscribe()
    }

    pub fn subscribe_registry(&self) -> watch::Receiver<Vec<Conversation>> {
        self.shared.registry_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Send `text` as a user message and stream the assistant reply into the
    /// active conversation. Resolves once the reply settles; dropping the
    /// returned future leaves the reply running.
    ///
    /// Blank text is ignored, as is a send while another reply is in flight.
    pub async fn send_message(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Some(pending) = self.begin_send(text) {
            self.run_flow(pending).await;
        }
    }

    fn begin_send(&self, text: &str) -> Option<PendingFlow> {
        let shared = &self.shared;
        let mut core = shared.lock();
        if core.flow.is_some() || core.state.is_busy() {
            tracing::warn!(conversation_id = %core.active.id, "ignoring send while a reply is in flight");
            return None;
        }

        let conversation_id = core.active.id;
        if !shared.monitor.is_connected() {
            tracing::info!(%conversation_id, "offline; not sending");
            core.state = ChatState::Error(ChatFailure::Offline);
            shared.publish(&core);
            shared.emit(SessionEvent::ResponseFailed {
                conversation_id,
                failure: ChatFailure::Offline,
            });
            return None;
        }

        let first_user_message = !core.active.has_user_message();
        core.active.messages.push(Message::user(text));
        if first_user_message {
            core.active.title = generate_title(text);
        }
        core.active.touch();

        let placeholder = Message::placeholder();
        let pending = PendingFlow {
            conversation_id,
            placeholder_id: placeholder.id,
            prompt: text.to_string(),
            cancel: CancellationToken::new(),
        };
        core.active.messages.push(placeholder);
        core.state = ChatState::Thinking;
        core.flow = Some(Flow {
            conversation_id,
            placeholder_id: pending.placeholder_id,
            cancel: pending.cancel.clone(),
            restore: None,
        });
        shared.publish(&core);
        tracing::debug!(%conversation_id, "sending message");
        Some(pending)
    }

    /// Replace an assistant reply with a freshly generated one, prompting with
    /// the user message right before it.
    ///
    /// No-op unless the session is idle and `message_id` names an assistant
    /// message directly preceded by a user message. Like
    /// [`SessionEngine::send_message`], the reply outlives a dropped future.
    pub async fn regenerate_response(&self, message_id: Uuid) {
        if let Some(pending) = self.begin_regenerate(message_id) {
            self.run_flow(pending).await;
        }
    }

    fn begin_regenerate(&self, message_id: Uuid) -> Option<PendingFlow> {
        let shared = &self.shared;
        let mut core = shared.lock();
        if !core.state.is_idle() || core.flow.is_some() {
            tracing::debug!(%message_id, "regeneration refused: session busy");
            return None;
        }

        let index = core.active.position(message_id)?;
        if core.active.messages[index].is_user() {
            return None;
        }
        let prompt = index
            .checked_sub(1)
            .map(|prev| &core.active.messages[prev])
            .filter(|prev| prev.is_user())?
            .content
            .clone();

        let conversation_id = core.active.id;
        if !shared.monitor.is_connected() {
            tracing::info!(%conversation_id, "offline; not regenerating");
            core.state = ChatState::Error(ChatFailure::Offline);
            shared.publish(&core);
            shared.emit(SessionEvent::ResponseFailed {
                conversation_id,
                failure: ChatFailure::Offline,
            });
            return None;
        }

        let (index, original) = core.active.remove_message(message_id)?;
        let placeholder = Message::placeholder();
        let pending = PendingFlow {
            conversation_id,
            placeholder_id: placeholder.id,
            prompt,
            cancel: CancellationToken::new(),
        };
        core.active.messages.insert(index, placeholder);
        core.state = ChatState::Thinking;
        core.flow = Some(Flow {
            conversation_id,
            placeholder_id: pending.placeholder_id,
            cancel: pending.cancel.clone(),
            restore: Some((index, original)),
        });
        shared.publish(&core);
        tracing::debug!(%conversation_id, %message_id, "regenerating reply");
        Some(pending)
    }

    /// Make `conversation` the active one and remember it as last active.
    pub async fn load_conversation(&self, conversation: Conversation) {
        let id = conversation.id;
        {
            let mut core = self.shared.lock();
            core.replace_active(conversation.settled());
            self.shared.publish(&core);
        }
        if let Err(e) = self.shared.store.save_last_active(id).await {
            tracing::warn!(conversation_id = %id, error = %e, "failed to record last active conversation");
        }
    }

    /// Switch to a new empty conversation. It is persisted with its first reply.
    pub fn start_new_conversation(&self) {
        let mut core = self.shared.lock();
        core.replace_active(Conversation::new());
        self.shared.publish(&core);
    }

    /// Drop a conversation from the registry and from storage. Deleting the
    /// active conversation starts a new one. A storage failure is logged and
    /// the in-memory removal stands.
    pub async fn delete_conversation(&self, id: Uuid) {
        {
            let mut core = self.shared.lock();
            core.registry.remove(&id);
            core.deleted.insert(id);
            if core.active.id == id {
                core.replace_active(Conversation::new());
                self.shared.publish(&core);
            }
            self.shared.publish_registry(&core);
        }

        let _persist = self.shared.persist.lock().await;
        match self.shared.store.delete(id).await {
            Ok(()) => tracing::info!(conversation_id = %id, "conversation deleted"),
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(conversation_id = %id, "deleted conversation was never saved")
            }
            Err(e) => tracing::error!(conversation_id = %id, error = %e, "failed to delete conversation"),
        }
    }

    /// Toggle `rating` on a message of the active conversation and persist.
    /// Messages still streaming cannot be rated. A storage failure is logged
    /// and the in-memory rating stands.
    pub async fn rate_message(&self, message_id: Uuid, rating: Rating) {
        let _persist = self.shared.persist.lock().await;

        let to_save = {
            let mut core = self.shared.lock();
            let in_flight = core.flow.is_some();
            let Some(message) = core.active.message_mut(message_id) else {
                tracing::debug!(%message_id, "rating ignored: message not in active conversation");
                return;
            };
            if message.is_streaming {
                return;
            }
            message.toggle_rating(rating);
            let new_rating = message.rating;
            self.shared.publish(&core);

            if in_flight {
                // Persist against the last saved copy so the unfinished
                // exchange stays out of storage. The reply save carries the
                // rating otherwise.
                core.registry.get(&core.active.id).cloned().map(|mut saved| {
                    if let Some(message) = saved.message_mut(message_id) {
                        message.rating = new_rating;
                    }
                    saved
                })
            } else {
                Some(core.active.settled())
            }
        };

        let Some(conversation) = to_save else {
            return;
        };
        match self.shared.store.save(&conversation).await {
            Ok(()) => {
                let mut core = self.shared.lock();
                core.record_saved(conversation);
                self.shared.publish_registry(&core);
            }
            Err(e) => {
                tracing::warn!(conversation_id = %conversation.id, error = %e, "failed to persist rating");
            }
        }
    }

    /// Return from an error state to idle.
    pub fn acknowledge_error(&self) {
        let mut core = self.shared.lock();
        if matches!(core.state, ChatState::Error(_)) {
            core.state = ChatState::Idle;
            self.shared.publish(&core);
        }
    }

    /// Refresh the registry from storage. Newer copies win per conversation.
    pub async fn load_conversations(&self) {
        let loaded = match self.shared.store.load_all().await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load conversations");
                return;
            }
        };

        let mut core = self.shared.lock();
        let count = loaded.len();
        for conversation in loaded {
            if core.deleted.contains(&conversation.id) {
                continue;
            }
            match core.registry.entry(conversation.id) {
                Entry::Occupied(mut entry) => {
                    if entry.get().updated_at < conversation.updated_at {
                        entry.insert(conversation);
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(conversation);
                }
            }
        }
        self.shared.publish_registry(&core);
        tracing::debug!(count, "conversations loaded");
    }

    pub fn spawn_restore(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.restore().await })
    }

    /// Load the registry and reopen the last active conversation. Failures
    /// leave the fresh conversation in place. A conversation the user already
    /// started typing into, or switched to, is never replaced.
    pub async fn restore(&self) {
        self.load_conversations().await;

        let last_active = match self.shared.store.load_last_active().await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read last active conversation");
                None
            }
        };
        let Some(id) = last_active else {
            return;
        };

        let cached = self.shared.lock().registry.get(&id).cloned();
        let conversation = match cached {
            Some(conversation) => conversation,
            None => match self.shared.store.load(id).await {
                Ok(Some(conversation)) => conversation,
                Ok(None) => {
                    tracing::debug!(conversation_id = %id, "last active conversation no longer exists");
                    return;
                }
                Err(e) => {
                    tracing::warn!(conversation_id = %id, error = %e, "failed to restore last active conversation");
                    return;
                }
            },
        };

        let mut core = self.shared.lock();
        let untouched = core.active.is_empty() && core.flow.is_none() && !core.user_switched;
        if untouched && !core.deleted.contains(&id) {
            core.active = conversation;
            self.shared.publish(&core);
            tracing::info!(conversation_id = %id, "restored last active conversation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let config = SessionConfig::default();
        assert_eq!(config.stream_timeout, Duration::from_secs(120));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_flow_ownership() {
        let mut core = Core {
            active: Conversation::new(),
            state: ChatState::Thinking,
            registry: HashMap::new(),
            deleted: HashSet::new(),
            user_switched: false,
            flow: None,
        };
        let pending = PendingFlow {
            conversation_id: core.active.id,
            placeholder_id: Uuid::new_v4(),
            prompt: "hi".to_string(),
            cancel: CancellationToken::new(),
        };
        assert!(!core.owns(&pending));

        core.flow = Some(Flow {
            conversation_id: pending.conversation_id,
            placeholder_id: pending.placeholder_id,
            cancel: pending.cancel.clone(),
            restore: None,
        });
        assert!(core.owns(&pending));

        core.replace_active(Conversation::new());
        assert!(!core.owns(&pending));
        assert!(pending.cancel.is_cancelled());
        assert_eq!(core.state, ChatState::Idle);
        assert!(core.user_switched);
    }
}
