use super::{SessionEngine, SessionEvent};
use crate::types::{ChatFailure, ChatState};
use futures::StreamExt;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a running flow needs to reach back into the session.
#[derive(Clone)]
pub(super) struct PendingFlow {
    pub conversation_id: Uuid,
    pub placeholder_id: Uuid,
    pub prompt: String,
    pub cancel: CancellationToken,
}

enum Outcome {
    Completed(String),
    Failed(ChatFailure),
    /// The session moved on; nothing left to apply.
    Abandoned,
}

impl SessionEngine {
    /// Run the flow on its own task so the engine, not the caller, owns it.
    /// Dropping the caller's future leaves the reply running to completion.
    pub(super) async fn run_flow(&self, pending: PendingFlow) {
        let engine = self.clone();
        let task = tokio::spawn({
            let pending = pending.clone();
            async move { engine.drive(pending).await }
        });
        if let Err(e) = task.await {
            tracing::error!(conversation_id = %pending.conversation_id, error = %e, "reply task failed");
            self.fail(&pending, ChatFailure::Other("reply task failed".to_string()));
        }
    }

    async fn drive(self, pending: PendingFlow) {
        let outcome = tokio::select! {
            _ = pending.cancel.cancelled() => Outcome::Abandoned,
            outcome = self.consume(&pending) => outcome,
        };

        match outcome {
            Outcome::Completed(content) => self.complete(&pending, content).await,
            Outcome::Failed(failure) => self.fail(&pending, failure),
            Outcome::Abandoned => {
                tracing::debug!(conversation_id = %pending.conversation_id, "reply abandoned");
            }
        }
    }

    async fn consume(&self, pending: &PendingFlow) -> Outcome {
        let deadline = Instant::now() + self.shared.config.stream_timeout;
        match timeout_at(deadline, self.stream_reply(pending)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(conversation_id = %pending.conversation_id, "reply exceeded stream deadline");
                Outcome::Failed(ChatFailure::Timeout)
            }
        }
    }

    async fn stream_reply(&self, pending: &PendingFlow) -> Outcome {
        let idle_timeout = self.shared.config.idle_timeout;
        let mut snapshots = match self.shared.source.stream(&pending.prompt).await {
            Ok(snapshots) => snapshots,
            Err(e) => return Outcome::Failed(e.into()),
        };

        let mut latest = String::new();
        loop {
            let next = match timeout(idle_timeout, snapshots.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!(conversation_id = %pending.conversation_id, "reply stalled");
                    return Outcome::Failed(ChatFailure::Timeout);
                }
            };
            match next {
                Some(Ok(snapshot)) => {
                    if !self.apply_snapshot(pending, &snapshot) {
                        return Outcome::Abandoned;
                    }
                    latest = snapshot;
                }
                Some(Err(e)) => return Outcome::Failed(e.into()),
                None => return Outcome::Completed(latest),
            }
        }
    }

    /// Overwrite the placeholder with the cumulative snapshot. Returns `false`
    /// once the flow no longer owns the active conversation.
    fn apply_snapshot(&self, pending: &PendingFlow, snapshot: &str) -> bool {
        let shared = &self.shared;
        let mut core = shared.lock();
        if !core.owns(pending) {
            return false;
        }
        let Some(placeholder) = core.active.message_mut(pending.placeholder_id) else {
            return false;
        };
        placeholder.content.clear();
        placeholder.content.push_str(snapshot);

        if core.state == ChatState::Thinking {
            core.state = ChatState::Streaming;
            shared.emit(SessionEvent::FirstToken {
                conversation_id: pending.conversation_id,
                message_id: pending.placeholder_id,
            });
        }
        shared.publish(&core);
        true
    }

    /// Freeze the reply, persist, then settle the session.
    async fn complete(&self, pending: &PendingFlow, content: String) {
        if content.trim().is_empty() {
            self.fail(pending, ChatFailure::Other("empty response".to_string()));
            return;
        }

        let shared = &self.shared;
        let _persist = shared.persist.lock().await;
        let conversation = {
            let mut core = shared.lock();
            if !core.owns(pending) {
                return;
            }
            let Some(reply) = core.active.message_mut(pending.placeholder_id) else {
                return;
            };
            reply.content = content;
            reply.is_streaming = false;
            core.active.clone()
        };

        let saved = shared.store.save(&conversation).await;

        let mut core = shared.lock();
        match saved {
            Ok(()) => {
                let conversation_id = conversation.id;
                core.record_saved(conversation);
                if core.owns(pending) {
                    core.flow = None;
                    core.state = ChatState::Idle;
                }
                shared.publish(&core);
                shared.publish_registry(&core);
                shared.emit(SessionEvent::ResponseCompleted {
                    conversation_id,
                    message_id: pending.placeholder_id,
                });
                tracing::debug!(%conversation_id, "reply saved");
            }
            Err(e) => {
                tracing::error!(conversation_id = %conversation.id, error = %e, "failed to save conversation");
                drop(core);
                self.fail(pending, e.into());
            }
        }
    }

    /// Roll the transcript back to where it was before the flow and surface
    /// the failure.
    fn fail(&self, pending: &PendingFlow, failure: ChatFailure) {
        let shared = &self.shared;
        let mut core = shared.lock();
        if !core.owns(pending) {
            return;
        }
        let restore = core.flow.take().and_then(|flow| flow.restore);
        core.active.remove_message(pending.placeholder_id);
        if let Some((index, original)) = restore {
            let index = index.min(core.active.messages.len());
            core.active.messages.insert(index, original);
        }
        core.state = ChatState::Error(failure.clone());
        shared.publish(&core);
        shared.emit(SessionEvent::ResponseFailed {
            conversation_id: pending.conversation_id,
            failure: failure.clone(),
        });
        tracing::warn!(conversation_id = %pending.conversation_id, %failure, "reply failed");
    }
}
