//! Background work spawned on behalf of a conversation.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};

use {
    switchyard_bus::{InboundMessage, InboundSender, SYSTEM_CHANNEL, meta},
    switchyard_common::time::short_id,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::processor::SessionRef;

/// Sender id used for subagent announcements.
pub const SUBAGENT_SENDER: &str = "subagent";

struct Running {
    origin: SessionRef,
    label: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    running: HashMap<String, Running>,
    by_session: HashMap<String, HashSet<String>>,
}

impl State {
    fn remove(&mut self, id: &str) -> Option<Running> {
        let running = self.running.remove(id)?;
        let key = running.origin.key();
        if let Some(ids) = self.by_session.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_session.remove(&key);
            }
        }
        Some(running)
    }
}

/// Diagnostic view of a running subagent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubagentInfo {
    pub id: String,
    pub label: String,
    pub session_key: String,
}

/// Tracks subagents by id and by owning session.
///
/// A subagent that finishes on its own deregisters and announces its result
/// as an inbound message on the `system` channel, addressed back to the
/// session that spawned it.
pub struct SubagentManager {
    announce: InboundSender,
    state: Mutex<State>,
}

impl SubagentManager {
    pub fn new(announce: InboundSender) -> Arc<Self> {
        Arc::new(Self {
            announce,
            state: Mutex::new(State::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start `work` for `origin` and return the subagent id.
    pub fn spawn<F, Fut>(
        self: &Arc<Self>,
        origin: SessionRef,
        label: impl Into<String>,
        work: F,
    ) -> String
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let id = short_id();
        let label = label.into();
        let token = CancellationToken::new();
        let session_key = origin.key();

        let mut state = self.state();
        let handle = tokio::spawn({
            let manager = Arc::clone(self);
            let id = id.clone();
            let token = token.clone();
            async move {
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    result = work(token.clone()) => Some(result),
                };
                let Some(result) = outcome else {
                    debug!(subagent_id = %id, "subagent cancelled");
                    return;
                };
                // Whoever removes the entry owns the outcome.
                let removed = manager.state().remove(&id);
                if let Some(running) = removed {
                    manager.announce_result(&id, &running, result);
                }
            }
        });
        state.by_session.entry(session_key.clone()).or_default().insert(id.clone());
        state.running.insert(id.clone(), Running {
            origin,
            label: label.clone(),
            token,
            handle,
        });
        drop(state);

        info!(subagent_id = %id, session_key = %session_key, label = %label, "subagent spawned");
        id
    }

    fn announce_result(&self, id: &str, running: &Running, result: anyhow::Result<String>) {
        let content = match result {
            Ok(output) => {
                info!(subagent_id = %id, label = %running.label, "subagent finished");
                format!("[Subagent '{}' completed]\n\n{output}", running.label)
            },
            Err(e) => {
                warn!(subagent_id = %id, label = %running.label, error = %e, "subagent failed");
                format!("[Subagent '{}' failed]\n\nError: {e:#}", running.label)
            },
        };
        let msg = InboundMessage::new(
            SYSTEM_CHANNEL,
            SUBAGENT_SENDER,
            running.origin.key(),
            content,
        )
        .with_meta(meta::SUBAGENT_ID, id)
        .with_meta(meta::REPLY_CHANNEL, running.origin.channel.clone())
        .with_meta(meta::REPLY_CHAT_ID, running.origin.chat_id.clone());
        if !self.announce.publish(msg) {
            warn!(subagent_id = %id, "bus closed, subagent result dropped");
        }
    }

    /// Cancel every subagent owned by `session_key` and wait for each to stop.
    ///
    /// Subagents that had already finished are not counted.
    pub async fn cancel_by_session(&self, session_key: &str) -> usize {
        let taken: Vec<Running> = {
            let mut state = self.state();
            let ids = state.by_session.remove(session_key).unwrap_or_default();
            ids.iter().filter_map(|id| state.running.remove(id)).collect()
        };

        let mut cancelled = 0;
        for running in &taken {
            if !running.handle.is_finished() {
                cancelled += 1;
            }
            running.token.cancel();
        }
        for running in taken {
            let _ = running.handle.await;
        }
        if cancelled > 0 {
            info!(session_key = %session_key, cancelled, "subagents cancelled");
        }
        cancelled
    }

    pub fn running_count(&self) -> usize {
        self.state().running.len()
    }

    pub fn list(&self, session_key: &str) -> Vec<SubagentInfo> {
        let state = self.state();
        let mut out: Vec<SubagentInfo> = state
            .by_session
            .get(session_key)
            .into_iter()
            .flatten()
            .filter_map(|id| {
                state.running.get(id).map(|r| SubagentInfo {
                    id: id.clone(),
                    label: r.label.clone(),
                    session_key: session_key.to_string(),
                })
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}
