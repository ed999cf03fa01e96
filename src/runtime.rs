//! Runtime for per-chat conversations
//!
//! The tracker owns the map from chat id to conversation state, serializes
//! work per chat, and executes the effects produced by the state machine.

mod commands;
mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use traits::*;

use crate::state_machine::{ChatId, Command, ConversationState, Flow, Identity, Input};
use crate::telegram::TelegramMessenger;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Type alias for the production tracker with concrete implementations
pub type ProductionTracker = ConversationTracker<DatabaseStorage, TelegramMessenger>;

/// Tunables for the tracker
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Pause between two broadcast deliveries
    pub broadcast_delay: Duration,
    /// Conversations idle for longer are evicted; `None` keeps them forever
    pub conversation_ttl: Option<Duration>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            broadcast_delay: Duration::from_millis(100),
            conversation_ttl: Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// One inbound update, already stripped of transport details
#[derive(Debug, Clone)]
pub struct Inbound {
    pub chat_id: ChatId,
    pub identity: Identity,
    pub body: InboundBody,
}

#[derive(Debug, Clone)]
pub enum InboundBody {
    Command(Command),
    Input(Input),
}

/// Read-only view used by the HTTP API
pub trait ConversationStats: Send + Sync {
    fn active_conversations(&self) -> usize;
}

/// Holds at most one conversation per chat and drives it to completion
pub struct ConversationTracker<S, M>
where
    S: Storage + 'static,
    M: Messenger + 'static,
{
    storage: S,
    messenger: M,
    codes: Arc<dyn CodeGenerator>,
    resources: Arc<dyn ResourceLocator>,
    authorizer: Arc<dyn BroadcastAuthorizer>,
    settings: TrackerSettings,
    states: Mutex<HashMap<ChatId, ConversationState>>,
    /// Held for the whole handling of one inbound update, fan-outs included
    chat_locks: Mutex<HashMap<ChatId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S, M> ConversationTracker<S, M>
where
    S: Storage + 'static,
    M: Messenger + 'static,
{
    pub fn new(
        storage: S,
        messenger: M,
        codes: Arc<dyn CodeGenerator>,
        resources: Arc<dyn ResourceLocator>,
        authorizer: Arc<dyn BroadcastAuthorizer>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            storage,
            messenger,
            codes,
            resources,
            authorizer,
            settings,
            states: Mutex::new(HashMap::new()),
            chat_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Process one inbound update. Updates for the same chat are handled one
    /// at a time; different chats never wait on each other.
    pub async fn handle(&self, inbound: Inbound) {
        let chat_id = inbound.chat_id;
        let lock = self.chat_lock(chat_id);
        let guard = lock.lock().await;

        match inbound.body {
            InboundBody::Command(command) => {
                self.handle_command(chat_id, &inbound.identity, command)
                    .await;
            }
            InboundBody::Input(input) => self.handle_input(chat_id, input).await,
        }

        drop(guard);
        self.release_chat_lock(chat_id, lock);
    }

    /// Snapshot of a chat's conversation
    pub fn state(&self, chat_id: ChatId) -> Option<ConversationState> {
        self.states().get(&chat_id).cloned()
    }

    /// Evict conversations idle since before `now - ttl`. Chats that are
    /// being handled right now are skipped. Returns the number evicted.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self
            .settings
            .conversation_ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        else {
            return 0;
        };
        let cutoff = now - ttl;

        let mut locks = self.chat_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut states = self.states();
        let before = states.len();

        states.retain(|chat_id, state| {
            if !state.is_idle_since(cutoff) {
                return true;
            }
            let busy = locks
                .get(chat_id)
                .is_some_and(|lock| lock.try_lock().is_err());
            if !busy {
                tracing::info!(
                    chat_id = %chat_id,
                    flow = %state.flow.kind(),
                    step = state.flow.step_name(),
                    "Evicting idle conversation"
                );
            }
            busy
        });

        // Locks of chats without a conversation are recreated on demand
        locks.retain(|chat_id, lock| states.contains_key(chat_id) || Arc::strong_count(lock) > 1);

        before - states.len()
    }

    /// Run `evict_idle` periodically. Does nothing when no TTL is configured.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let ttl = self.settings.conversation_ttl?;
        let tracker = Arc::clone(self);
        let period = (ttl / 4).max(Duration::from_secs(1));

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let evicted = tracker.evict_idle(Utc::now());
                if evicted > 0 {
                    tracing::debug!(evicted, "Conversation sweep finished");
                }
            }
        }))
    }

    fn chat_lock(&self, chat_id: ChatId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.chat_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(chat_id).or_default())
    }

    /// Drop the chat's lock entry once nobody holds or waits on it and the
    /// chat has no conversation left
    fn release_chat_lock(&self, chat_id: ChatId, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = self.chat_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let unused = locks
            .get(&chat_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1);
        if unused && !self.states().contains_key(&chat_id) {
            locks.remove(&chat_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.chat_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<ChatId, ConversationState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_flow(&self, chat_id: ChatId) -> Option<Flow> {
        self.states().get(&chat_id).map(|state| state.flow.clone())
    }

    /// Start a new flow, replacing whatever the chat was doing
    fn begin(&self, chat_id: ChatId, flow: Flow) {
        let kind = flow.kind();
        let previous = self
            .states()
            .insert(chat_id, ConversationState::new(chat_id, flow, Utc::now()));

        match previous {
            Some(old) => tracing::info!(
                chat_id = %chat_id,
                flow = %kind,
                replaced = %old.flow.kind(),
                "Conversation replaced"
            ),
            None => tracing::info!(chat_id = %chat_id, flow = %kind, "Conversation started"),
        }
    }

    fn store_flow(&self, chat_id: ChatId, flow: Flow) {
        let mut states = self.states();
        match states.get_mut(&chat_id) {
            Some(state) => {
                state.flow = flow;
                state.last_activity = Utc::now();
            }
            None => {
                states.insert(chat_id, ConversationState::new(chat_id, flow, Utc::now()));
            }
        }
    }

    /// Remove the chat's conversation; returns whether there was one
    fn clear(&self, chat_id: ChatId) -> bool {
        self.states().remove(&chat_id).is_some()
    }
}

impl<S, M> ConversationStats for ConversationTracker<S, M>
where
    S: Storage + 'static,
    M: Messenger + 'static,
{
    fn active_conversations(&self) -> usize {
        self.states().len()
    }
}
