//! Keyed store for live conversation memory. Explicit, constructor-
//! injected component: bounded LRU capacity plus a sliding TTL measured
//! from the last write. Saves carry an optimistic version check so a
//! redelivered webhook can never clobber a newer pass over the same call.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;
use tokio::sync::Mutex;

use frontdesk_core::domain::call::CallId;
use frontdesk_core::memory::ConversationMemory;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("stale save for call {call_id}: stored version {stored}, attempted {attempted}")]
    VersionConflict { call_id: String, stored: u64, attempted: u64 },
    #[error("session payload codec failure: {0}")]
    Codec(String),
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// `None` means absent or expired; callers treat that as a new call,
    /// never as an error.
    async fn load(&self, call_id: &CallId) -> Result<Option<ConversationMemory>, SessionStoreError>;

    /// Persist after a committed turn. Bumps `memory.version` on success.
    async fn save(&self, memory: &mut ConversationMemory) -> Result<(), SessionStoreError>;

    async fn remove(&self, call_id: &CallId) -> Result<(), SessionStoreError>;
}

struct StoredSession {
    payload: String,
    version: u64,
    expires_at: Instant,
}

pub struct InMemorySessionStore {
    sessions: Mutex<LruCache<String, StoredSession>>,
    ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is clamped above zero");
        Self { sessions: Mutex::new(LruCache::new(capacity)), ttl }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Drop every expired entry; called opportunistically by deployments
    /// that want eager reclamation rather than lazy expiry on load.
    pub async fn prune_expired(&self) {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let expired = sessions
            .iter()
            .filter(|(_, session)| session.expires_at <= now)
            .map(|(call_id, _)| call_id.clone())
            .collect::<Vec<_>>();
        for call_id in expired {
            sessions.pop(&call_id);
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, call_id: &CallId) -> Result<Option<ConversationMemory>, SessionStoreError> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get(&call_id.0) else {
            return Ok(None);
        };
        if session.expires_at <= Instant::now() {
            sessions.pop(&call_id.0);
            return Ok(None);
        }
        let memory = serde_json::from_str(&session.payload)
            .map_err(|error| SessionStoreError::Codec(error.to_string()))?;
        Ok(Some(memory))
    }

    async fn save(&self, memory: &mut ConversationMemory) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.peek(&memory.call_id.0) {
            if existing.expires_at > Instant::now() && existing.version != memory.version {
                return Err(SessionStoreError::VersionConflict {
                    call_id: memory.call_id.0.clone(),
                    stored: existing.version,
                    attempted: memory.version,
                });
            }
        }

        memory.version += 1;
        let payload = serde_json::to_string(memory)
            .map_err(|error| SessionStoreError::Codec(error.to_string()))?;
        sessions.put(
            memory.call_id.0.clone(),
            StoredSession {
                payload,
                version: memory.version,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, call_id: &CallId) -> Result<(), SessionStoreError> {
        self.sessions.lock().await.pop(&call_id.0);
        Ok(())
    }
}
