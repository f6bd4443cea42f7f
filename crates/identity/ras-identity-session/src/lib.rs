//! In-memory application sessions.
//!
//! [`MemorySession`] implements the [`Session`] capability used by identity
//! providers, and [`SessionStore`] keeps sessions addressable by id so a server
//! can map a browser cookie back to its session.

use ras_identity_core::{Session, SessionHandle};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// A session whose attributes live in process memory.
pub struct MemorySession {
    id: String,
    attrs: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attrs: RwLock::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn attr_keys(&self) -> Vec<String> {
        let attrs = self.attrs.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = attrs.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for MemorySession {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn set_attr(&self, key: &str, value: serde_json::Value) {
        let mut attrs = self.attrs.write().unwrap_or_else(|e| e.into_inner());
        attrs.insert(key.to_string(), value);
    }

    fn attr(&self, key: &str) -> Option<serde_json::Value> {
        let attrs = self.attrs.read().unwrap_or_else(|e| e.into_inner());
        attrs.get(key).cloned()
    }

    fn remove_attr(&self, key: &str) -> Option<serde_json::Value> {
        let mut attrs = self.attrs.write().unwrap_or_else(|e| e.into_inner());
        attrs.remove(key)
    }
}

/// Registry of live sessions keyed by session id.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<tokio::sync::RwLock<HashMap<String, Arc<MemorySession>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh session.
    pub async fn create(&self) -> SessionHandle {
        let session = Arc::new(MemorySession::new());
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session.clone());
        debug!("Created session {}", session.id);
        session
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|session| session.clone() as SessionHandle)
    }

    /// Look up the session for `id`, creating a new one when `id` is absent or
    /// unknown. The boolean is true when a session was created.
    pub async fn get_or_create(&self, id: Option<&str>) -> (SessionHandle, bool) {
        if let Some(id) = id {
            if let Some(session) = self.get(id).await {
                return (session, false);
            }
        }
        (self.create().await, true)
    }

    pub async fn remove(&self, id: &str) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(id)
            .map(|session| session as SessionHandle)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
