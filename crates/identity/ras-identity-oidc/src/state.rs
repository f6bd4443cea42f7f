//! Login correlation: one-time state tokens mapped to pending sessions.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, thread_rng};
use ras_identity_core::SessionHandle;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Random bytes per state token (256 bits)
pub const STATE_TOKEN_BYTES: usize = 32;

/// Generate an unguessable, URL-safe state token.
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; STATE_TOKEN_BYTES];
    thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `seconds` as a duration, saturating at the largest representable span
fn ttl_from_seconds(seconds: u64) -> Duration {
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// A login attempt waiting for the provider's redirect
#[derive(Clone)]
pub struct PendingLogin {
    pub session: SessionHandle,
    pub provider: String,
    pub code_verifier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingLogin {
    pub fn new(
        session: SessionHandle,
        provider: String,
        code_verifier: Option<String>,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            session,
            provider,
            code_verifier,
            created_at,
            expires_at: created_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

impl fmt::Debug for PendingLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLogin")
            .field("session", &self.session.id())
            .field("provider", &self.provider)
            .field("code_verifier", &self.code_verifier.as_ref().map(|_| "***"))
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Storage of pending logins keyed by state token
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Mint a fresh state token bound to `session` and return it
    async fn begin(
        &self,
        session: SessionHandle,
        provider: &str,
        code_verifier: Option<String>,
    ) -> String;

    /// Look up and remove the pending login for `state` in one step.
    ///
    /// Returns `None` for unknown, already consumed and expired states alike.
    async fn resolve(&self, state: &str) -> Option<PendingLogin>;

    /// Drop expired entries, returning how many were removed
    async fn cleanup_expired(&self) -> usize;

    /// Number of pending logins
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// In-memory implementation of [`CorrelationStore`]
pub struct InMemoryCorrelationStore {
    pending: Mutex<HashMap<String, PendingLogin>>,
    ttl: Duration,
}

impl InMemoryCorrelationStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ttl: ttl_from_seconds(ttl_seconds),
        }
    }

    #[cfg(test)]
    pub(crate) async fn insert(&self, state: &str, login: PendingLogin) {
        self.pending.lock().await.insert(state.to_string(), login);
    }
}

impl Default for InMemoryCorrelationStore {
    fn default() -> Self {
        Self::new(600)
    }
}

#[async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    async fn begin(
        &self,
        session: SessionHandle,
        provider: &str,
        code_verifier: Option<String>,
    ) -> String {
        let login = PendingLogin::new(session, provider.to_string(), code_verifier, self.ttl);

        let mut pending = self.pending.lock().await;
        let mut state = generate_state_token();
        while pending.contains_key(&state) {
            state = generate_state_token();
        }
        pending.insert(state.clone(), login);
        state
    }

    async fn resolve(&self, state: &str) -> Option<PendingLogin> {
        let login = self.pending.lock().await.remove(state)?;

        if login.is_expired() {
            debug!("Discarded expired login for provider {}", login.provider);
            return None;
        }
        Some(login)
    }

    async fn cleanup_expired(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let now = Utc::now();
        let before = pending.len();
        pending.retain(|_, login| now <= login.expires_at);
        before - pending.len()
    }

    async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Periodically evict expired pending logins until the handle is aborted.
pub fn spawn_sweeper(
    store: Arc<dyn CorrelationStore>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = store.cleanup_expired().await;
            if removed > 0 {
                debug!("Evicted {} expired pending logins", removed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_identity_core::Session;
    use ras_identity_session::MemorySession;
    use std::collections::HashSet;

    fn session() -> SessionHandle {
        Arc::new(MemorySession::new())
    }

    fn expired_login() -> PendingLogin {
        let mut login =
            PendingLogin::new(session(), "google".to_string(), None, Duration::minutes(5));
        login.expires_at = Utc::now() - Duration::minutes(1);
        login
    }

    #[test]
    fn test_state_token_entropy() {
        let token = generate_state_token();
        let decoded = URL_SAFE_NO_PAD.decode(&token).unwrap();
        assert_eq!(decoded.len(), STATE_TOKEN_BYTES);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn test_resolve_is_single_use() {
        let store = InMemoryCorrelationStore::new(300);
        let session = session();

        let state = store.begin(session.clone(), "google", None).await;
        let login = store.resolve(&state).await.unwrap();
        assert_eq!(login.session.id(), session.id());
        assert_eq!(login.provider, "google");

        assert!(store.resolve(&state).await.is_none());
        assert!(store.resolve(&state).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_state_never_resolves() {
        let store = InMemoryCorrelationStore::new(300);
        store.begin(session(), "google", None).await;

        assert!(store.resolve("never-issued").await.is_none());
        assert!(store.resolve("").await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_session_gets_distinct_states() {
        let store = InMemoryCorrelationStore::new(300);
        let session = session();

        let mut states = HashSet::new();
        for _ in 0..100 {
            states.insert(store.begin(session.clone(), "google", None).await);
        }
        assert_eq!(states.len(), 100);
        assert_eq!(store.len().await, 100);
    }

    #[tokio::test]
    async fn test_concurrent_resolve_is_exclusive() {
        let store = Arc::new(InMemoryCorrelationStore::new(300));
        let state = store.begin(session(), "google", None).await;

        let mut handles = vec![];
        for _ in 0..16 {
            let store = store.clone();
            let state = state.clone();
            handles.push(tokio::spawn(async move { store.resolve(&state).await.is_some() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_state_is_rejected() {
        let store = InMemoryCorrelationStore::new(300);
        store.insert("expired", expired_login()).await;

        assert!(store.resolve("expired").await.is_none());
        // Resolution still consumed the entry
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = InMemoryCorrelationStore::new(300);
        store.insert("expired", expired_login()).await;
        let live = store.begin(session(), "google", Some("verifier".to_string())).await;

        assert_eq!(store.cleanup_expired().await, 1);
        assert_eq!(store.len().await, 1);
        let login = store.resolve(&live).await.unwrap();
        assert_eq!(login.code_verifier.as_deref(), Some("verifier"));
    }

    #[tokio::test]
    async fn test_sweeper_evicts_expired_logins() {
        let store = Arc::new(InMemoryCorrelationStore::new(300));
        store.insert("expired", expired_login()).await;

        let handle = spawn_sweeper(store.clone(), std::time::Duration::from_millis(10));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.abort();

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_huge_ttl_saturates() {
        assert_eq!(ttl_from_seconds(u64::MAX), Duration::MAX);
        assert_eq!(ttl_from_seconds(600), Duration::minutes(10));

        let login = PendingLogin::new(session(), "google".to_string(), None, Duration::MAX);
        assert_eq!(login.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!login.is_expired());

        let store = InMemoryCorrelationStore::new(u64::MAX);
        let state = store.begin(session(), "google", None).await;
        assert!(store.resolve(&state).await.is_some());
    }

    #[test]
    fn test_debug_hides_code_verifier() {
        let login = PendingLogin::new(
            session(),
            "google".to_string(),
            Some("super-secret".to_string()),
            Duration::minutes(5),
        );
        let debug = format!("{:?}", login);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("google"));
    }
}
