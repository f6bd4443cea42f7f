//! Authorization URL construction bound to a fresh state token.

use crate::error::LoginError;
use crate::registry::{Provider, ProviderRegistry};
use crate::state::CorrelationStore;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, thread_rng};
use ras_identity_core::SessionHandle;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// PKCE code challenge and verifier
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

impl PkceChallenge {
    /// Generate a new PKCE challenge
    pub fn new() -> Self {
        let code_verifier = Self::generate_code_verifier();
        let code_challenge = Self::generate_code_challenge(&code_verifier);

        Self {
            code_verifier,
            code_challenge,
            code_challenge_method: "S256".to_string(),
        }
    }

    fn generate_code_verifier() -> String {
        let mut rng = thread_rng();
        let bytes: Vec<u8> = (0..64).map(|_| rng.r#gen::<u8>()).collect();
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub(crate) fn generate_code_challenge(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// One login link per provider, as offered by a login page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginLink {
    pub provider: String,
    pub url: String,
}

/// Builds provider authorization URLs and records the pending logins
#[derive(Clone)]
pub struct LoginInitiator {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn CorrelationStore>,
    use_pkce: bool,
}

impl LoginInitiator {
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<dyn CorrelationStore>) -> Self {
        Self {
            registry,
            store,
            use_pkce: true,
        }
    }

    pub fn with_pkce(mut self, enabled: bool) -> Self {
        self.use_pkce = enabled;
        self
    }

    /// Authorization URL for `provider`, bound to `session` by a new state token.
    ///
    /// Every call registers a new pending login; URLs must not be cached
    /// across page renders.
    pub async fn build_login_url(
        &self,
        provider: &str,
        session: SessionHandle,
    ) -> Result<String, LoginError> {
        let provider = self
            .registry
            .get(provider)
            .await
            .ok_or_else(|| LoginError::UnknownProvider(provider.to_string()))?;

        self.authorization_url(&provider, session).await
    }

    /// Fresh login links for every registered provider
    pub async fn login_links(&self, session: SessionHandle) -> Result<Vec<LoginLink>, LoginError> {
        let mut links = Vec::new();
        for provider in self.registry.list().await {
            let url = self.authorization_url(&provider, session.clone()).await?;
            links.push(LoginLink {
                provider: provider.name,
                url,
            });
        }
        Ok(links)
    }

    async fn authorization_url(
        &self,
        provider: &Provider,
        session: SessionHandle,
    ) -> Result<String, LoginError> {
        let redirect_uri = provider
            .redirect_url
            .as_deref()
            .ok_or_else(|| LoginError::RedirectNotBound(provider.name.clone()))?;
        let mut url = Url::parse(&provider.metadata.authorization_endpoint)?;

        let pkce = self.use_pkce.then(PkceChallenge::new);
        let state = self
            .store
            .begin(
                session,
                &provider.name,
                pkce.as_ref().map(|p| p.code_verifier.clone()),
            )
            .await;

        let mut params = url.query_pairs_mut();
        params.append_pair("response_type", "code");
        params.append_pair("client_id", &provider.client_id);
        params.append_pair("redirect_uri", redirect_uri);
        params.append_pair("scope", &provider.scopes.join(" "));
        params.append_pair("state", &state);

        if let Some(pkce) = &pkce {
            params.append_pair("code_challenge", &pkce.code_challenge);
            params.append_pair("code_challenge_method", &pkce.code_challenge_method);
        }

        drop(params);

        debug!("Generated authorization URL for provider {}", provider.name);
        Ok(url.to_string())
    }
}
