//! Registry of configured identity providers.

use crate::config::{ProviderConfig, render_redirect};
use crate::discovery::{Discovery, IdTokenVerifier, ProviderMetadata};
use crate::error::{RegistrationError, RegistrationResult};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Scopes every provider requests regardless of configuration
pub const MANDATORY_SCOPES: &[&str] = &["openid", "email"];

/// Issuers of providers that can be registered by name alone
pub const WELL_KNOWN_ISSUERS: &[(&str, &str)] = &[
    ("Google", "https://accounts.google.com"),
    ("eBay", "https://openidconnect.ebay.com"),
    ("SalesForce", "https://login.salesforce.com"),
    ("Microsoft", "https://login.microsoftonline.com/common/v2.0"),
];

/// Issuer of a well-known provider
pub fn well_known_issuer(name: &str) -> Option<&'static str> {
    WELL_KNOWN_ISSUERS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, issuer)| *issuer)
}

/// Key used to look providers up; callback paths are lower-case.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}

/// Deduplicated scope list with the mandatory scopes first.
pub fn merge_scopes<S: AsRef<str>>(extra_scopes: &[S]) -> Vec<String> {
    let mut scopes: Vec<String> = MANDATORY_SCOPES.iter().map(|s| s.to_string()).collect();
    for scope in extra_scopes {
        let scope = scope.as_ref().trim();
        if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    scopes
}

/// A registered upstream identity provider
#[derive(Clone)]
pub struct Provider {
    pub name: String,
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub metadata: ProviderMetadata,
    pub verifier: Arc<dyn IdTokenVerifier>,
    /// Set once callback handlers are installed
    pub redirect_url: Option<String>,
}

impl Provider {
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("redirect_url", &self.redirect_url)
            .finish_non_exhaustive()
    }
}

/// Append-only set of providers.
///
/// Registration is expected during start-up; lookups happen concurrently
/// afterwards.
pub struct ProviderRegistry {
    discovery: Arc<dyn Discovery>,
    providers: RwLock<Vec<Provider>>,
}

impl ProviderRegistry {
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self {
            discovery,
            providers: RwLock::new(Vec::new()),
        }
    }

    async fn contains(&self, key: &str) -> bool {
        self.providers.read().await.iter().any(|p| p.key() == key)
    }

    /// Register a provider, resolving its endpoints through discovery.
    pub async fn register(
        &self,
        name: &str,
        issuer: Option<&str>,
        client_id: &str,
        client_secret: &str,
        extra_scopes: &[&str],
    ) -> RegistrationResult<()> {
        let issuer = match issuer.filter(|i| !i.is_empty()) {
            Some(issuer) => issuer.to_string(),
            None => well_known_issuer(name)
                .ok_or_else(|| RegistrationError::UnknownIssuer(name.to_string()))?
                .to_string(),
        };

        let key = normalize_name(name);
        if self.contains(&key).await {
            return Err(RegistrationError::AlreadyRegistered(name.to_string()));
        }

        // Network I/O happens without holding the lock
        let metadata = self.discovery.discover(&issuer).await.map_err(|source| {
            RegistrationError::DiscoveryFailed {
                provider: name.to_string(),
                source,
            }
        })?;
        let verifier = self.discovery.verifier(&metadata, client_id);

        let provider = Provider {
            name: name.to_string(),
            issuer,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scopes: merge_scopes(extra_scopes),
            metadata,
            verifier,
            redirect_url: None,
        };

        let mut providers = self.providers.write().await;
        if providers.iter().any(|p| p.key() == key) {
            return Err(RegistrationError::AlreadyRegistered(name.to_string()));
        }
        info!(
            "Registered provider {} (issuer {}, scopes {})",
            provider.name,
            provider.issuer,
            provider.scopes.join(" ")
        );
        providers.push(provider);
        Ok(())
    }

    /// Register every configured provider.
    ///
    /// A provider whose discovery fails is logged and skipped; any other error
    /// aborts. Returns the names of the providers that were registered.
    pub async fn register_all(
        &self,
        configs: &[ProviderConfig],
    ) -> RegistrationResult<Vec<String>> {
        let mut registered = Vec::new();
        for config in configs {
            let scopes: Vec<&str> = config.scopes.iter().map(String::as_str).collect();
            match self
                .register(
                    &config.name,
                    config.issuer.as_deref(),
                    &config.client_id,
                    &config.client_secret,
                    &scopes,
                )
                .await
            {
                Ok(()) => registered.push(config.name.clone()),
                Err(e @ RegistrationError::DiscoveryFailed { .. }) => {
                    warn!("Skipping provider {}: {}", config.name, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(registered)
    }

    /// Snapshot of all providers in registration order
    pub async fn list(&self) -> Vec<Provider> {
        self.providers.read().await.clone()
    }

    /// Look a provider up by name (case-insensitive)
    pub async fn get(&self, name: &str) -> Option<Provider> {
        let key = normalize_name(name);
        self.providers
            .read()
            .await
            .iter()
            .find(|p| p.key() == key)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }

    /// Compute every provider's redirect URL from `template`.
    ///
    /// Returns the providers with their redirect URLs set.
    pub async fn bind_redirects(&self, template: &str) -> RegistrationResult<Vec<Provider>> {
        let mut providers = self.providers.write().await;

        let mut rendered = Vec::with_capacity(providers.len());
        for provider in providers.iter() {
            let url = render_redirect(template, &provider.name);
            if let Err(source) = url::Url::parse(&url) {
                return Err(RegistrationError::InvalidRedirectTemplate {
                    provider: provider.name.clone(),
                    url,
                    source,
                });
            }
            rendered.push(url);
        }

        for (provider, url) in providers.iter_mut().zip(rendered) {
            if provider.redirect_url.as_deref() != Some(url.as_str()) {
                info!("Provider {} uses callback URL {}", provider.name, url);
            }
            provider.redirect_url = Some(url);
        }
        Ok(providers.clone())
    }
}
