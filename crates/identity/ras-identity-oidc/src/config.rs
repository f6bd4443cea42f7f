//! OpenID Connect configuration types.

use serde::{Deserialize, Serialize};

/// Callback location used until a base URL is configured.
pub const DEFAULT_REDIRECT_TEMPLATE: &str = "http://localhost:3000/_auth/{provider_lc}/callback";

/// Settings of one upstream identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique name, also used as the callback path segment
    pub name: String,
    /// Discovery base URL; may be omitted for well-known providers
    pub issuer: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    /// Scopes on top of the mandatory `openid` and `email`
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ProviderConfig {
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            issuer: None,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: Vec::new(),
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }
}

/// Login flow configuration
#[derive(Debug, Clone)]
pub struct OidcConfig {
    /// Redirect URL template. `{provider}`, `{provider_lc}` and `{provider_uc}`
    /// are replaced with the provider name as-is, lower-cased and upper-cased.
    pub redirect_template: String,
    /// Where the browser goes after a successful login
    pub destination_url: Option<String>,
    pub state_ttl_seconds: u64,
    pub http_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub use_pkce: bool,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            redirect_template: DEFAULT_REDIRECT_TEMPLATE.to_string(),
            destination_url: None,
            state_ttl_seconds: 600, // 10 minutes
            http_timeout_seconds: 30,
            sweep_interval_seconds: 60,
            use_pkce: true,
        }
    }
}

impl OidcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the standard `{base_url}/_auth/{provider_lc}/callback` layout.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.redirect_template = format!(
            "{}/_auth/{{provider_lc}}/callback",
            base_url.trim_end_matches('/')
        );
        self
    }

    pub fn with_redirect_template(mut self, template: impl Into<String>) -> Self {
        self.redirect_template = template.into();
        self
    }

    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination_url = Some(url.into());
        self
    }

    pub fn with_state_ttl(mut self, seconds: u64) -> Self {
        self.state_ttl_seconds = seconds;
        self
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn with_sweep_interval(mut self, seconds: u64) -> Self {
        self.sweep_interval_seconds = seconds;
        self
    }

    pub fn with_pkce(mut self, enabled: bool) -> Self {
        self.use_pkce = enabled;
        self
    }
}

/// Render a redirect URL template for `provider`.
pub fn render_redirect(template: &str, provider: &str) -> String {
    template
        .replace("{provider_lc}", &provider.to_lowercase())
        .replace("{provider_uc}", &provider.to_uppercase())
        .replace("{provider}", provider)
}
