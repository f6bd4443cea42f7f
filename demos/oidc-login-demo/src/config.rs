use anyhow::{Context, Result};
use ras_identity_oidc::{OidcConfig, ProviderConfig};

/// Configuration for the OpenID Connect login demo
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub providers: Vec<ProviderConfig>,
    pub oidc: OidcConfig,
    pub server_host: String,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let server_port: u16 = std::env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid port number")?;

        let names = std::env::var("OIDC_PROVIDERS")
            .context("OIDC_PROVIDERS environment variable is required")?;
        let providers = parse_list(&names)
            .iter()
            .map(|name| provider_from_env(name))
            .collect::<Result<Vec<_>>>()?;
        if providers.is_empty() {
            anyhow::bail!("OIDC_PROVIDERS must name at least one provider");
        }

        let mut oidc = match optional_var("OIDC_REDIRECT_TEMPLATE") {
            Some(template) => OidcConfig::new().with_redirect_template(template),
            None => OidcConfig::new().with_base_url(&format!("http://localhost:{}", server_port)),
        };
        if let Some(destination) = optional_var("OIDC_DEST_URL") {
            oidc = oidc.with_destination(destination);
        }

        Ok(Self {
            providers,
            oidc,
            server_host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port,
        })
    }
}

fn provider_from_env(name: &str) -> Result<ProviderConfig> {
    let prefix = format!("OIDC_{}", env_key(name));
    let var = |suffix: &str| format!("{}_{}", prefix, suffix);

    let client_id = std::env::var(var("CLIENT_ID"))
        .with_context(|| format!("{} environment variable is required", var("CLIENT_ID")))?;
    let client_secret = std::env::var(var("CLIENT_SECRET"))
        .with_context(|| format!("{} environment variable is required", var("CLIENT_SECRET")))?;

    let mut provider = ProviderConfig::new(name, client_id, client_secret);
    if let Some(issuer) = optional_var(&var("ISSUER")) {
        provider = provider.with_issuer(issuer);
    }
    for scope in parse_list(&optional_var(&var("SCOPES")).unwrap_or_default()) {
        provider = provider.with_scope(scope);
    }
    Ok(provider)
}

fn optional_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Environment variable segment for a provider name
fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Split a comma or whitespace separated list
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
