//! Provider discovery and ID token verification.
//!
//! [`Discovery`] is the boundary to the outside world: it turns an issuer URL
//! into endpoints and hands out an [`IdTokenVerifier`] bound to a client ID.
//! [`HttpDiscovery`] and [`JwksVerifier`] are the network-backed
//! implementations; tests and embedded setups may supply their own.

use crate::error::{DiscoveryError, VerifyError};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Signing algorithms accepted on ID tokens.
///
/// `none` and every HMAC algorithm are excluded. ES512 is part of the OpenID
/// allow-list but cannot be represented by the JWT library; such tokens are
/// rejected with [`VerifyError::UnsupportedAlgorithm`].
pub const ALLOWED_SIGNING_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// OpenID provider metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub scopes_supported: Option<Vec<String>>,
    pub response_types_supported: Option<Vec<String>>,
    pub grant_types_supported: Option<Vec<String>>,
    pub code_challenge_methods_supported: Option<Vec<String>>,
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,
}

/// Resolves issuers into provider metadata and token verifiers
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Fetch the metadata of `issuer`
    async fn discover(&self, issuer: &str) -> Result<ProviderMetadata, DiscoveryError>;

    /// Build a verifier for ID tokens issued by `metadata` to `client_id`
    fn verifier(&self, metadata: &ProviderMetadata, client_id: &str) -> Arc<dyn IdTokenVerifier>;
}

/// Verifies a raw ID token and returns its claims
#[async_trait]
pub trait IdTokenVerifier: Send + Sync {
    async fn verify(&self, raw_id_token: &str) -> Result<serde_json::Value, VerifyError>;
}

/// Build the HTTP client used for discovery, JWKS and token requests.
pub fn build_http_client(timeout_seconds: u64) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
}

fn same_issuer(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Discovery over `/.well-known/openid-configuration`
#[derive(Clone)]
pub struct HttpDiscovery {
    http_client: Client,
}

impl HttpDiscovery {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Discovery for HttpDiscovery {
    async fn discover(&self, issuer: &str) -> Result<ProviderMetadata, DiscoveryError> {
        let url = url::Url::parse(&format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        ))?;

        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::UnexpectedStatus(response.status().as_u16()));
        }

        let metadata: ProviderMetadata = response
            .json()
            .await
            .map_err(|e| DiscoveryError::InvalidMetadata(e.to_string()))?;

        if !same_issuer(&metadata.issuer, issuer) {
            return Err(DiscoveryError::IssuerMismatch {
                expected: issuer.to_string(),
                actual: metadata.issuer,
            });
        }
        if metadata.jwks_uri.is_none() {
            return Err(DiscoveryError::InvalidMetadata(
                "jwks_uri is missing".to_string(),
            ));
        }

        debug!("Discovered provider metadata for issuer {}", metadata.issuer);
        Ok(metadata)
    }

    fn verifier(&self, metadata: &ProviderMetadata, client_id: &str) -> Arc<dyn IdTokenVerifier> {
        Arc::new(JwksVerifier::new(
            self.http_client.clone(),
            metadata.issuer.clone(),
            metadata.jwks_uri.clone().unwrap_or_default(),
            client_id.to_string(),
        ))
    }
}

/// ID token verifier backed by the provider's JWKS endpoint.
///
/// Keys are cached and refetched once when a token names an unknown key ID.
pub struct JwksVerifier {
    http_client: Client,
    issuer: String,
    jwks_uri: String,
    client_id: String,
    keys: RwLock<Option<JwkSet>>,
}

impl JwksVerifier {
    pub fn new(http_client: Client, issuer: String, jwks_uri: String, client_id: String) -> Self {
        Self {
            http_client,
            issuer,
            jwks_uri,
            client_id,
            keys: RwLock::new(None),
        }
    }

    async fn fetch_keys(&self) -> Result<JwkSet, VerifyError> {
        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| VerifyError::KeyFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VerifyError::KeyFetchFailed(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| VerifyError::KeyFetchFailed(e.to_string()))?;

        // Lock only to swap the cached set
        *self.keys.write().await = Some(keys.clone());
        Ok(keys)
    }

    async fn find_key(&self, kid: Option<&str>) -> Result<Jwk, VerifyError> {
        let cached = self.keys.read().await.clone();
        let fresh = cached.is_none();
        let keys = match cached {
            Some(keys) => keys,
            None => self.fetch_keys().await?,
        };

        if let Some(jwk) = select_key(&keys, kid) {
            return Ok(jwk);
        }
        if fresh {
            return Err(VerifyError::UnknownKey);
        }

        // Provider may have rotated its keys
        debug!("Signing key not cached, refetching {}", self.jwks_uri);
        let keys = self.fetch_keys().await?;
        select_key(&keys, kid).ok_or(VerifyError::UnknownKey)
    }
}

fn select_key(keys: &JwkSet, kid: Option<&str>) -> Option<Jwk> {
    match kid {
        Some(kid) => keys.find(kid).cloned(),
        None if keys.keys.len() == 1 => keys.keys.first().cloned(),
        None => None,
    }
}

/// Validation rules for an ID token signed with `alg`.
pub fn id_token_validation(alg: Algorithm, issuer: &str, client_id: &str) -> Validation {
    let mut validation = Validation::new(alg);
    validation.algorithms = vec![alg];
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[client_id]);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
    validation.validate_exp = true;
    validation
}

/// Allowed algorithms the JWT library has no representation for
const UNSUPPORTED_SIGNING_ALGORITHMS: &[&str] = &["ES512"];

/// The raw `alg` member of a token header, read without typed parsing
fn raw_header_alg(raw_id_token: &str) -> Option<String> {
    let segment = raw_id_token.split('.').next()?;
    let bytes = URL_SAFE_NO_PAD.decode(segment).ok()?;
    let header: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    header.get("alg")?.as_str().map(String::from)
}

/// Reject tokens whose header names an algorithm outside the allow-list.
pub fn check_algorithm(raw_id_token: &str) -> Result<jsonwebtoken::Header, VerifyError> {
    let header = decode_header(raw_id_token).map_err(|e| {
        match raw_header_alg(raw_id_token) {
            Some(alg) if UNSUPPORTED_SIGNING_ALGORITHMS.contains(&alg.as_str()) => {
                VerifyError::UnsupportedAlgorithm(alg)
            }
            _ => VerifyError::MalformedHeader(e.to_string()),
        }
    })?;

    if !ALLOWED_SIGNING_ALGORITHMS.contains(&header.alg) {
        return Err(VerifyError::AlgorithmNotAllowed(header.alg));
    }
    Ok(header)
}

#[async_trait]
impl IdTokenVerifier for JwksVerifier {
    async fn verify(&self, raw_id_token: &str) -> Result<serde_json::Value, VerifyError> {
        let header = match check_algorithm(raw_id_token) {
            Ok(header) => header,
            Err(VerifyError::UnsupportedAlgorithm(alg)) => {
                warn!(
                    "Rejected ID token signed with {}: algorithm cannot be verified, configure the provider to sign with one of {:?}",
                    alg, ALLOWED_SIGNING_ALGORITHMS
                );
                return Err(VerifyError::UnsupportedAlgorithm(alg));
            }
            Err(e) => {
                warn!("Rejected ID token header: {}", e);
                return Err(e);
            }
        };

        let jwk = self.find_key(header.kid.as_deref()).await?;
        let key = DecodingKey::from_jwk(&jwk)?;
        let validation = id_token_validation(header.alg, &self.issuer, &self.client_id);

        let data = decode::<serde_json::Value>(raw_id_token, &key, &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsigned_token(header: serde_json::Value) -> String {
        let claims = serde_json::json!({"sub": "1", "exp": 4_000_000_000u64});
        format!(
            "{}.{}.",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    #[test]
    fn test_allow_list_excludes_hmac() {
        for alg in [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512] {
            assert!(!ALLOWED_SIGNING_ALGORITHMS.contains(&alg));
        }
        assert!(ALLOWED_SIGNING_ALGORITHMS.contains(&Algorithm::RS256));
        assert!(ALLOWED_SIGNING_ALGORITHMS.contains(&Algorithm::PS512));
    }

    #[test]
    fn test_es512_is_reported_as_unsupported() {
        let token = unsigned_token(serde_json::json!({"alg": "ES512", "kid": "k1"}));
        match check_algorithm(&token) {
            Err(VerifyError::UnsupportedAlgorithm(alg)) => assert_eq!(alg, "ES512"),
            other => panic!("unexpected result: {:?}", other.map(|h| h.alg)),
        }

        let garbage = "not-base64!.e30.";
        assert!(matches!(
            check_algorithm(garbage),
            Err(VerifyError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_none_algorithm_is_rejected() {
        let token = unsigned_token(serde_json::json!({"alg": "none", "typ": "JWT"}));
        assert!(matches!(
            check_algorithm(&token),
            Err(VerifyError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_hmac_algorithm_is_rejected() {
        let token = unsigned_token(serde_json::json!({"alg": "HS256", "typ": "JWT"}));
        assert!(matches!(
            check_algorithm(&token),
            Err(VerifyError::AlgorithmNotAllowed(Algorithm::HS256))
        ));
    }

    #[test]
    fn test_rsa_algorithm_passes_header_check() {
        let token = unsigned_token(serde_json::json!({"alg": "RS256", "kid": "k1"}));
        let header = check_algorithm(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("k1"));
    }

    #[test]
    fn test_validation_pins_algorithm() {
        let validation = id_token_validation(Algorithm::RS256, "https://issuer.example", "cid");
        assert_eq!(validation.algorithms, vec![Algorithm::RS256]);
        assert!(validation.validate_exp);
        assert!(validation.required_spec_claims.contains("exp"));
    }

    #[test]
    fn test_same_issuer_ignores_trailing_slash() {
        assert!(same_issuer("https://issuer.example/", "https://issuer.example"));
        assert!(!same_issuer("https://issuer.example", "https://evil.example"));
    }
}
