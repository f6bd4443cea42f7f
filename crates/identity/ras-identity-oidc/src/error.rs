//! OpenID Connect error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// Errors raised while configuring providers at start-up.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Provider {0:?} is already registered")]
    AlreadyRegistered(String),

    #[error("No issuer specified and {0:?} is not a well-known provider")]
    UnknownIssuer(String),

    #[error("Discovery failed for provider {provider:?}: {source}")]
    DiscoveryFailed {
        provider: String,
        #[source]
        source: DiscoveryError,
    },

    #[error("Invalid redirect URL {url:?} for provider {provider:?}: {source}")]
    InvalidRedirectTemplate {
        provider: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Providers {providers:?} share the callback path {path:?}")]
    DuplicateCallbackPath {
        path: String,
        providers: Vec<String>,
    },
}

/// Errors raised by the discovery adapter.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Discovery endpoint returned status {0}")]
    UnexpectedStatus(u16),

    #[error("Invalid provider metadata: {0}")]
    InvalidMetadata(String),

    #[error("Issuer mismatch: expected {expected:?}, got {actual:?}")]
    IssuerMismatch { expected: String, actual: String },
}

/// Errors raised while verifying an ID token.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Malformed token header: {0}")]
    MalformedHeader(String),

    #[error("Signing algorithm {0:?} is not allowed")]
    AlgorithmNotAllowed(jsonwebtoken::Algorithm),

    #[error("Signing algorithm {0} is allowed but not supported")]
    UnsupportedAlgorithm(String),

    #[error("No signing key matches the token")]
    UnknownKey,

    #[error("Failed to fetch signing keys: {0}")]
    KeyFetchFailed(String),

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

/// Errors raised while building a login URL.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Provider {0:?} is not registered")]
    UnknownProvider(String),

    #[error("Callback handlers for provider {0:?} are not installed")]
    RedirectNotBound(String),

    #[error("Invalid authorization endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

/// Terminal rejection of a callback request.
///
/// Every variant maps to an HTTP status and a plain-text reason. Details of the
/// underlying failure are logged, never returned to the browser.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("state did not match")]
    StateMismatch,

    #[error("authorization denied by provider: {0}")]
    ProviderDenied(String),

    #[error("missing authorization code")]
    MissingCode,

    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("no id_token field in token response")]
    MissingIdToken,

    #[error("ID token verification failed: {0}")]
    VerificationFailed(#[from] VerifyError),

    #[error("claims decode failed: {0}")]
    ClaimsDecodeFailed(#[from] serde_json::Error),
}

impl CallbackError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CallbackError::StateMismatch
            | CallbackError::ProviderDenied(_)
            | CallbackError::MissingCode => StatusCode::BAD_REQUEST,
            CallbackError::ExchangeFailed(_)
            | CallbackError::MissingIdToken
            | CallbackError::VerificationFailed(_)
            | CallbackError::ClaimsDecodeFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Reason string sent to the browser.
    pub fn reason(&self) -> &'static str {
        match self {
            CallbackError::StateMismatch => "state did not match",
            CallbackError::ProviderDenied(_) => "authorization denied by provider",
            CallbackError::MissingCode => "missing authorization code",
            CallbackError::ExchangeFailed(_) => "token exchange failed",
            CallbackError::MissingIdToken => "no id_token field in token response",
            CallbackError::VerificationFailed(_) => "ID token verification failed",
            CallbackError::ClaimsDecodeFailed(_) => "claims decode failed",
        }
    }
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        (self.status_code(), self.reason()).into_response()
    }
}
