//! Multi-provider OpenID Connect login.
//!
//! This crate correlates outbound authorization redirects with inbound
//! provider callbacks. A [`ProviderRegistry`] holds the configured providers
//! (resolved through [`Discovery`]), the [`LoginInitiator`] builds
//! authorization URLs bound to a one-time state token, and the
//! [`CallbackDispatcher`] resolves that token through the [`CorrelationStore`],
//! exchanges the code, verifies the ID token and attaches the identity to the
//! session that started the login.
//!
//! ```text
//! registry.register("Google", None, id, secret, &[]).await?;
//! let router = Arc::new(dispatcher).install_callbacks(template).await?;
//! let url = initiator.build_login_url("google", session).await?;
//! ```

mod callback;
mod config;
mod discovery;
mod error;
mod login;
mod registry;
mod state;
mod types;


pub use callback::{CallbackDispatcher, CallbackOutcome};
pub use config::{DEFAULT_REDIRECT_TEMPLATE, OidcConfig, ProviderConfig, render_redirect};
pub use discovery::{
    ALLOWED_SIGNING_ALGORITHMS, Discovery, HttpDiscovery, IdTokenVerifier, JwksVerifier,
    ProviderMetadata, build_http_client,
};
pub use error::{
    CallbackError, DiscoveryError, LoginError, RegistrationError, RegistrationResult,
    VerifyError,
};
pub use login::{LoginInitiator, LoginLink, PkceChallenge};
pub use registry::{
    MANDATORY_SCOPES, Provider, ProviderRegistry, WELL_KNOWN_ISSUERS, well_known_issuer,
};
pub use state::{
    CorrelationStore, InMemoryCorrelationStore, PendingLogin, generate_state_token,
    spawn_sweeper,
};
pub use types::{
    AUTH_TOKEN_ATTR, AUTH_USER_ATTR, AuthResult, CallbackQuery, OAuth2Token,
    RedactedAuthResult, TokenResponse, UserInfo, token_from_session, user_from_session,
};

// Re-export common types for convenience
pub use ras_identity_core::{PostAuthHook, Session, SessionExt, SessionHandle};
