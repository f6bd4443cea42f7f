//! Provider callback handling.
//!
//! Each registered provider gets one GET endpoint. A callback resolves its
//! state token against the [`CorrelationStore`], exchanges the authorization
//! code, verifies the ID token and attaches the resulting identity to the
//! session that started the login. Any failure is terminal: the state token
//! is already consumed and the user has to start over.

use crate::error::{CallbackError, RegistrationError, RegistrationResult};
use crate::registry::{Provider, ProviderRegistry, normalize_name};
use crate::state::CorrelationStore;
use crate::types::{
    AUTH_TOKEN_ATTR, AUTH_USER_ATTR, AuthResult, CallbackQuery, OAuth2Token, TokenResponse,
    UserInfo,
};
use axum::Json;
use axum::Router;
use axum::extract::Query;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::Utc;
use ras_identity_core::{PostAuthHook, SessionHandle};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Successful end of a callback
#[derive(Debug)]
pub enum CallbackOutcome {
    /// Send the browser to the configured destination
    Redirect(String),
    /// No destination configured; show the (redacted) result
    Completed(AuthResult),
}

impl IntoResponse for CallbackOutcome {
    fn into_response(self) -> Response {
        match self {
            CallbackOutcome::Redirect(url) => {
                (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
            }
            CallbackOutcome::Completed(result) => Json(result.redacted()).into_response(),
        }
    }
}

/// Completes logins started by the login initiator
#[derive(Clone)]
pub struct CallbackDispatcher {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn CorrelationStore>,
    http_client: Client,
    destination_url: Option<String>,
    hook: Option<PostAuthHook>,
}

impl CallbackDispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn CorrelationStore>,
        http_client: Client,
    ) -> Self {
        Self {
            registry,
            store,
            http_client,
            destination_url: None,
            hook: None,
        }
    }

    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.destination_url = (!url.is_empty()).then_some(url);
        self
    }

    /// Run `hook` on every session right after it is authenticated
    pub fn with_hook(mut self, hook: PostAuthHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Bind every provider's redirect URL from `redirect_template` and build
    /// a router with one callback route per provider.
    pub async fn install_callbacks(
        self: Arc<Self>,
        redirect_template: &str,
    ) -> RegistrationResult<Router> {
        let providers = self.registry.bind_redirects(redirect_template).await?;

        let mut paths: HashMap<String, String> = HashMap::new();
        let mut router = Router::new();
        for provider in providers {
            let redirect = provider.redirect_url.clone().unwrap_or_default();
            let path = url::Url::parse(&redirect)
                .map_err(|source| RegistrationError::InvalidRedirectTemplate {
                    provider: provider.name.clone(),
                    url: redirect.clone(),
                    source,
                })?
                .path()
                .to_string();

            if let Some(other) = paths.insert(path.clone(), provider.name.clone()) {
                return Err(RegistrationError::DuplicateCallbackPath {
                    path,
                    providers: vec![other, provider.name],
                });
            }

            info!(
                "Adding {} provider with {} callback URL, {:?} as destination",
                provider.name, redirect, self.destination_url
            );

            let dispatcher = self.clone();
            let name = provider.name.clone();
            router = router.route(
                &path,
                get(move |Query(query): Query<CallbackQuery>| {
                    let dispatcher = dispatcher.clone();
                    let name = name.clone();
                    async move { dispatcher.handle(&name, query).await }
                }),
            );
        }
        Ok(router)
    }

    /// Process one provider redirect.
    pub async fn handle(
        &self,
        provider_name: &str,
        query: CallbackQuery,
    ) -> Result<CallbackOutcome, CallbackError> {
        let result = self.complete(provider_name, query).await;
        if let Err(e) = &result {
            warn!("{}", rejection_message(provider_name, e));
        }
        result
    }

    async fn complete(
        &self,
        provider_name: &str,
        query: CallbackQuery,
    ) -> Result<CallbackOutcome, CallbackError> {
        let state = query
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(CallbackError::StateMismatch)?;

        let pending = self
            .store
            .resolve(state)
            .await
            .ok_or(CallbackError::StateMismatch)?;

        // A state minted for one provider must not complete another
        if normalize_name(&pending.provider) != normalize_name(provider_name) {
            return Err(CallbackError::StateMismatch);
        }
        let provider = self
            .registry
            .get(provider_name)
            .await
            .ok_or(CallbackError::StateMismatch)?;

        if let Some(error) = query.error {
            let description = query.error_description.as_deref().unwrap_or("No description");
            return Err(CallbackError::ProviderDenied(format!(
                "{}: {}",
                error, description
            )));
        }

        let code = query
            .code
            .filter(|c| !c.is_empty())
            .ok_or(CallbackError::MissingCode)?;

        let received_at = Utc::now();
        let token_response = self
            .exchange_code(&provider, &code, pending.code_verifier.as_deref())
            .await?;

        let raw_id_token = token_response
            .id_token
            .as_deref()
            .ok_or(CallbackError::MissingIdToken)?;
        let claims = provider.verifier.verify(raw_id_token).await?;
        let user_info: UserInfo = serde_json::from_value(claims)?;

        let result = AuthResult {
            token: OAuth2Token::from_response(&token_response, received_at),
            user_info,
        };
        self.bind(&pending.session, &result)?;

        info!(
            "Session {} authenticated via {} as {}",
            pending.session.id(),
            provider.name,
            result.user_info.sub
        );

        Ok(match &self.destination_url {
            Some(url) => {
                debug!("Redirecting to {}", url);
                CallbackOutcome::Redirect(url.clone())
            }
            None => CallbackOutcome::Completed(result),
        })
    }

    fn bind(&self, session: &SessionHandle, result: &AuthResult) -> Result<(), CallbackError> {
        let token = serde_json::to_value(&result.token)?;
        let user = serde_json::to_value(&result.user_info)?;

        session.set_attr(AUTH_TOKEN_ATTR, token);
        session.set_attr(AUTH_USER_ATTR, user);

        if let Some(hook) = &self.hook {
            hook(session);
        }
        Ok(())
    }

    /// Exchange an authorization code for tokens
    async fn exchange_code(
        &self,
        provider: &Provider,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, CallbackError> {
        let redirect_uri = provider.redirect_url.as_deref().unwrap_or_default();

        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("client_id", &provider.client_id);
        params.insert("client_secret", &provider.client_secret);
        params.insert("redirect_uri", redirect_uri);

        if let Some(verifier) = code_verifier {
            params.insert("code_verifier", verifier);
        }

        let response = self
            .http_client
            .post(&provider.metadata.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| CallbackError::ExchangeFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Token exchange failed with {}: {:?}", status, error_text);
            return Err(CallbackError::ExchangeFailed(format!(
                "status {}: {}",
                status, error_text
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| {
                CallbackError::ExchangeFailed(format!("invalid token response: {}", e))
            })
    }
}

/// Log line for a rejected callback with provider-supplied text escaped
fn rejection_message(provider_name: &str, error: &CallbackError) -> String {
    format!("Rejected {:?} callback: {:?}", provider_name, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_message_escapes_control_characters() {
        let denied = CallbackError::ProviderDenied(
            "access_denied\nINFO forged entry\r\u{1b}[31m".to_string(),
        );
        let message = rejection_message("google", &denied);
        assert!(!message.contains('\n'));
        assert!(!message.contains('\r'));
        assert!(!message.contains('\u{1b}'));
        assert!(message.starts_with("Rejected \"google\" callback"));
        assert!(message.contains("access_denied\\nINFO forged entry"));

        let exchange = CallbackError::ExchangeFailed("status 400: line one\nline two".to_string());
        assert!(!rejection_message("eBay", &exchange).contains('\n'));
    }
}
