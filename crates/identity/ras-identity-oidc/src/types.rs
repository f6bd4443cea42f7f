//! OpenID Connect protocol and result types.

use chrono::{DateTime, Duration, Utc};
use ras_identity_core::{Session, SessionExt};
use serde::{Deserialize, Deserializer, Serialize};

/// Session attribute holding the [`OAuth2Token`] of an authenticated session.
pub const AUTH_TOKEN_ATTR: &str = "token";

/// Session attribute holding the [`UserInfo`] of an authenticated session.
pub const AUTH_USER_ATTR: &str = "user";

/// Query parameters of the provider's redirect back to us
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

/// OAuth2 token set attached to an authenticated session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl OAuth2Token {
    /// Build the token set from a token endpoint response received at `received_at`.
    ///
    /// An `expires_in` too large to represent leaves the expiry unknown.
    pub fn from_response(response: &TokenResponse, received_at: DateTime<Utc>) -> Self {
        let expiry = response
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| received_at.checked_add_signed(lifetime));

        Self {
            access_token: response.access_token.clone(),
            token_type: response.token_type.clone(),
            refresh_token: response.refresh_token.clone(),
            expiry,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiry.is_some_and(|expiry| Utc::now() >= expiry)
    }
}

/// Normalized identity claims taken from a verified ID token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "bool_or_string")]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

impl UserInfo {
    /// Name to show in the UI.
    ///
    /// Hungarian users get "given family" when both parts are known. Otherwise
    /// the provider's display name is used, falling back to the email address.
    /// Presentation only; never use it for access decisions.
    pub fn display_name(&self) -> String {
        if self.locale.as_deref() == Some("hu") {
            if let (Some(given), Some(family)) =
                (non_empty(&self.given_name), non_empty(&self.family_name))
            {
                return format!("{} {}", given, family);
            }
        }

        non_empty(&self.name)
            .or_else(|| non_empty(&self.email))
            .unwrap_or_default()
            .to_string()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

// Some providers send `email_verified` as a string
fn bool_or_string<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }

    match Option::<BoolOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolOrString::Bool(b)) => Ok(Some(b)),
        Some(BoolOrString::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!(
                "invalid email_verified value {:?}",
                other
            ))),
        },
    }
}

/// Result of a completed login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    pub token: OAuth2Token,
    pub user_info: UserInfo,
}

/// Browser-facing view of an [`AuthResult`]; the access token is left out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactedAuthResult {
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub user_info: UserInfo,
}

impl AuthResult {
    pub fn redacted(&self) -> RedactedAuthResult {
        RedactedAuthResult {
            token_type: self.token.token_type.clone(),
            refresh_token: self.token.refresh_token.clone(),
            expiry: self.token.expiry,
            user_info: self.user_info.clone(),
        }
    }
}

/// User info attached to `session`, if it completed a login.
pub fn user_from_session(session: &dyn Session) -> Option<UserInfo> {
    session.get_typed(AUTH_USER_ATTR)
}

/// Token set attached to `session`, if it completed a login.
pub fn token_from_session(session: &dyn Session) -> Option<OAuth2Token> {
    session.get_typed(AUTH_TOKEN_ATTR)
}
