use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use ras_identity_oidc::{
    AUTH_TOKEN_ATTR, AUTH_USER_ATTR, CallbackDispatcher, CorrelationStore, HttpDiscovery,
    InMemoryCorrelationStore, LoginInitiator, PostAuthHook, ProviderRegistry, Session, SessionExt,
    SessionHandle, build_http_client, spawn_sweeper, user_from_session,
};
use ras_identity_session::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::AppConfig;

const SESSION_COOKIE: &str = "oidc_session";
const AUTHENTICATED_AT_ATTR: &str = "authenticated_at";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub initiator: LoginInitiator,
}

impl AppState {
    /// Session of the requesting browser, creating one (and its cookie) if needed
    async fn session(&self, jar: CookieJar) -> (SessionHandle, CookieJar) {
        let cookie_id = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
        let (session, created) = self.sessions.get_or_create(cookie_id.as_deref()).await;
        if !created {
            return (session, jar);
        }

        let cookie = Cookie::build((SESSION_COOKIE, session.id()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build();
        (session, jar.add(cookie))
    }
}

/// Login page with one fresh link per provider
async fn index_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (session, jar) = state.session(jar).await;

    if let Some(user) = user_from_session(session.as_ref()) {
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><title>Signed in</title></head>
<body>
    <h1>Welcome, {}</h1>
    <p><a href="/me">Show my identity</a> | <a href="/logout">Sign out</a></p>
</body>
</html>"#,
            escape_html(&user.display_name())
        );
        return (jar, Html(html)).into_response();
    }

    // Links carry single-use state tokens; never cache this page
    let links = match state.initiator.login_links(session).await {
        Ok(links) => links,
        Err(e) => {
            error!("Failed to build login links: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "login unavailable").into_response();
        }
    };

    let items: String = links
        .iter()
        .map(|link| {
            format!(
                r#"        <li><a href="{}">Sign in with {}</a></li>
"#,
                escape_html(&link.url),
                escape_html(&link.provider)
            )
        })
        .collect();

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign in</title></head>
<body>
    <h1>Sign in</h1>
    <ul>
{}    </ul>
</body>
</html>"#,
        items
    );
    (jar, Html(html)).into_response()
}

/// Identity of the current session as JSON
async fn me_handler(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (session, jar) = state.session(jar).await;
    match user_from_session(session.as_ref()) {
        Some(user) => {
            let body = serde_json::json!({
                "session": session.id(),
                "display_name": user.display_name(),
                "user": user,
                "authenticated_at": session.get_typed::<DateTime<Utc>>(AUTHENTICATED_AT_ATTR),
            });
            (jar, Json(body)).into_response()
        }
        None => (StatusCode::UNAUTHORIZED, jar, "not signed in").into_response(),
    }
}

async fn logout_handler(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(session) = state.sessions.remove(cookie.value()).await {
            session.remove_attr(AUTH_TOKEN_ATTR);
            session.remove_attr(AUTH_USER_ATTR);
            info!("Session {} signed out", session.id());
        }
    }
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Redirect::to("/"),
    )
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Stamp every freshly authenticated session
fn post_auth_hook() -> PostAuthHook {
    Arc::new(|session: &SessionHandle| {
        if !session.set_typed(AUTHENTICATED_AT_ATTR, &Utc::now()) {
            warn!("Could not stamp session {}", session.id());
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ras_identity_oidc=debug")),
        )
        .init();

    let config = AppConfig::from_env()?;
    info!("Starting OpenID Connect login demo");

    let http_client = build_http_client(config.oidc.http_timeout_seconds)
        .context("Failed to build HTTP client")?;

    // Register providers; one that cannot be discovered is skipped
    let registry = Arc::new(ProviderRegistry::new(Arc::new(HttpDiscovery::new(
        http_client.clone(),
    ))));
    let registered = registry
        .register_all(&config.providers)
        .await
        .context("Provider registration failed")?;
    if registered.is_empty() {
        anyhow::bail!("No identity provider could be registered");
    }
    info!("Registered providers: {}", registered.join(", "));

    let store: Arc<dyn CorrelationStore> =
        Arc::new(InMemoryCorrelationStore::new(config.oidc.state_ttl_seconds));
    let sweeper = spawn_sweeper(
        store.clone(),
        Duration::from_secs(config.oidc.sweep_interval_seconds),
    );

    let mut dispatcher = CallbackDispatcher::new(registry.clone(), store.clone(), http_client)
        .with_hook(post_auth_hook());
    if let Some(destination) = &config.oidc.destination_url {
        dispatcher = dispatcher.with_destination(destination.clone());
    }
    let callbacks = Arc::new(dispatcher)
        .install_callbacks(&config.oidc.redirect_template)
        .await
        .context("Failed to install callback handlers")?;

    let app_state = AppState {
        sessions: SessionStore::new(),
        initiator: LoginInitiator::new(registry, store).with_pkce(config.oidc.use_pkce),
    };

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/me", get(me_handler))
        .route("/logout", get(logout_handler))
        .with_state(app_state)
        .merge(callbacks)
        .layer(TraceLayer::new_for_http());

    // Start the server
    let bind_addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    info!("Server running on http://{}", bind_addr);
    info!("Redirect URL template: {}", config.oidc.redirect_template);
    warn!("This is a demo application. Sessions live in memory and are lost on restart.");

    let result = axum::serve(listener, app).await.context("Server error");
    sweeper.abort();
    result
}
