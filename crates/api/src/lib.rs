pub mod middleware;
pub mod models;
pub mod openapi;
pub mod routes;

use crate::middleware::{bearer_auth_middleware, session_auth_middleware};
use crate::openapi::ApiDoc;
use crate::routes::{api as api_routes, web as web_routes};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use config::AppConfig;
use services::auth::{
    policy::{roles, Access, Rule},
    AuthError, KeyCache, LoginFlow, RoutePolicy, SessionStore, TokenIssuer, TokenVerifier,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

/// Name of the browser session cookie.
pub const SESSION_COOKIE: &str = "SESSION_ID";

/// Shared application state handed to middleware and handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub keys: Arc<KeyCache>,
    pub verifier: Arc<TokenVerifier>,
    pub login: Arc<LoginFlow>,
    pub sessions: Arc<SessionStore>,
    pub issuer: Arc<TokenIssuer>,
    pub policy: Arc<RoutePolicy>,
}

/// Wire up every authentication component from configuration.
pub fn build_state(config: Arc<AppConfig>) -> Result<AppState, AuthError> {
    let http_timeout = Duration::from_secs(config.jwks.http_timeout_secs);

    let keys = Arc::new(
        KeyCache::new(config.oidc.jwks_endpoint(), http_timeout)
            .map_err(|e| AuthError::ConfigError(format!("failed to build key cache: {e}")))?,
    );

    let verifier = Arc::new(TokenVerifier::new(
        keys.clone(),
        config.oidc.issuer_url.clone(),
        config.oidc.client_id.clone(),
        config.token.signing_secret.as_bytes(),
        config.token.issuer.clone(),
        config.token.audience.clone(),
    ));

    let login = Arc::new(LoginFlow::new(&config.oidc, verifier.clone(), http_timeout)?);

    let sessions = Arc::new(SessionStore::new(
        Duration::from_secs(config.session.absolute_ttl_secs),
        Duration::from_secs(config.session.idle_ttl_secs),
    ));

    let issuer = Arc::new(TokenIssuer::new(
        config.token.signing_secret.as_bytes(),
        config.token.issuer.clone(),
        config.token.audience.clone(),
        Duration::from_secs(config.token.ttl_secs),
    ));

    Ok(AppState {
        config,
        keys,
        verifier,
        login,
        sessions,
        issuer,
        policy: Arc::new(default_policy()),
    })
}

/// The ordered authorization rule table shared by both pipelines.
///
/// First match wins; unmatched routes require authentication. The
/// role-specific rules sit above the catch-all `/api/` rule so they are
/// never shadowed.
pub fn default_policy() -> RoutePolicy {
    RoutePolicy::new(vec![
        Rule::exact(Some("GET"), "/", Access::Public),
        Rule::exact(Some("GET"), "/login", Access::Public),
        Rule::exact(Some("GET"), "/login/start", Access::Public),
        Rule::exact(Some("GET"), "/login/callback", Access::Public),
        Rule::exact(Some("GET"), "/error", Access::Public),
        Rule::exact(Some("POST"), "/logout", Access::Public),
        Rule::exact(Some("GET"), "/api/health", Access::Public),
        Rule::exact(Some("GET"), "/api/openapi.json", Access::Public),
        Rule::exact(Some("GET"), "/api/user/data", Access::Roles(roles(["USER"]))),
        Rule::prefix(None, "/api/admin/", Access::Roles(roles(["ADMIN"]))),
        Rule::prefix(None, "/api/", Access::Authenticated),
    ])
}

/// Build the complete application router.
///
/// Browser routes go through the session middleware, API routes through
/// the bearer middleware. `POST /api/auth/token` is the one API-shaped
/// route in the browser group: it converts a session into a bearer token.
pub fn build_router(state: AppState) -> Router {
    let browser_routes = Router::new()
        .route("/", get(web_routes::home))
        .route("/login", get(web_routes::login_page))
        .route("/login/start", get(web_routes::login_start))
        .route("/login/callback", get(web_routes::login_callback))
        .route("/dashboard", get(web_routes::dashboard))
        .route("/logout", post(web_routes::logout))
        .route("/error", get(web_routes::error_page))
        .route("/api/auth/token", post(api_routes::issue_token))
        .layer(from_fn_with_state(state.clone(), session_auth_middleware));

    let api = Router::new()
        .route("/api/user/profile", get(api_routes::user_profile))
        .route("/api/user/claims", get(api_routes::user_claims))
        .route("/api/protected", get(api_routes::protected))
        .route("/api/user/data", get(api_routes::user_data))
        .route("/api/admin/data", get(api_routes::admin_data))
        .route("/api/health", get(api_routes::health))
        .route("/api/echo", post(api_routes::echo))
        .route(
            "/api/openapi.json",
            get(|| async { axum::Json(ApiDoc::openapi()) }),
        )
        .layer(from_fn_with_state(state.clone(), bearer_auth_middleware));

    Router::new()
        .merge(browser_routes)
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
