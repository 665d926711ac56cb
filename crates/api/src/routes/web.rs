//! Browser pipeline: login, callback, dashboard, logout, and the sanitized
//! error page. Pages are small inline HTML; no templating engine.

use crate::middleware::CurrentUser;
use crate::{AppState, SESSION_COOKIE};
use axum::{
    extract::{Query, State},
    http::header::SET_COOKIE,
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use services::auth::{AuthError, CallbackParams};
use tracing::{error, info, warn};

/// Home page
pub async fn home() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>OAuth2 OIDC Demo</title></head>
<body>
    <h1>OAuth2 / OpenID Connect Demo</h1>
    <p>A demo relying party backed by Keycloak.</p>
    <a href="/login">Sign in</a> | <a href="/dashboard">Dashboard</a>
</body>
</html>"#,
    )
}

/// Login page with a link into the authorization-code flow.
pub async fn login_page() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>Login</title></head>
<body>
    <h1>Sign in</h1>
    <p>You will be redirected to the identity provider.</p>
    <a href="/login/start">Continue with Keycloak</a>
</body>
</html>"#,
    )
}

/// Start the authorization-code flow: 303 to the provider.
pub async fn login_start(State(state): State<AppState>) -> Redirect {
    let (auth_url, _state) = state.login.begin_login().await;
    Redirect::to(&auth_url)
}

/// Provider callback: consumes `code`+`state` or `error`, establishes the
/// session on success, redirects to the sanitized error page otherwise.
pub async fn login_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    match state.login.complete_login(params).await {
        Ok(identity) => {
            info!(sub = %identity.subject, "browser login succeeded");
            let session_id = state.sessions.create(identity).await;
            let cookie = session_cookie(&session_id, state.config.session.cookie_secure);
            ([(SET_COOKIE, cookie)], Redirect::to("/dashboard")).into_response()
        }
        Err(e) => {
            // Full detail to the logs, a short sanitized message to the user.
            error!(error = %e, detail = ?e, "browser login failed");
            let message = sanitized_login_error(&e);
            Redirect::to(&format!("/error?message={}", urlencoding::encode(message)))
                .into_response()
        }
    }
}

/// Dashboard, session-gated. The middleware attaches the identity; a
/// missing extension means no session survived and mirrors the policy
/// redirect.
pub async fn dashboard(user: Option<axum::Extension<CurrentUser>>) -> Response {
    let Some(axum::Extension(CurrentUser(identity))) = user else {
        warn!("dashboard accessed without authentication, redirecting to login");
        return Redirect::to("/login").into_response();
    };

    let roles = identity
        .roles
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Dashboard</title></head>
<body>
    <h1>Welcome, {username}</h1>
    <ul>
        <li>Subject: {subject}</li>
        <li>Email: {email}</li>
        <li>Name: {name}</li>
        <li>Roles: {roles}</li>
    </ul>
    <form method="post" action="/logout"><button type="submit">Logout</button></form>
</body>
</html>"#,
        username = escape_html(identity.username.as_deref().unwrap_or("user")),
        subject = escape_html(&identity.subject),
        email = escape_html(identity.email.as_deref().unwrap_or("-")),
        name = escape_html(identity.full_name.as_deref().unwrap_or("-")),
        roles = escape_html(&roles),
    ))
    .into_response()
}

/// Destroy the session and clear the cookie.
pub async fn logout(
    State(state): State<AppState>,
    jar: axum_extra::extract::cookie::CookieJar,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let destroyed = state.sessions.destroy(cookie.value()).await;
        info!(destroyed, "logout");
    }

    let clear = clear_session_cookie(state.config.session.cookie_secure);
    ([(SET_COOKIE, clear)], Redirect::to("/")).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ErrorParams {
    pub message: Option<String>,
}

/// Error page: displays only the already-sanitized message.
pub async fn error_page(Query(params): Query<ErrorParams>) -> Html<String> {
    let message = params
        .message
        .unwrap_or_else(|| "An unexpected error occurred".to_string());
    error!(%message, "error page accessed");
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Error</title></head>
<body>
    <h1>Something went wrong</h1>
    <p>{}</p>
    <a href="/">Back to home</a>
</body>
</html>"#,
        escape_html(&message)
    ))
}

/// Map a login failure to a short user-facing message. Raw provider text
/// never reaches the browser.
fn sanitized_login_error(err: &AuthError) -> &'static str {
    match err {
        AuthError::ProviderDenied { error, .. } if error == "access_denied" => {
            "Access denied by user"
        }
        AuthError::ProviderDenied { .. } => "The identity provider rejected the login",
        AuthError::InvalidGrant => "Invalid authorization code",
        AuthError::CsrfMismatch => "Login request could not be validated. Please try again",
        AuthError::InvalidIdToken(_) => "Authentication failed",
        AuthError::TokenExchangeFailed(_) | AuthError::ConfigError(_) | AuthError::Internal(_) => {
            "Authentication service unavailable. Please try again later"
        }
    }
}

fn session_cookie(session_id: &str, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={session_id}; HttpOnly; SameSite=Lax; Path=/");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// The clearing cookie carries the same attributes as the session cookie,
/// plus `Max-Age=0`; mismatched attributes can leave the original alive.
fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
