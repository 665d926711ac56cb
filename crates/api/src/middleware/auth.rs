//! Authentication middleware for the two request pipelines.
//!
//! Both middlewares resolve the caller's identity explicitly, attach it to
//! the request as an extension, and apply the route policy before the
//! handler runs. Handlers read the extension; nothing is implicit.

use crate::models::ApiResponse;
use crate::{AppState, SESSION_COOKIE};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use services::auth::{Claims, Decision, Identity, VerifyError};
use tracing::{debug, warn};

/// Claims of the verified bearer token, attached by the API middleware.
#[derive(Clone)]
pub struct CurrentClaims(pub Claims);

/// Identity resolved from the session cookie, attached by the browser
/// middleware.
#[derive(Clone)]
pub struct CurrentUser(pub Identity);

/// API pipeline: stateless bearer-JWT authentication plus route policy.
pub async fn bearer_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();

    let token = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let claims = match token {
        Some(token) => match state.verifier.verify(token).await {
            Ok(claims) => Some(claims),
            Err(e) => {
                warn!(%path, error = %e, "bearer token rejected");
                return Err(verify_error_response(&e));
            }
        },
        None => None,
    };

    let roles = claims.as_ref().map(|c| c.granted_roles());
    match state.policy.evaluate(&method, &path, roles.as_ref()) {
        Decision::Allow => {
            let mut request = request;
            if let Some(claims) = claims {
                request.extensions_mut().insert(CurrentClaims(claims));
            }
            Ok(next.run(request).await)
        }
        Decision::RequireAuth => {
            debug!(%path, "unauthenticated API request");
            Err((
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error("Authentication required", "Unauthorized")),
            ))
        }
        Decision::Forbidden { required } => {
            warn!(
                %path,
                sub = claims.as_ref().map(|c| c.sub.as_str()).unwrap_or("?"),
                required = ?required,
                "caller lacks required role"
            );
            Err((
                StatusCode::FORBIDDEN,
                Json(ApiResponse::error("Insufficient privileges", "Forbidden")),
            ))
        }
    }
}

/// Browser pipeline: session-cookie authentication plus route policy.
/// Failures redirect rather than returning JSON.
pub async fn session_auth_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();

    let identity = match jar.get(SESSION_COOKIE) {
        Some(cookie) => state.sessions.get(cookie.value()).await,
        None => None,
    };

    let roles = identity.as_ref().map(|i| i.roles.clone());
    match state.policy.evaluate(&method, &path, roles.as_ref()) {
        Decision::Allow => {
            let mut request = request;
            if let Some(identity) = identity {
                request.extensions_mut().insert(CurrentUser(identity));
            }
            next.run(request).await
        }
        Decision::RequireAuth => {
            debug!(%path, "no valid session, redirecting to login");
            Redirect::to("/login").into_response()
        }
        Decision::Forbidden { .. } => {
            warn!(
                %path,
                sub = identity.as_ref().map(|i| i.subject.as_str()).unwrap_or("?"),
                "session lacks required role"
            );
            Redirect::to("/error?message=You%20do%20not%20have%20access%20to%20this%20page")
                .into_response()
        }
    }
}

fn verify_error_response(err: &VerifyError) -> (StatusCode, Json<ApiResponse<()>>) {
    if err.is_infrastructure() {
        // Provider outage is our problem, not the caller's.
        (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse::error(
                "Authentication service unavailable",
                "ServiceUnavailable",
            )),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Invalid or expired token", "Unauthorized")),
        )
    }
}
