//! API pipeline endpoints. All of them return the uniform response
//! envelope; authentication and role checks happen in the middleware.

use crate::middleware::{CurrentClaims, CurrentUser};
use crate::models::{ApiResponse, ClaimsDto, EchoResponse, TokenDto, UserDto};
use crate::AppState;
use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::Utc;
use tracing::{info, warn};

type Envelope<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(message: &str, data: T) -> Envelope<T> {
    (StatusCode::OK, Json(ApiResponse::success(message, data)))
}

/// Current user's profile, assembled from the verified token claims.
#[utoipa::path(
    get,
    path = "/api/user/profile",
    responses((status = 200, description = "User profile", body = ApiResponse<UserDto>)),
    tag = "User"
)]
pub async fn user_profile(claims: Option<Extension<CurrentClaims>>) -> Envelope<UserDto> {
    let Some(Extension(CurrentClaims(claims))) = claims else {
        warn!("user not authenticated for profile request");
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("User not authenticated", "BadRequest")),
        );
    };

    let dto = UserDto {
        id: claims.sub.clone(),
        username: claims.preferred_username.clone(),
        email: claims.email.clone(),
        first_name: claims.given_name.clone(),
        last_name: claims.family_name.clone(),
        full_name: claims.name.clone(),
        picture: claims.picture.clone(),
        locale: claims.locale.clone(),
        email_verified: claims.email_verified.unwrap_or(false),
        last_login: Utc::now(),
    };

    info!(sub = %claims.sub, "user profile retrieved");
    ok("User profile retrieved successfully", dto)
}

/// All claims from the caller's token.
#[utoipa::path(
    get,
    path = "/api/user/claims",
    responses((status = 200, description = "Token claims", body = ApiResponse<ClaimsDto>)),
    tag = "User"
)]
pub async fn user_claims(claims: Option<Extension<CurrentClaims>>) -> Envelope<ClaimsDto> {
    let Some(Extension(CurrentClaims(claims))) = claims else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("User not authenticated", "BadRequest")),
        );
    };

    let all_claims = serde_json::to_value(&claims).unwrap_or_default();
    let dto = ClaimsDto {
        subject: claims.sub.clone(),
        issuer: claims.iss.clone(),
        audience: claims.aud.clone(),
        issued_at: claims.iat,
        expires_at: claims.exp,
        all_claims,
    };
    ok("User claims retrieved successfully", dto)
}

/// Mint a local bearer token from the browser session, so the caller can
/// use the API pipeline without re-running the login flow.
#[utoipa::path(
    post,
    path = "/api/auth/token",
    responses((status = 200, description = "Locally issued token", body = ApiResponse<TokenDto>)),
    tag = "Auth"
)]
pub async fn issue_token(
    State(state): State<AppState>,
    user: Option<Extension<CurrentUser>>,
) -> Envelope<TokenDto> {
    let Some(Extension(CurrentUser(identity))) = user else {
        warn!("token requested without an authenticated session");
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("User not authenticated", "BadRequest")),
        );
    };

    match state.issuer.issue(&identity) {
        Ok(token) => {
            info!(sub = %identity.subject, "local token issued");
            ok(
                "Token generated successfully",
                TokenDto {
                    token,
                    r#type: "Bearer".to_string(),
                },
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "token issuing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Token generation failed", "InternalError")),
            )
        }
    }
}

/// Requires authentication, no particular role.
#[utoipa::path(
    get,
    path = "/api/protected",
    responses((status = 200, description = "Protected resource", body = ApiResponse<String>)),
    tag = "Protected"
)]
pub async fn protected() -> Envelope<String> {
    ok("This is a protected resource", "Access granted".to_string())
}

/// Requires role USER.
#[utoipa::path(
    get,
    path = "/api/user/data",
    responses(
        (status = 200, description = "User data", body = ApiResponse<String>),
        (status = 403, description = "Caller lacks role USER"),
    ),
    tag = "User"
)]
pub async fn user_data() -> Envelope<String> {
    ok("User data accessed successfully", "User specific data".to_string())
}

/// Requires role ADMIN.
#[utoipa::path(
    get,
    path = "/api/admin/data",
    responses(
        (status = 200, description = "Admin data", body = ApiResponse<String>),
        (status = 403, description = "Caller lacks role ADMIN"),
    ),
    tag = "Admin"
)]
pub async fn admin_data() -> Envelope<String> {
    ok("Admin data accessed successfully", "Admin specific data".to_string())
}

/// Health check, public.
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service is healthy", body = ApiResponse<String>)),
    tag = "Health"
)]
pub async fn health() -> Envelope<String> {
    ok("Service is healthy", "OK".to_string())
}

/// Echo endpoint for testing, authenticated.
#[utoipa::path(
    post,
    path = "/api/echo",
    responses((status = 200, description = "Echoed request", body = ApiResponse<EchoResponse>)),
    tag = "Protected"
)]
pub async fn echo(Json(body): Json<serde_json::Value>) -> Envelope<EchoResponse> {
    ok(
        "Echo successful",
        EchoResponse {
            message: "Echo response".to_string(),
            timestamp: Utc::now(),
            received: body,
        },
    )
}
