//! The authentication core: authorization-code login flow, bearer-token
//! verification, session management, route policy, and local token minting.
//!
//! Everything here is framework-agnostic; the `api` crate wires these pieces
//! into axum middleware and routes.

pub mod issuer;
pub mod jwks;
pub mod oauth;
pub mod policy;
pub mod session;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_keys;

pub use issuer::TokenIssuer;
pub use jwks::{FetchError, KeyCache};
pub use oauth::{CallbackParams, LoginFlow};
pub use policy::{Access, Decision, RoutePolicy, Rule};
pub use session::SessionStore;
pub use verifier::{TokenVerifier, VerifyError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors from the browser login pipeline.
///
/// `CsrfMismatch`, `ProviderDenied` and `InvalidGrant` are client/auth
/// failures; the rest are infrastructure failures. Display strings are safe
/// to show to a user; raw provider payloads only ever reach the logs.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login state did not match an in-flight login attempt")]
    CsrfMismatch,

    #[error("the identity provider denied the request")]
    ProviderDenied {
        error: String,
        description: Option<String>,
    },

    #[error("token exchange with the identity provider failed")]
    TokenExchangeFailed(String),

    #[error("the authorization code was rejected by the identity provider")]
    InvalidGrant,

    #[error("the ID token failed validation")]
    InvalidIdToken(#[from] VerifyError),

    #[error("authentication configuration error")]
    ConfigError(String),

    #[error("internal authentication error")]
    Internal(String),
}

impl AuthError {
    /// Whether the failure is the infrastructure's fault rather than the
    /// client's. Infrastructure failures map to 5xx.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AuthError::TokenExchangeFailed(_) | AuthError::ConfigError(_) | AuthError::Internal(_)
        ) || matches!(self, AuthError::InvalidIdToken(e) if e.is_infrastructure())
    }
}

/// Parsed, validated JWT claims.
///
/// Covers the registered claims plus the OIDC profile claims and both role
/// layouts seen here: Keycloak realm roles (`realm_access.roles`) and the
/// flat `roles` claim used by locally-issued tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_access: Option<RealmAccess>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    /// Everything else the provider put in the token.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Claims {
    /// Union of realm roles and flat roles.
    pub fn granted_roles(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        if let Some(realm) = &self.realm_access {
            set.extend(realm.roles.iter().cloned());
        }
        if let Some(roles) = &self.roles {
            set.extend(roles.iter().cloned());
        }
        set
    }
}

/// Accepts both the single-string and array forms of `aud`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(aud) => vec![aud],
        OneOrMany::Many(auds) => auds,
    })
}

/// The authenticated principal, derived from a validated ID token (and
/// optionally enriched from the userinfo endpoint). Immutable for the
/// lifetime of a login; re-derived on each new login.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub subject: String,
    pub issuer: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub full_name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
    pub roles: BTreeSet<String>,
    pub authenticated_at: DateTime<Utc>,
}

impl Identity {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            subject: claims.sub.clone(),
            issuer: claims.iss.clone(),
            username: claims.preferred_username.clone(),
            email: claims.email.clone(),
            email_verified: claims.email_verified.unwrap_or(false),
            given_name: claims.given_name.clone(),
            family_name: claims.family_name.clone(),
            full_name: claims.name.clone(),
            picture: claims.picture.clone(),
            locale: claims.locale.clone(),
            roles: claims.granted_roles(),
            authenticated_at: Utc::now(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}
