//! Mints this service's own short-lived bearer tokens from an
//! authenticated session, so a browser-authenticated user can call the API
//! pipeline without re-running the authorization-code flow.

use super::{AuthError, Identity};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct MintedClaims<'a> {
    sub: &'a str,
    iss: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    preferred_username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    roles: Vec<&'a str>,
}

pub struct TokenIssuer {
    encoding_key: EncodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(signing_secret: &[u8], issuer: String, audience: String, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(signing_secret),
            issuer,
            audience,
            ttl,
        }
    }

    /// Sign a new HS256 token carrying the identity's subject and roles,
    /// scoped to this service's own audience.
    pub fn issue(&self, identity: &Identity) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = MintedClaims {
            sub: &identity.subject,
            iss: &self.issuer,
            aud: &self.audience,
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
            preferred_username: identity.username.as_deref(),
            email: identity.email.as_deref(),
            roles: identity.roles.iter().map(String::as_str).collect(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {e}")))
    }
}
