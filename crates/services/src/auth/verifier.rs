//! Bearer-token verification for the API pipeline.
//!
//! Two kinds of tokens are accepted, dispatched on the JWT header
//! algorithm: RS256 tokens from the identity provider (verified against the
//! JWKS cache) and HS256 tokens minted by this service's own issuer. Every
//! other algorithm, including `none`, is rejected before any key lookup.

use super::jwks::{FetchError, KeyCache};
use super::Claims;
use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Clock-skew tolerance for `exp`/`nbf`, in seconds.
const LEEWAY_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("token signed with unknown key: {0}")]
    UnknownKey(String),

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token is expired or not yet valid")]
    Expired,

    #[error("token issuer does not match")]
    IssuerMismatch,

    #[error("token audience does not match")]
    AudienceMismatch,

    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(#[from] FetchError),
}

impl VerifyError {
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, VerifyError::KeysUnavailable(_))
    }
}

pub struct TokenVerifier {
    keys: Arc<KeyCache>,
    provider_issuer: String,
    provider_audience: String,
    local_key: DecodingKey,
    local_issuer: String,
    local_audience: String,
}

impl TokenVerifier {
    pub fn new(
        keys: Arc<KeyCache>,
        provider_issuer: String,
        provider_audience: String,
        local_secret: &[u8],
        local_issuer: String,
        local_audience: String,
    ) -> Self {
        Self {
            keys,
            provider_issuer,
            provider_audience,
            local_key: DecodingKey::from_secret(local_secret),
            local_issuer,
            local_audience,
        }
    }

    /// Validate a bearer token and return its claims.
    ///
    /// An RS256 token whose `kid` misses the cache triggers exactly one
    /// synchronous JWKS refresh before failing with `UnknownKey`.
    pub async fn verify(&self, token: &str) -> Result<Claims, VerifyError> {
        let header = decode_header(token).map_err(map_jwt_error)?;

        match header.alg {
            Algorithm::RS256 => {
                let kid = header
                    .kid
                    .ok_or_else(|| VerifyError::Malformed("token header has no kid".into()))?;

                let key = match self.keys.get(&kid).await {
                    Some(key) => key,
                    None => {
                        debug!(%kid, "kid missing from key cache, refreshing JWKS");
                        match self.keys.refresh().await {
                            Ok(()) => self
                                .keys
                                .get(&kid)
                                .await
                                .ok_or_else(|| VerifyError::UnknownKey(kid.clone()))?,
                            Err(e) if self.keys.key_count().await == 0 => {
                                return Err(VerifyError::KeysUnavailable(e));
                            }
                            Err(_) => return Err(VerifyError::UnknownKey(kid)),
                        }
                    }
                };

                self.decode_checked(
                    token,
                    &key,
                    Algorithm::RS256,
                    &self.provider_issuer,
                    &self.provider_audience,
                )
            }
            Algorithm::HS256 => self.decode_checked(
                token,
                &self.local_key,
                Algorithm::HS256,
                &self.local_issuer,
                &self.local_audience,
            ),
            other => Err(VerifyError::UnsupportedAlgorithm(format!("{other:?}"))),
        }
    }

    fn decode_checked(
        &self,
        token: &str,
        key: &DecodingKey,
        alg: Algorithm,
        issuer: &str,
        audience: &str,
    ) -> Result<Claims, VerifyError> {
        let mut validation = Validation::new(alg);
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        // nbf is checked by hand below: providers omit it inconsistently.
        validation.validate_nbf = false;

        let data = decode::<Claims>(token, key, &validation).map_err(map_jwt_error)?;

        if let Some(nbf) = data.claims.nbf {
            if nbf > Utc::now().timestamp() + LEEWAY_SECS as i64 {
                debug!(sub = %data.claims.sub, nbf, "token not yet valid");
                return Err(VerifyError::Expired);
            }
        }

        Ok(data.claims)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> VerifyError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::InvalidSignature => VerifyError::BadSignature,
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => VerifyError::Expired,
        ErrorKind::InvalidIssuer => VerifyError::IssuerMismatch,
        ErrorKind::InvalidAudience => VerifyError::AudienceMismatch,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            VerifyError::UnsupportedAlgorithm(err.to_string())
        }
        _ => VerifyError::Malformed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_keys;
    use httpmock::prelude::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::Duration;

    const ISSUER: &str = "http://localhost:8081/auth/realms/oauth-oidc-realm";
    const AUDIENCE: &str = "oauth-oidc-client";
    const LOCAL_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
    const LOCAL_ISSUER: &str = "oidc-demo";
    const LOCAL_AUDIENCE: &str = "oidc-demo-api";

    fn sign_rs256(claims: &serde_json::Value, kid: &str) -> String {
        let key = EncodingKey::from_rsa_pem(test_keys::RSA_PRIVATE_PEM.as_bytes()).unwrap();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(&header, claims, &key).unwrap()
    }

    fn provider_claims() -> serde_json::Value {
        let now = Utc::now().timestamp();
        serde_json::json!({
            "sub": "user-1",
            "iss": ISSUER,
            "aud": AUDIENCE,
            "iat": now,
            "exp": now + 300,
            "preferred_username": "alice",
            "realm_access": {"roles": ["USER"]},
        })
    }

    async fn cache_with_jwks(server: &MockServer) -> Arc<KeyCache> {
        let cache =
            Arc::new(KeyCache::new(server.url("/certs"), Duration::from_secs(5)).unwrap());
        cache.refresh().await.unwrap();
        cache
    }

    fn jwks_mock(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(GET).path("/certs");
            then.status(200).json_body(test_keys::jwks_document());
        })
    }

    fn verifier(cache: Arc<KeyCache>) -> TokenVerifier {
        TokenVerifier::new(
            cache,
            ISSUER.to_string(),
            AUDIENCE.to_string(),
            LOCAL_SECRET,
            LOCAL_ISSUER.to_string(),
            LOCAL_AUDIENCE.to_string(),
        )
    }

    #[tokio::test]
    async fn valid_provider_token_yields_claims() {
        let server = MockServer::start_async().await;
        jwks_mock(&server);
        let verifier = verifier(cache_with_jwks(&server).await);

        let token = sign_rs256(&provider_claims(), test_keys::KID);
        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.granted_roles().contains("USER"));
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let server = MockServer::start_async().await;
        jwks_mock(&server);
        let verifier = verifier(cache_with_jwks(&server).await);

        let token = sign_rs256(&provider_claims(), test_keys::KID);
        // Flip the last character of the signature.
        let mut tampered = token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });

        let err = verifier.verify(&tampered).await.unwrap_err();
        assert!(matches!(err, VerifyError::BadSignature), "got {err:?}");
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let server = MockServer::start_async().await;
        jwks_mock(&server);
        let verifier = verifier(cache_with_jwks(&server).await);

        let mut claims = provider_claims();
        claims["exp"] = serde_json::json!(Utc::now().timestamp() - 600);
        let err = verifier
            .verify(&sign_rs256(&claims, test_keys::KID))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Expired));
    }

    #[tokio::test]
    async fn wrong_issuer_and_audience_are_distinct() {
        let server = MockServer::start_async().await;
        jwks_mock(&server);
        let verifier = verifier(cache_with_jwks(&server).await);

        let mut claims = provider_claims();
        claims["iss"] = serde_json::json!("http://evil.example");
        let err = verifier
            .verify(&sign_rs256(&claims, test_keys::KID))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::IssuerMismatch));

        let mut claims = provider_claims();
        claims["aud"] = serde_json::json!("someone-else");
        let err = verifier
            .verify(&sign_rs256(&claims, test_keys::KID))
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::AudienceMismatch));
    }

    #[tokio::test]
    async fn unknown_kid_triggers_exactly_one_refresh() {
        let server = MockServer::start_async().await;
        let mock = jwks_mock(&server);
        let verifier = verifier(cache_with_jwks(&server).await);
        // One hit so far from the warm-up refresh.
        mock.assert_hits(1);

        let token = sign_rs256(&provider_claims(), "rotated-away");
        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::UnknownKey(kid) if kid == "rotated-away"));
        mock.assert_hits(2);
    }

    #[tokio::test]
    async fn jwks_outage_with_cached_key_still_verifies() {
        let server = MockServer::start_async().await;
        let mut ok = jwks_mock(&server);
        let cache = cache_with_jwks(&server).await;
        ok.delete();
        server.mock(|when, then| {
            when.method(GET).path("/certs");
            then.status(503);
        });

        let verifier = verifier(cache);
        let token = sign_rs256(&provider_claims(), test_keys::KID);
        assert!(verifier.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn local_hs256_token_round_trips() {
        let server = MockServer::start_async().await;
        let cache =
            Arc::new(KeyCache::new(server.url("/certs"), Duration::from_secs(5)).unwrap());
        let verifier = verifier(cache);

        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "sub": "user-1",
            "iss": LOCAL_ISSUER,
            "aud": LOCAL_AUDIENCE,
            "iat": now,
            "exp": now + 300,
            "roles": ["USER", "ADMIN"],
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(LOCAL_SECRET),
        )
        .unwrap();

        let claims = verifier.verify(&token).await.unwrap();
        assert!(claims.granted_roles().contains("ADMIN"));
    }

    #[tokio::test]
    async fn unsupported_algorithm_is_rejected_outright() {
        let server = MockServer::start_async().await;
        let cache =
            Arc::new(KeyCache::new(server.url("/certs"), Duration::from_secs(5)).unwrap());
        let verifier = verifier(cache);

        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "sub": "user-1", "iss": LOCAL_ISSUER, "aud": LOCAL_AUDIENCE,
            "iat": now, "exp": now + 300,
        });
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(LOCAL_SECRET),
        )
        .unwrap();

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::UnsupportedAlgorithm(_)));
    }
}
