//! Authorization-code login flow against the identity provider.
//!
//! `begin_login` builds the provider redirect and records a single-use
//! anti-forgery state; `complete_login` consumes the callback: state check
//! first (before any network call), provider-denial short-circuit, code
//! exchange with PKCE, ID-token validation, and Identity construction.

use super::verifier::TokenVerifier;
use super::{AuthError, Identity};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use config::OidcConfig;
use oauth2::basic::{
    BasicErrorResponse, BasicErrorResponseType, BasicRevocationErrorResponse,
    BasicTokenIntrospectionResponse, BasicTokenType,
};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    ExtraTokenFields, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RequestTokenError, Scope,
    StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Unconsumed login attempts are dropped after this long.
const PENDING_LOGIN_TTL_MINS: i64 = 10;

/// OIDC token responses carry an `id_token` next to the standard OAuth2
/// fields; the basic response type would silently drop it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenFields {
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

type OidcTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

// Fully configured client: auth and token endpoints set, the rest unused.
type ProviderClient = oauth2::Client<
    BasicErrorResponse,
    OidcTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Query parameters delivered to the login callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// One in-flight login attempt, keyed by its anti-forgery state value.
struct PendingLogin {
    pkce_verifier: String,
    created_at: DateTime<Utc>,
}

pub struct LoginFlow {
    client: ProviderClient,
    http: reqwest::Client,
    scopes: Vec<String>,
    userinfo_url: String,
    verifier: Arc<TokenVerifier>,
    pending: RwLock<HashMap<String, PendingLogin>>,
}

impl LoginFlow {
    pub fn new(
        oidc: &OidcConfig,
        verifier: Arc<TokenVerifier>,
        http_timeout: Duration,
    ) -> Result<Self, AuthError> {
        let auth_url = AuthUrl::new(oidc.authorization_endpoint())
            .map_err(|e| AuthError::ConfigError(format!("invalid authorization endpoint: {e}")))?;
        let token_url = TokenUrl::new(oidc.token_endpoint())
            .map_err(|e| AuthError::ConfigError(format!("invalid token endpoint: {e}")))?;
        let redirect_url = RedirectUrl::new(oidc.redirect_uri.clone())
            .map_err(|e| AuthError::ConfigError(format!("invalid redirect URI: {e}")))?;

        let client: ProviderClient = oauth2::Client::new(ClientId::new(oidc.client_id.clone()))
            .set_client_secret(ClientSecret::new(oidc.client_secret.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);

        // Redirects are disabled: the token endpoint must answer directly.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(http_timeout)
            .build()
            .map_err(|e| AuthError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            http,
            scopes: oidc.scopes.clone(),
            userinfo_url: oidc.userinfo_endpoint(),
            verifier,
            pending: RwLock::new(HashMap::new()),
        })
    }

    /// Build the provider authorization URL and register a fresh single-use
    /// state for the attempt. Returns `(redirect_url, state)`.
    pub async fn begin_login(&self) -> (String, String) {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = self.client.authorize_url(CsrfToken::new_random);
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (auth_url, csrf_state) = request.set_pkce_challenge(pkce_challenge).url();

        let state = csrf_state.secret().clone();
        self.pending.write().await.insert(
            state.clone(),
            PendingLogin {
                pkce_verifier: pkce_verifier.secret().clone(),
                created_at: Utc::now(),
            },
        );

        debug!("login started, redirecting to identity provider");
        (auth_url.to_string(), state)
    }

    /// Consume a login callback and return the authenticated identity.
    ///
    /// The caller is responsible for creating a session from the identity;
    /// on any error no session-worthy value is produced.
    pub async fn complete_login(&self, params: CallbackParams) -> Result<Identity, AuthError> {
        // State first: an unmatched callback is rejected before anything
        // touches the network. Removal under the write lock makes each
        // state single-use even when callbacks race.
        let state = params.state.as_deref().unwrap_or_default();
        let pending = self
            .pending
            .write()
            .await
            .remove(state)
            .ok_or(AuthError::CsrfMismatch)?;

        if Utc::now() - pending.created_at > ChronoDuration::minutes(PENDING_LOGIN_TTL_MINS) {
            warn!("login callback for an expired login attempt");
            return Err(AuthError::CsrfMismatch);
        }

        if let Some(error) = params.error {
            // Provider-reported failure; the description stays in the logs.
            warn!(%error, description = ?params.error_description, "provider denied the login");
            return Err(AuthError::ProviderDenied {
                error,
                description: params.error_description,
            });
        }

        let code = params.code.ok_or_else(|| {
            AuthError::TokenExchangeFailed("callback carried neither code nor error".to_string())
        })?;

        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(PkceCodeVerifier::new(pending.pkce_verifier))
            .request_async(&self.http)
            .await
            .map_err(map_exchange_error)?;

        let id_token = token.extra_fields().id_token.clone().ok_or_else(|| {
            AuthError::TokenExchangeFailed("provider response carried no ID token".to_string())
        })?;

        let claims = self.verifier.verify(&id_token).await?;
        let mut identity = Identity::from_claims(&claims);

        // The ID token usually carries everything; fall back to userinfo
        // only for missing profile claims. Failure here is not fatal.
        if identity.username.is_none() || identity.email.is_none() {
            if let Err(e) = self
                .enrich_from_userinfo(&mut identity, token.access_token().secret())
                .await
            {
                debug!(error = %e, "userinfo fetch failed, continuing with ID token claims");
            }
        }

        info!(sub = %identity.subject, "login completed");
        Ok(identity)
    }

    /// Drop pending login attempts older than their TTL.
    pub async fn sweep_pending(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::minutes(PENDING_LOGIN_TTL_MINS);
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, p| p.created_at > cutoff);
        before - pending.len()
    }

    async fn enrich_from_userinfo(
        &self,
        identity: &mut Identity,
        access_token: &str,
    ) -> Result<(), AuthError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Internal(format!("userinfo request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::Internal(format!(
                "userinfo endpoint returned HTTP {}",
                response.status()
            )));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| AuthError::Internal(format!("failed to parse userinfo: {e}")))?;

        if identity.username.is_none() {
            identity.username = info.preferred_username;
        }
        if identity.email.is_none() {
            identity.email = info.email;
            identity.email_verified = info.email_verified.unwrap_or(false);
        }
        if identity.full_name.is_none() {
            identity.full_name = info.name;
        }
        if identity.picture.is_none() {
            identity.picture = info.picture;
        }
        Ok(())
    }
}

fn map_exchange_error<RE: std::error::Error>(
    err: RequestTokenError<RE, BasicErrorResponse>,
) -> AuthError {
    match err {
        RequestTokenError::ServerResponse(response) => {
            if *response.error() == BasicErrorResponseType::InvalidGrant {
                // Single-use codes: replay and double-submission land here.
                AuthError::InvalidGrant
            } else {
                AuthError::TokenExchangeFailed(format!(
                    "provider rejected the exchange: {}",
                    response.error()
                ))
            }
        }
        other => AuthError::TokenExchangeFailed(other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{test_keys, KeyCache};
    use httpmock::prelude::*;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    const CLIENT_ID: &str = "oauth-oidc-client";
    const LOCAL_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn oidc_config(issuer: &str) -> OidcConfig {
        OidcConfig {
            issuer_url: issuer.to_string(),
            client_id: CLIENT_ID.to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost:8080/login/callback".to_string(),
            scopes: vec!["openid".to_string(), "profile".to_string()],
        }
    }

    async fn flow_for(server: &MockServer) -> LoginFlow {
        let issuer = server.base_url();
        let cache = Arc::new(
            KeyCache::new(
                format!("{issuer}/protocol/openid-connect/certs"),
                Duration::from_secs(5),
            )
            .unwrap(),
        );
        let verifier = Arc::new(TokenVerifier::new(
            cache,
            issuer.clone(),
            CLIENT_ID.to_string(),
            LOCAL_SECRET,
            "oidc-demo".to_string(),
            "oidc-demo-api".to_string(),
        ));
        LoginFlow::new(&oidc_config(&issuer), verifier, Duration::from_secs(5)).unwrap()
    }

    fn id_token(issuer: &str) -> String {
        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "sub": "user-1",
            "iss": issuer,
            "aud": CLIENT_ID,
            "iat": now,
            "exp": now + 300,
            "preferred_username": "alice",
            "email": "alice@example.com",
            "email_verified": true,
            "realm_access": {"roles": ["USER"]},
        });
        let key = EncodingKey::from_rsa_pem(test_keys::RSA_PRIVATE_PEM.as_bytes()).unwrap();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(test_keys::KID.to_string());
        encode(&header, &claims, &key).unwrap()
    }

    #[tokio::test]
    async fn begin_login_embeds_state_and_pkce() {
        let server = MockServer::start_async().await;
        let flow = flow_for(&server).await;

        let (url, state) = flow.begin_login().await;
        assert!(url.contains(&format!("state={state}")));
        assert!(url.contains("code_challenge="));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("scope=openid"));
        assert!(url.contains(&format!("client_id={CLIENT_ID}")));
    }

    #[tokio::test]
    async fn unknown_state_fails_without_network() {
        let server = MockServer::start_async().await;
        let token_endpoint = server
            .mock_async(|when, then| {
                when.method(POST).path("/protocol/openid-connect/token");
                then.status(500);
            })
            .await;
        let flow = flow_for(&server).await;

        let err = flow
            .complete_login(CallbackParams {
                code: Some("abc".to_string()),
                state: Some("forged".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CsrfMismatch));
        token_endpoint.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn provider_denial_short_circuits_before_exchange() {
        let server = MockServer::start_async().await;
        let token_endpoint = server
            .mock_async(|when, then| {
                when.method(POST).path("/protocol/openid-connect/token");
                then.status(500);
            })
            .await;
        let flow = flow_for(&server).await;
        let (_, state) = flow.begin_login().await;

        let err = flow
            .complete_login(CallbackParams {
                state: Some(state),
                error: Some("access_denied".to_string()),
                error_description: Some("User rejected the consent screen".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ProviderDenied { ref error, .. } if error == "access_denied"));
        token_endpoint.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn happy_path_returns_identity() {
        let server = MockServer::start_async().await;
        let issuer = server.base_url();
        server
            .mock_async(|when, then| {
                when.method(GET).path("/protocol/openid-connect/certs");
                then.status(200).json_body(test_keys::jwks_document());
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/protocol/openid-connect/token");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "opaque-access-token",
                    "token_type": "bearer",
                    "expires_in": 300,
                    "id_token": id_token(&issuer),
                }));
            })
            .await;

        let flow = flow_for(&server).await;
        let (_, state) = flow.begin_login().await;

        let identity = flow
            .complete_login(CallbackParams {
                code: Some("auth-code".to_string()),
                state: Some(state),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(identity.subject, "user-1");
        assert_eq!(identity.username.as_deref(), Some("alice"));
        assert!(identity.email_verified);
        assert!(identity.has_role("USER"));
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let server = MockServer::start_async().await;
        let issuer = server.base_url();
        server
            .mock_async(|when, then| {
                when.method(GET).path("/protocol/openid-connect/certs");
                then.status(200).json_body(test_keys::jwks_document());
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/protocol/openid-connect/token");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "opaque-access-token",
                    "token_type": "bearer",
                    "expires_in": 300,
                    "id_token": id_token(&issuer),
                }));
            })
            .await;

        let flow = flow_for(&server).await;
        let (_, state) = flow.begin_login().await;
        let params = CallbackParams {
            code: Some("auth-code".to_string()),
            state: Some(state),
            ..Default::default()
        };

        flow.complete_login(params.clone()).await.unwrap();
        let err = flow.complete_login(params).await.unwrap_err();
        assert!(matches!(err, AuthError::CsrfMismatch));
    }

    #[tokio::test]
    async fn concurrent_callbacks_consume_the_state_once() {
        let server = MockServer::start_async().await;
        let issuer = server.base_url();
        server
            .mock_async(|when, then| {
                when.method(GET).path("/protocol/openid-connect/certs");
                then.status(200).json_body(test_keys::jwks_document());
            })
            .await;
        let token_endpoint = server
            .mock_async(|when, then| {
                when.method(POST).path("/protocol/openid-connect/token");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "opaque-access-token",
                    "token_type": "bearer",
                    "expires_in": 300,
                    "id_token": id_token(&issuer),
                }));
            })
            .await;

        let flow = Arc::new(flow_for(&server).await);
        let (_, state) = flow.begin_login().await;
        let params = CallbackParams {
            code: Some("auth-code".to_string()),
            state: Some(state),
            ..Default::default()
        };

        // Double-click delivery: the same callback lands several times at
        // once. Exactly one wins; the rest fail the state check.
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let flow = flow.clone();
            let params = params.clone();
            tasks.push(tokio::spawn(
                async move { flow.complete_login(params).await },
            ));
        }

        let mut completed = 0;
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(identity) => {
                    assert_eq!(identity.subject, "user-1");
                    completed += 1;
                }
                Err(AuthError::CsrfMismatch) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(rejected, 3);
        // Only the winner ever reached the token endpoint.
        token_endpoint.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn invalid_grant_is_distinct_from_other_exchange_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/protocol/openid-connect/token");
                then.status(400)
                    .json_body(serde_json::json!({"error": "invalid_grant"}));
            })
            .await;

        let flow = flow_for(&server).await;
        let (_, state) = flow.begin_login().await;
        let err = flow
            .complete_login(CallbackParams {
                code: Some("already-used-code".to_string()),
                state: Some(state),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant));

        // Provider unreachable maps to the infrastructure-flavored error.
        let dead = oidc_config("http://127.0.0.1:1");
        let flow = {
            let cache = Arc::new(
                KeyCache::new("http://127.0.0.1:1/certs".to_string(), Duration::from_secs(1))
                    .unwrap(),
            );
            let verifier = Arc::new(TokenVerifier::new(
                cache,
                dead.issuer_url.clone(),
                CLIENT_ID.to_string(),
                LOCAL_SECRET,
                "oidc-demo".to_string(),
                "oidc-demo-api".to_string(),
            ));
            LoginFlow::new(&dead, verifier, Duration::from_secs(1)).unwrap()
        };
        let (_, state) = flow.begin_login().await;
        let err = flow
            .complete_login(CallbackParams {
                code: Some("code".to_string()),
                state: Some(state),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExchangeFailed(_)));
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn sweep_drops_stale_pending_logins() {
        let server = MockServer::start_async().await;
        let flow = flow_for(&server).await;
        flow.begin_login().await;
        // Fresh entries survive a sweep.
        assert_eq!(flow.sweep_pending().await, 0);
    }
}
