//! Cache of the identity provider's public signing keys (JWKS).
//!
//! Keys are refreshed on a periodic timer and on demand when verification
//! hits an unknown `kid`. Concurrent refreshes collapse into a single
//! in-flight fetch, and a failed fetch keeps serving the previous key set.

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("failed to fetch JWKS")]
    Network(String),

    #[error("JWKS endpoint returned HTTP {0}")]
    Status(u16),

    #[error("failed to parse JWKS document")]
    Parse(String),
}

/// A JSON Web Key Set, as published by the provider.
#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

/// A single JSON Web Key. Only RSA signing keys are used here.
#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
    #[serde(default, rename = "use")]
    key_use: Option<String>,
}

pub struct KeyCache {
    jwks_url: String,
    http: reqwest::Client,
    keys: RwLock<HashMap<String, DecodingKey>>,
    /// Serializes refreshes; waiters that queued behind an in-flight
    /// refresh observe its outcome via the generation counter and
    /// `last_error` instead of fetching again.
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
    last_error: RwLock<Option<FetchError>>,
}

impl KeyCache {
    pub fn new(jwks_url: String, http_timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self {
            jwks_url,
            http,
            keys: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            last_error: RwLock::new(None),
        })
    }

    /// Look up a verification key by its key identifier.
    pub async fn get(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().await.get(kid).cloned()
    }

    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }

    /// Fetch the key set and replace the cache.
    ///
    /// Callers that arrive while a refresh is in flight wait for it and
    /// adopt its outcome, success or failure, instead of issuing a
    /// duplicate fetch. On failure the previous key set is retained.
    pub async fn refresh(&self) -> Result<(), FetchError> {
        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            // Another caller completed an attempt while we were queued;
            // its outcome is ours.
            return match &*self.last_error.read().await {
                None => Ok(()),
                Some(e) => Err(e.clone()),
            };
        }

        let outcome = match self.fetch_with_retry().await {
            Ok(fresh) => {
                debug!(keys = fresh.len(), "JWKS refreshed");
                *self.keys.write().await = fresh;
                Ok(())
            }
            Err(e) => {
                let cached = self.keys.read().await.len();
                warn!(error = %e, cached_keys = cached, "JWKS refresh failed, serving stale keys");
                Err(e)
            }
        };

        // Publish the outcome before bumping the generation so queued
        // waiters never read a stale result.
        *self.last_error.write().await = outcome.clone().err();
        self.generation.fetch_add(1, Ordering::Release);
        outcome
    }

    /// One retry with a short backoff. The fetch is an idempotent GET, so
    /// retrying is safe.
    async fn fetch_with_retry(&self) -> Result<HashMap<String, DecodingKey>, FetchError> {
        match self.fetch_once().await {
            Ok(keys) => Ok(keys),
            Err(first) => {
                debug!(error = %first, "JWKS fetch failed, retrying once");
                tokio::time::sleep(Duration::from_millis(250)).await;
                self.fetch_once().await
            }
        }
    }

    async fn fetch_once(&self) -> Result<HashMap<String, DecodingKey>, FetchError> {
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            if matches!(jwk.key_use.as_deref(), Some(u) if u != "sig") {
                continue;
            }
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(e) => {
                    warn!(kid = %jwk.kid, error = %e, "skipping unparseable JWK");
                }
            }
        }
        Ok(keys)
    }
}
