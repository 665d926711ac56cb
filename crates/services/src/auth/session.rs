//! Process-local session store for the browser pipeline.
//!
//! Maps an unguessable session identifier to the owning [`Identity`].
//! Sessions expire on an absolute deadline and on a sliding idle window;
//! an expired entry is indistinguishable from a missing one to callers.

use super::Identity;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Length in random bytes; encodes to a fixed 43-character identifier.
const SESSION_ID_BYTES: usize = 32;

struct SessionEntry {
    identity: Identity,
    created_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
}

impl SessionEntry {
    fn is_expired(&self, now: DateTime<Utc>, absolute: Duration, idle: Duration) -> bool {
        now - self.created_at > absolute || now - self.last_access > idle
    }
}

pub struct SessionStore {
    entries: RwLock<HashMap<String, SessionEntry>>,
    absolute_ttl: Duration,
    idle_ttl: Duration,
}

impl SessionStore {
    pub fn new(absolute_ttl: std::time::Duration, idle_ttl: std::time::Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            absolute_ttl: Duration::from_std(absolute_ttl).unwrap_or(Duration::hours(24)),
            idle_ttl: Duration::from_std(idle_ttl).unwrap_or(Duration::hours(1)),
        }
    }

    /// Create a session for a freshly authenticated identity and return its
    /// identifier.
    pub async fn create(&self, identity: Identity) -> String {
        let id = random_session_id();
        let now = Utc::now();
        let entry = SessionEntry {
            identity,
            created_at: now,
            last_access: now,
        };
        self.entries.write().await.insert(id.clone(), entry);
        id
    }

    /// Resolve a session identifier, renewing the sliding window.
    ///
    /// Expired entries are removed on the way out and reported as `None`,
    /// exactly like unknown identifiers.
    pub async fn get(&self, session_id: &str) -> Option<Identity> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(session_id) {
            Some(entry) if entry.is_expired(now, self.absolute_ttl, self.idle_ttl) => {
                debug!(sub = %entry.identity.subject, "session expired on access");
                entries.remove(session_id);
                None
            }
            Some(entry) => {
                entry.last_access = now;
                Some(entry.identity.clone())
            }
            None => None,
        }
    }

    /// Destroy a session. Returns whether one existed. A destroyed
    /// identifier never resolves again.
    pub async fn destroy(&self, session_id: &str) -> bool {
        let removed = self.entries.write().await.remove(session_id);
        if let Some(entry) = &removed {
            debug!(sub = %entry.identity.subject, "session destroyed");
        }
        removed.is_some()
    }

    /// Remove expired entries; returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now, self.absolute_ttl, self.idle_ttl));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn random_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
