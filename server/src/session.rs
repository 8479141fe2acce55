//! Session token store for dashboard logins.
//!
//! This module provides an in-memory session store with TTL management.
//! A successful login creates a session whose opaque token is handed to the
//! browser as a cookie; every protected request validates that token here.
//!
//! # Token Format
//!
//! Session tokens are 32 bytes of cryptographically secure random data,
//! base64-url encoded without padding, resulting in 43 character tokens.
//!
//! # Expiry
//!
//! A session is valid while `now <= expires_at`. Expired sessions are
//! removed lazily when validated and swept in bulk every time a new session
//! is created, so expired entries cannot accumulate between logins.
//!
//! # Thread Safety
//!
//! The [`SessionStore`] uses interior mutability with [`RwLock`] for
//! thread-safe access across async tasks.
//!
//! # Example
//!
//! ```rust
//! use feedgate_server::session::{SessionStore, SessionStoreConfig};
//!
//! let store = SessionStore::new(SessionStoreConfig::default());
//!
//! let token = store.create();
//! assert!(store.validate(Some(&token)));
//!
//! store.invalidate(&token);
//! assert!(!store.validate(Some(&token)));
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use tracing::{debug, trace};

/// Session lifetime (24 hours).
pub const SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Size of the random token in bytes.
const TOKEN_BYTES: usize = 32;

/// Expected length of base64-url encoded token (43 characters).
const TOKEN_LENGTH: usize = 43;

/// Configuration for the session store.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Time-to-live for new sessions.
    pub ttl: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            ttl: SESSION_DURATION,
        }
    }
}

impl SessionStoreConfig {
    /// Creates a new configuration with a custom TTL.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

/// A login session's validity window.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    /// When the session was created.
    pub created_at: Instant,

    /// When the session expires (`created_at + ttl`).
    pub expires_at: Instant,
}

impl Session {
    fn new(ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Returns true once `now` has moved past `expires_at`.
    fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Returns the remaining time until expiration, or zero if expired.
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Thread-safe in-memory session store.
///
/// Owned by the application state for the lifetime of the process. The
/// backing map is never exposed; callers only see the operations below.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    config: SessionStoreConfig,
}

impl SessionStore {
    /// Creates a new session store with the given configuration.
    pub fn new(config: SessionStoreConfig) -> Self {
        debug!(ttl_secs = config.ttl.as_secs(), "Creating new session store");
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Returns the TTL applied to new sessions.
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a new session and returns its token.
    ///
    /// Expired sessions are swept as a side effect. Token uniqueness rests
    /// on 256 bits of entropy and is not checked explicitly.
    pub fn create(&self) -> String {
        // Generate token first (outside of lock)
        let token = generate_session_token();
        let session = Session::new(self.config.ttl);

        let mut sessions = self.write();
        let swept = sweep_locked(&mut sessions);
        sessions.insert(token.clone(), session);

        trace!(
            ttl_secs = self.config.ttl.as_secs(),
            swept,
            active = sessions.len(),
            "Created new session"
        );

        token
    }

    /// Returns `true` if `token` names a live session.
    ///
    /// Absent and unknown tokens are invalid. An expired token is invalid
    /// and is removed from the store.
    pub fn validate(&self, token: Option<&str>) -> bool {
        let Some(token) = token else {
            trace!("No session token presented");
            return false;
        };

        // Quick format check
        if token.len() != TOKEN_LENGTH {
            trace!(token_len = token.len(), "Invalid token length");
            return false;
        }

        // First try read-only access
        {
            let sessions = self.read();
            match sessions.get(token) {
                Some(session) if !session.is_expired() => {
                    trace!(
                        remaining_secs = session.remaining_ttl().as_secs(),
                        "Session validated"
                    );
                    return true;
                }
                Some(_) => {}
                None => {
                    trace!("Session token not found");
                    return false;
                }
            }
        }

        // Session looked expired - re-check under the write lock so a
        // concurrent invalidate or sweep is never undone.
        let mut sessions = self.write();
        let now = Instant::now();
        if sessions
            .get(token)
            .is_some_and(|session| session.is_expired_at(now))
        {
            sessions.remove(token);
            trace!("Removed expired session during validation");
        }

        false
    }

    /// Removes a session. Unknown tokens are ignored.
    pub fn invalidate(&self, token: &str) {
        if self.write().remove(token).is_some() {
            trace!("Session invalidated");
        }
    }

    /// Removes all expired sessions and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.write();
        let removed = sweep_locked(&mut sessions);

        if removed > 0 {
            debug!(
                removed_count = removed,
                remaining_count = sessions.len(),
                "Cleaned up expired sessions"
            );
        }

        removed
    }

    /// Returns the current number of sessions in the store.
    ///
    /// Note: This count may include expired sessions that haven't been
    /// cleaned up yet.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Spawns a background task that sweeps expired sessions periodically.
    ///
    /// Complements the sweep performed on every [`create`](Self::create).
    pub fn spawn_sweep_task(
        store: std::sync::Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                store.sweep();
            }
        })
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionStoreConfig::default())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.sessions.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("SessionStore")
            .field("session_count", &len)
            .field("config", &self.config)
            .finish()
    }
}

fn sweep_locked(sessions: &mut HashMap<String, Session>) -> usize {
    let now = Instant::now();
    let initial_len = sessions.len();
    sessions.retain(|_, session| !session.is_expired_at(now));
    initial_len - sessions.len()
}

/// Generates a cryptographically secure session token.
///
/// The token is 32 bytes of random data, base64-url encoded without
/// padding, resulting in a 43-character string.
fn generate_session_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
