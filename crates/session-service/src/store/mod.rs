//! Session storage.
//!
//! The [`SessionStore`] trait is the only storage surface the rotation
//! engine sees. Each session (`sid`) owns a small family of values:
//!
//! - `active` - the jti currently accepted for rotation (session TTL)
//! - `prev` - the jti demoted by the last rotation (grace window TTL)
//! - `last` - the refresh token minted by the last rotation
//!   (idempotency window TTL)
//! - `revoked` - tombstone marking the family revoked
//! - a metadata hash (user id, device info, timestamps)
//!
//! plus a per-user index set of sids. No value outlives the family: every
//! write sets a matching expiration.

pub mod lua;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemorySessionStore;
pub use redis::RedisSessionStore;

/// Errors from a session store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Unexpected value in store: {0}")]
    Corrupt(String),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Client-supplied device metadata attached to a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMeta {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// Identifiers minted for a freshly created session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub sid: String,
    pub jti: String,
}

/// Everything a rotation commit writes, in one atomic unit.
#[derive(Debug)]
pub struct RotateCommit<'a> {
    /// The jti the caller believes is active. The commit only applies if
    /// this still matches at commit time.
    pub expected_jti: &'a str,
    /// The newly minted jti that becomes active.
    pub new_jti: &'a str,
    /// The freshly signed refresh token, remembered for racing callers.
    pub new_refresh_token: &'a str,
    /// Full session TTL applied to the new active jti and metadata.
    pub session_ttl_seconds: u64,
    /// How long the demoted jti stays acceptable.
    pub grace_seconds: u64,
    /// How long the new refresh token is replayed to racers.
    pub idempotency_seconds: u64,
}

/// Result of a compare-and-swap rotation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The commit applied; the new jti is now active.
    Committed,
    /// Another rotation won the race. Re-read and re-decide.
    Conflict,
}

/// Read-only summary of one session, as reported to the session owner.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub sid: String,
    pub active: bool,
    pub revoked: bool,
    pub ttl_seconds: i64,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: Option<i64>,
    pub last_seen_at: Option<i64>,
}

/// Storage contract for session families.
///
/// Implementations must make [`SessionStore::cas_rotate`] atomic with
/// respect to concurrent callers on the same sid: the commit applies only
/// if the active jti still equals `expected_jti` at commit time.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session for `user_id`, minting a fresh sid and jti, and
    /// add it to the user's session index.
    async fn create_session(
        &self,
        user_id: &str,
        meta: &SessionMeta,
        ttl_seconds: u64,
    ) -> Result<NewSession, StoreError>;

    /// The currently active jti, or `None` if the session is unknown or
    /// expired.
    async fn get_active_jti(&self, sid: &str) -> Result<Option<String>, StoreError>;

    /// The jti demoted by the most recent rotation, while its grace
    /// window lasts.
    async fn get_prev_jti(&self, sid: &str) -> Result<Option<String>, StoreError>;

    /// The refresh token minted by the most recent rotation, while its
    /// idempotency window lasts.
    async fn get_last_issued(&self, sid: &str) -> Result<Option<String>, StoreError>;

    /// Whether the family carries a revocation tombstone.
    async fn is_revoked(&self, sid: &str) -> Result<bool, StoreError>;

    /// Update `last_seen_at` and device metadata. When `new_ttl_seconds`
    /// is set, also extend the session's expirations to it.
    async fn touch(
        &self,
        sid: &str,
        meta: &SessionMeta,
        new_ttl_seconds: Option<u64>,
    ) -> Result<(), StoreError>;

    /// Atomically commit a rotation if the active jti still matches
    /// `commit.expected_jti`.
    async fn cas_rotate(&self, sid: &str, commit: RotateCommit<'_>)
        -> Result<CasOutcome, StoreError>;

    /// Mark the family revoked for `ttl_seconds` and delete its active,
    /// previous, and last-issued pointers.
    async fn revoke(&self, sid: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    /// Summaries for every sid in the user's index, in index order.
    /// Sids whose state has fully expired are reported with
    /// `active: false, revoked: false`.
    async fn list_sessions_of(&self, user_id: &str) -> Result<Vec<SessionView>, StoreError>;

    /// Drop a sid from the user's session index.
    async fn remove_from_index(&self, user_id: &str, sid: &str) -> Result<(), StoreError>;
}
