//! In-memory session store.
//!
//! Mirrors the Redis key family with plain maps guarded by one mutex, so
//! `cas_rotate` is trivially atomic. Expirations use `tokio::time::Instant`
//! and are checked lazily on read, which lets tests drive the grace and
//! idempotency windows with `tokio::time::pause`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    CasOutcome, NewSession, RotateCommit, SessionMeta, SessionStore, SessionView, StoreError,
};

#[derive(Clone)]
struct Expiring {
    value: String,
    expires_at: Instant,
}

impl Expiring {
    fn new(value: String, ttl_seconds: u64) -> Self {
        Self {
            value,
            expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
        }
    }

    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }

    fn remaining_seconds(&self) -> i64 {
        self.expires_at
            .saturating_duration_since(Instant::now())
            .as_secs() as i64
    }
}

#[derive(Clone)]
struct SessionRecord {
    user_id: String,
    user_agent: Option<String>,
    ip: Option<String>,
    created_at: i64,
    last_seen_at: i64,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    active: HashMap<String, Expiring>,
    prev: HashMap<String, Expiring>,
    last: HashMap<String, Expiring>,
    revoked: HashMap<String, Expiring>,
    sessions: HashMap<String, SessionRecord>,
    index: HashMap<String, HashSet<String>>,
}

/// Session store held entirely in process memory.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn live_value(map: &HashMap<String, Expiring>, sid: &str) -> Option<String> {
    map.get(sid)
        .filter(|entry| entry.live())
        .map(|entry| entry.value.clone())
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(
        &self,
        user_id: &str,
        meta: &SessionMeta,
        ttl_seconds: u64,
    ) -> Result<NewSession, StoreError> {
        let sid = Uuid::new_v4().to_string();
        let jti = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        let mut inner = self.lock();
        inner
            .active
            .insert(sid.clone(), Expiring::new(jti.clone(), ttl_seconds));
        inner.sessions.insert(
            sid.clone(),
            SessionRecord {
                user_id: user_id.to_string(),
                user_agent: meta.user_agent.clone(),
                ip: meta.ip.clone(),
                created_at: now,
                last_seen_at: now,
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        inner
            .index
            .entry(user_id.to_string())
            .or_default()
            .insert(sid.clone());

        Ok(NewSession { sid, jti })
    }

    async fn get_active_jti(&self, sid: &str) -> Result<Option<String>, StoreError> {
        Ok(live_value(&self.lock().active, sid))
    }

    async fn get_prev_jti(&self, sid: &str) -> Result<Option<String>, StoreError> {
        Ok(live_value(&self.lock().prev, sid))
    }

    async fn get_last_issued(&self, sid: &str) -> Result<Option<String>, StoreError> {
        Ok(live_value(&self.lock().last, sid))
    }

    async fn is_revoked(&self, sid: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .revoked
            .get(sid)
            .is_some_and(Expiring::live))
    }

    async fn touch(
        &self,
        sid: &str,
        meta: &SessionMeta,
        new_ttl_seconds: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();

        if let Some(ttl) = new_ttl_seconds {
            let new_expiry = Instant::now() + Duration::from_secs(ttl);
            if let Some(entry) = inner.active.get_mut(sid) {
                entry.expires_at = new_expiry;
            }
            if let Some(record) = inner.sessions.get_mut(sid) {
                record.expires_at = new_expiry;
            }
        }

        if let Some(record) = inner.sessions.get_mut(sid) {
            record.last_seen_at = Utc::now().timestamp();
            if meta.user_agent.is_some() {
                record.user_agent = meta.user_agent.clone();
            }
            if meta.ip.is_some() {
                record.ip = meta.ip.clone();
            }
        }
        Ok(())
    }

    async fn cas_rotate(
        &self,
        sid: &str,
        commit: RotateCommit<'_>,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.lock();

        match live_value(&inner.active, sid) {
            Some(current) if current == commit.expected_jti => {}
            _ => return Ok(CasOutcome::Conflict),
        }

        inner.active.insert(
            sid.to_string(),
            Expiring::new(commit.new_jti.to_string(), commit.session_ttl_seconds),
        );
        inner.prev.insert(
            sid.to_string(),
            Expiring::new(commit.expected_jti.to_string(), commit.grace_seconds),
        );
        inner.last.insert(
            sid.to_string(),
            Expiring::new(
                commit.new_refresh_token.to_string(),
                commit.idempotency_seconds,
            ),
        );
        if let Some(record) = inner.sessions.get_mut(sid) {
            record.expires_at = Instant::now() + Duration::from_secs(commit.session_ttl_seconds);
        }

        Ok(CasOutcome::Committed)
    }

    async fn revoke(&self, sid: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.revoked.insert(
            sid.to_string(),
            Expiring::new("1".to_string(), ttl_seconds),
        );
        inner.active.remove(sid);
        inner.prev.remove(sid);
        inner.last.remove(sid);
        inner.sessions.remove(sid);
        Ok(())
    }

    async fn list_sessions_of(&self, user_id: &str) -> Result<Vec<SessionView>, StoreError> {
        let inner = self.lock();

        let mut sids: Vec<String> = inner
            .index
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        sids.sort();

        let now = Instant::now();
        let views = sids
            .into_iter()
            .map(|sid| {
                let active_entry = inner.active.get(&sid).filter(|e| e.live());
                let revoked_entry = inner.revoked.get(&sid).filter(|e| e.live());
                let record = inner
                    .sessions
                    .get(&sid)
                    .filter(|r| now < r.expires_at);

                let ttl_seconds = revoked_entry
                    .or(active_entry)
                    .map(Expiring::remaining_seconds)
                    .unwrap_or(0);

                SessionView {
                    active: active_entry.is_some(),
                    revoked: revoked_entry.is_some(),
                    ttl_seconds,
                    user_agent: record.and_then(|r| r.user_agent.clone()),
                    ip: record.and_then(|r| r.ip.clone()),
                    created_at: record.map(|r| r.created_at),
                    last_seen_at: record.map(|r| r.last_seen_at),
                    sid,
                }
            })
            .collect();
        Ok(views)
    }

    async fn remove_from_index(&self, user_id: &str, sid: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let now_empty = match inner.index.get_mut(user_id) {
            Some(set) => {
                set.remove(sid);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.index.remove(user_id);
        }
        Ok(())
    }
}
