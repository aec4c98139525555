//! Redis-backed session store.
//!
//! Key schema, all under the `rt:` prefix:
//!
//! - `rt:active:{sid}` - active jti, session TTL
//! - `rt:prev:{sid}` - demoted jti, grace window TTL
//! - `rt:last:{sid}` - last issued refresh token, idempotency window TTL
//! - `rt:revoked:{sid}` - revocation tombstone
//! - `rt:sess:{sid}` - metadata hash, session TTL
//! - `rt:sids:{userId}` - set of the user's session ids
//!
//! Rotation commits run as a single Lua script ([`super::lua::ROTATE_CAS`])
//! so the compare and every write happen atomically on the server. The
//! remaining multi-key writes use MULTI/EXEC pipelines.

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use super::{
    lua, CasOutcome, NewSession, RotateCommit, SessionMeta, SessionStore, SessionView, StoreError,
};

fn key_active(sid: &str) -> String {
    format!("rt:active:{sid}")
}

fn key_prev(sid: &str) -> String {
    format!("rt:prev:{sid}")
}

fn key_last(sid: &str) -> String {
    format!("rt:last:{sid}")
}

fn key_revoked(sid: &str) -> String {
    format!("rt:revoked:{sid}")
}

fn key_sess(sid: &str) -> String {
    format!("rt:sess:{sid}")
}

fn key_sids(user_id: &str) -> String {
    format!("rt:sids:{user_id}")
}

/// Session store backed by Redis.
///
/// Cheaply cloneable; the underlying `MultiplexedConnection` is designed
/// for concurrent use without locking.
#[derive(Clone)]
pub struct RedisSessionStore {
    connection: redis::aio::MultiplexedConnection,
    rotate_cas_script: Script,
}

impl RedisSessionStore {
    /// Connect to Redis and precompile the rotation script.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the client cannot be opened or
    /// the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        // Never log redis_url, it may embed credentials.
        let client = Client::open(redis_url).map_err(|e| {
            warn!(target: "session.store.redis", error = %e, "Failed to open Redis client");
            StoreError::Backend(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client.get_multiplexed_async_connection().await.map_err(|e| {
            warn!(target: "session.store.redis", error = %e, "Failed to connect to Redis");
            StoreError::Backend(format!("Failed to connect to Redis: {e}"))
        })?;

        Ok(Self {
            connection,
            rotate_cas_script: Script::new(lua::ROTATE_CAS),
        })
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await.map_err(StoreError::from)?;
        Ok(value)
    }

    async fn view_of(&self, sid: &str) -> Result<SessionView, StoreError> {
        let mut conn = self.connection.clone();

        let (active, revoked, active_ttl, revoked_ttl, meta): (
            bool,
            bool,
            i64,
            i64,
            HashMap<String, String>,
        ) = redis::pipe()
            .exists(key_active(sid))
            .exists(key_revoked(sid))
            .ttl(key_active(sid))
            .ttl(key_revoked(sid))
            .hgetall(key_sess(sid))
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)?;

        let ttl_seconds = if revoked { revoked_ttl } else { active_ttl }.max(0);

        Ok(SessionView {
            sid: sid.to_string(),
            active,
            revoked,
            ttl_seconds,
            user_agent: meta.get("user_agent").cloned(),
            ip: meta.get("ip").cloned(),
            created_at: meta.get("created_at").and_then(|v| v.parse().ok()),
            last_seen_at: meta.get("last_seen_at").and_then(|v| v.parse().ok()),
        })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create_session(
        &self,
        user_id: &str,
        meta: &SessionMeta,
        ttl_seconds: u64,
    ) -> Result<NewSession, StoreError> {
        let sid = Uuid::new_v4().to_string();
        let jti = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        let mut fields: Vec<(&str, String)> = vec![
            ("user_id", user_id.to_string()),
            ("created_at", now.to_string()),
            ("last_seen_at", now.to_string()),
        ];
        if let Some(ua) = &meta.user_agent {
            fields.push(("user_agent", ua.clone()));
        }
        if let Some(ip) = &meta.ip {
            fields.push(("ip", ip.clone()));
        }

        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .set_ex(key_active(&sid), &jti, ttl_seconds)
            .ignore()
            .hset_multiple(key_sess(&sid), &fields)
            .ignore()
            .expire(key_sess(&sid), ttl_seconds as i64)
            .ignore()
            .sadd(key_sids(user_id), &sid)
            .ignore()
            .expire(key_sids(user_id), ttl_seconds as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)?;

        Ok(NewSession { sid, jti })
    }

    async fn get_active_jti(&self, sid: &str) -> Result<Option<String>, StoreError> {
        self.get_string(&key_active(sid)).await
    }

    async fn get_prev_jti(&self, sid: &str) -> Result<Option<String>, StoreError> {
        self.get_string(&key_prev(sid)).await
    }

    async fn get_last_issued(&self, sid: &str) -> Result<Option<String>, StoreError> {
        self.get_string(&key_last(sid)).await
    }

    async fn is_revoked(&self, sid: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let exists: bool = conn
            .exists(key_revoked(sid))
            .await
            .map_err(StoreError::from)?;
        Ok(exists)
    }

    async fn touch(
        &self,
        sid: &str,
        meta: &SessionMeta,
        new_ttl_seconds: Option<u64>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();

        let mut fields: Vec<(&str, String)> = vec![("last_seen_at", now.to_string())];
        if let Some(ua) = &meta.user_agent {
            fields.push(("user_agent", ua.clone()));
        }
        if let Some(ip) = &meta.ip {
            fields.push(("ip", ip.clone()));
        }

        let mut pipe = redis::pipe();
        pipe.atomic().hset_multiple(key_sess(sid), &fields).ignore();
        if let Some(ttl) = new_ttl_seconds {
            pipe.expire(key_active(sid), ttl as i64).ignore();
            pipe.expire(key_sess(sid), ttl as i64).ignore();
        }

        let mut conn = self.connection.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn cas_rotate(
        &self,
        sid: &str,
        commit: RotateCommit<'_>,
    ) -> Result<CasOutcome, StoreError> {
        let mut conn = self.connection.clone();

        let committed: i64 = self
            .rotate_cas_script
            .key(key_active(sid))
            .key(key_prev(sid))
            .key(key_last(sid))
            .key(key_sess(sid))
            .arg(commit.expected_jti)
            .arg(commit.new_jti)
            .arg(commit.new_refresh_token)
            .arg(commit.session_ttl_seconds)
            .arg(commit.grace_seconds)
            .arg(commit.idempotency_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::from)?;

        match committed {
            1 => Ok(CasOutcome::Committed),
            0 => Ok(CasOutcome::Conflict),
            other => Err(StoreError::Corrupt(format!(
                "rotation script returned {other}"
            ))),
        }
    }

    async fn revoke(&self, sid: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .set_ex(key_revoked(sid), "1", ttl_seconds)
            .ignore()
            .del(&[key_active(sid), key_prev(sid), key_last(sid), key_sess(sid)])
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn list_sessions_of(&self, user_id: &str) -> Result<Vec<SessionView>, StoreError> {
        let mut conn = self.connection.clone();
        let mut sids: Vec<String> = conn
            .smembers(key_sids(user_id))
            .await
            .map_err(StoreError::from)?;
        sids.sort();

        let mut views = Vec::with_capacity(sids.len());
        for sid in &sids {
            views.push(self.view_of(sid).await?);
        }
        Ok(views)
    }

    async fn remove_from_index(&self, user_id: &str, sid: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .srem(key_sids(user_id), sid)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_schema() {
        assert_eq!(key_active("s1"), "rt:active:s1");
        assert_eq!(key_prev("s1"), "rt:prev:s1");
        assert_eq!(key_last("s1"), "rt:last:s1");
        assert_eq!(key_revoked("s1"), "rt:revoked:s1");
        assert_eq!(key_sess("s1"), "rt:sess:s1");
        assert_eq!(key_sids("u1"), "rt:sids:u1");
    }
}
