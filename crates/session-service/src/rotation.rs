//! Refresh-token rotation engine.
//!
//! Each session is a small state machine driven by the refresh tokens
//! presented against it:
//!
//! - `ACTIVE` - exactly one jti rotates successfully
//! - `GRACE` - the previous jti is briefly accepted, racing callers all
//!   receive the same freshly issued token
//! - `REVOKED` - terminal until the tombstone expires; reached by
//!   explicit logout or by reuse detection
//!
//! Rotation uses optimistic concurrency: mint, sign, then commit with a
//! compare-and-swap on the active jti. A conflict means another caller
//! committed first, so the loser re-reads and re-decides; it then finds
//! its jti demoted to previous and is served the winner's token. The
//! loop converges because every conflict moves the session forward to a
//! single new active pointer.

use std::sync::Arc;

use chrono::Utc;
use common::jwt::{AccessClaims, TokenVault};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::SessionError;
use crate::store::{CasOutcome, RotateCommit, SessionMeta, SessionStore, SessionView};

/// Minimum lifetime of a revocation tombstone, even when the triggering
/// token was nearly expired.
const REVOKED_TTL_FLOOR_SECONDS: i64 = 300;

/// A freshly created session and its first refresh token.
#[derive(Debug)]
pub struct IssuedSession {
    pub sid: String,
    pub sub: String,
    pub refresh_token: String,
}

/// Result of presenting a refresh token for rotation.
///
/// `rotated` is `false` only on the sliding "touch" path, where the
/// presented token is returned unchanged.
#[derive(Debug)]
pub struct RotationOutcome {
    pub refresh_token: String,
    pub rotated: bool,
    pub sub: String,
    pub sid: String,
}

/// Session lifecycle engine over a [`SessionStore`].
pub struct RotationEngine<S> {
    store: S,
    vault: Arc<TokenVault>,
    grace_seconds: u64,
    idempotency_seconds: u64,
    sliding_threshold_seconds: u64,
}

impl<S: SessionStore> RotationEngine<S> {
    pub fn new(
        store: S,
        vault: Arc<TokenVault>,
        grace_seconds: u64,
        idempotency_seconds: u64,
        sliding_threshold_seconds: u64,
    ) -> Self {
        Self {
            store,
            vault,
            grace_seconds,
            idempotency_seconds,
            sliding_threshold_seconds,
        }
    }

    /// Sign an access token for `sub`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Crypto` if signing fails.
    pub fn sign_access(&self, sub: &str) -> Result<String, SessionError> {
        Ok(self.vault.sign_access(sub)?)
    }

    /// Verify an access token presented by a session owner.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidToken` on any verification failure.
    pub fn authenticate(&self, access_token: &str) -> Result<AccessClaims, SessionError> {
        Ok(self.vault.verify_access(access_token)?)
    }

    /// Create a session for `user_id` and issue its first refresh token.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` or `SessionError::Crypto`.
    pub async fn issue_initial_session(
        &self,
        user_id: &str,
        meta: &SessionMeta,
    ) -> Result<IssuedSession, SessionError> {
        let ttl = self.vault.refresh_ttl_secs().max(1) as u64;
        let created = self.store.create_session(user_id, meta, ttl).await?;
        let refresh_token = self
            .vault
            .sign_refresh(user_id, &created.jti, &created.sid)?;

        info!(
            target: "session.rotation",
            sid = %created.sid,
            "Session created"
        );

        Ok(IssuedSession {
            sid: created.sid,
            sub: user_id.to_string(),
            refresh_token,
        })
    }

    /// Present a refresh token for rotation.
    ///
    /// # Errors
    ///
    /// - `InvalidToken`: verification failed
    /// - `SessionRevoked`: the family carries a revocation tombstone
    /// - `ReuseDetected`: a stale token was replayed outside the grace
    ///   window, or the session state has expired from the store while
    ///   the token stayed verifiable; the whole family is revoked as a
    ///   side effect
    pub async fn rotate(
        &self,
        refresh_token: &str,
        meta: &SessionMeta,
    ) -> Result<RotationOutcome, SessionError> {
        let claims = self.vault.verify_refresh(refresh_token)?;
        let sid = claims.sid.clone();

        // Fail fast on a revoked family, no further store writes.
        if self.store.is_revoked(&sid).await? {
            warn!(target: "session.rotation", sid = %sid, "Rotation attempted on revoked session");
            return Err(SessionError::SessionRevoked);
        }

        let remain = claims.exp - Utc::now().timestamp();

        // Sliding touch: plenty of lifetime left, so extend the session to
        // the token's remaining lifetime and hand the same token back.
        if self.sliding_threshold_seconds > 0 && remain > self.sliding_threshold_seconds as i64 {
            self.store.touch(&sid, meta, Some(remain as u64)).await?;
            debug!(target: "session.rotation", sid = %sid, "Session touched without rotation");
            return Ok(RotationOutcome {
                refresh_token: refresh_token.to_string(),
                rotated: false,
                sub: claims.sub,
                sid,
            });
        }

        loop {
            let active = self.store.get_active_jti(&sid).await?;

            if active.as_deref() == Some(claims.jti.as_str()) {
                let new_jti = Uuid::new_v4().to_string();
                let new_refresh = self.vault.sign_refresh(&claims.sub, &new_jti, &sid)?;
                let session_ttl = self.vault.refresh_ttl_secs().max(1) as u64;

                let commit = RotateCommit {
                    expected_jti: &claims.jti,
                    new_jti: &new_jti,
                    new_refresh_token: &new_refresh,
                    session_ttl_seconds: session_ttl,
                    grace_seconds: self.grace_seconds,
                    idempotency_seconds: self.idempotency_seconds,
                };

                match self.store.cas_rotate(&sid, commit).await? {
                    CasOutcome::Committed => {
                        self.store.touch(&sid, meta, None).await?;
                        info!(target: "session.rotation", sid = %sid, "Refresh token rotated");
                        return Ok(RotationOutcome {
                            refresh_token: new_refresh,
                            rotated: true,
                            sub: claims.sub,
                            sid,
                        });
                    }
                    CasOutcome::Conflict => {
                        debug!(
                            target: "session.rotation",
                            sid = %sid,
                            "Rotation conflict, re-reading session state"
                        );
                        continue;
                    }
                }
            }

            // Not the active jti. A racing caller may have tripped reuse
            // detection between our fail-fast check and this read.
            if self.store.is_revoked(&sid).await? {
                return Err(SessionError::SessionRevoked);
            }

            // A replay of the immediately-previous jti within its grace
            // window gets the winner's token, so every racer walks away
            // with the same response.
            if self.store.get_prev_jti(&sid).await?.as_deref() == Some(claims.jti.as_str()) {
                if let Some(last) = self.store.get_last_issued(&sid).await? {
                    self.store.touch(&sid, meta, None).await?;
                    debug!(
                        target: "session.rotation",
                        sid = %sid,
                        "Grace-window replay served the last issued token"
                    );
                    return Ok(RotationOutcome {
                        refresh_token: last,
                        rotated: true,
                        sub: claims.sub,
                        sid,
                    });
                }
                // Previous jti matched but the last issued token is gone.
                // Grace tracking has been lost, so fail closed.
            }

            // Stale or stolen token. A missing active pointer lands here
            // too: once the family has aged out of the store, a still-
            // verifiable token cannot be told apart from a replay. Lock
            // out the whole family, thief and legitimate holder alike.
            let revoke_ttl = remain.max(REVOKED_TTL_FLOOR_SECONDS) as u64;
            self.store.revoke(&sid, revoke_ttl).await?;
            warn!(
                target: "session.rotation",
                sid = %sid,
                "Refresh token reuse detected, session family revoked"
            );
            return Err(SessionError::ReuseDetected);
        }
    }

    /// Revoke the session a refresh token belongs to (logout).
    /// Idempotent: revoking an already-revoked family succeeds.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidToken` if the token fails
    /// verification.
    pub async fn revoke_family(&self, refresh_token: &str) -> Result<(), SessionError> {
        let claims = self.vault.verify_refresh(refresh_token)?;

        if !self.store.is_revoked(&claims.sid).await? {
            let remain = claims.exp - Utc::now().timestamp();
            let revoke_ttl = remain.max(REVOKED_TTL_FLOOR_SECONDS) as u64;
            self.store.revoke(&claims.sid, revoke_ttl).await?;
        }
        self.store
            .remove_from_index(&claims.sub, &claims.sid)
            .await?;

        info!(target: "session.rotation", sid = %claims.sid, "Session revoked");
        Ok(())
    }

    /// Revoke every session of `user_id`, returning how many were newly
    /// revoked. The index is cleaned regardless.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` on backend failure.
    pub async fn revoke_all(&self, user_id: &str) -> Result<usize, SessionError> {
        let views = self.store.list_sessions_of(user_id).await?;

        let mut revoked = 0;
        for view in views {
            // An expired session with no tombstone still gets one: a
            // token signed against it can stay verifiable past the
            // store state's expiry.
            if !view.revoked {
                let ttl = view.ttl_seconds.max(REVOKED_TTL_FLOOR_SECONDS) as u64;
                self.store.revoke(&view.sid, ttl).await?;
                revoked += 1;
            }
            self.store.remove_from_index(user_id, &view.sid).await?;
        }

        info!(
            target: "session.rotation",
            revoked_count = revoked,
            "All sessions revoked for user"
        );
        Ok(revoked)
    }

    /// Summaries of the user's sessions. Read-only, except that index
    /// entries whose session state has fully expired are pruned.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` on backend failure.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionView>, SessionError> {
        let views = self.store.list_sessions_of(user_id).await?;

        let mut live = Vec::with_capacity(views.len());
        for view in views {
            if view.active || view.revoked {
                live.push(view);
            } else {
                self.store.remove_from_index(user_id, &view.sid).await?;
            }
        }
        Ok(live)
    }

    /// Revoke one session by id, after verifying it belongs to `user_id`.
    /// Returns whether a tombstone was newly written.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` on backend failure.
    pub async fn revoke_sid(&self, user_id: &str, sid: &str) -> Result<bool, SessionError> {
        let views = self.store.list_sessions_of(user_id).await?;
        let Some(view) = views.into_iter().find(|v| v.sid == sid) else {
            return Ok(false);
        };

        self.store.remove_from_index(user_id, sid).await?;
        if view.revoked {
            return Ok(false);
        }

        // Expired-but-untombstoned sessions are treated like live ones,
        // same as revoke_all.
        let ttl = view.ttl_seconds.max(REVOKED_TTL_FLOOR_SECONDS) as u64;
        self.store.revoke(sid, ttl).await?;
        info!(target: "session.rotation", sid = %sid, "Session revoked by id");
        Ok(true)
    }
}
