//! HTTP surface of the session service.
//!
//! Handlers are thin: parse the request, call the rotation engine, shape
//! the response. All policy lives in [`crate::rotation`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::errors::SessionError;
use crate::rotation::RotationEngine;
use crate::store::{SessionMeta, SessionStore, SessionView};

/// Shared state handed to every handler.
pub struct AppState<S> {
    pub engine: Arc<RotationEngine<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

/// Build the service router.
pub fn router<S: SessionStore + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/auth/sessions",
            post(create_session::<S>).get(list_sessions::<S>),
        )
        .route("/auth/sessions/:sid", delete(revoke_session::<S>))
        .route("/auth/refresh", post(refresh::<S>))
        .route("/auth/logout", post(logout::<S>))
        .route("/auth/logout-all", post(logout_all::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, SessionError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty())
        .ok_or(SessionError::InvalidToken)
}

fn meta_from_headers(headers: &HeaderMap) -> SessionMeta {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    };
    SessionMeta {
        user_agent: header_str(header::USER_AGENT),
        ip: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string()),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    user_id: String,
}

#[derive(Serialize)]
struct TokenPairResponse {
    sid: String,
    access_token: String,
    refresh_token: String,
}

async fn create_session<S: SessionStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, SessionError> {
    let meta = meta_from_headers(&headers);
    let issued = state
        .engine
        .issue_initial_session(&req.user_id, &meta)
        .await?;
    let access_token = state.engine.sign_access(&issued.sub)?;

    Ok((
        StatusCode::CREATED,
        Json(TokenPairResponse {
            sid: issued.sid,
            access_token,
            refresh_token: issued.refresh_token,
        }),
    ))
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Serialize)]
struct RefreshResponse {
    sid: String,
    rotated: bool,
    access_token: String,
    refresh_token: String,
}

async fn refresh<S: SessionStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, SessionError> {
    let meta = meta_from_headers(&headers);
    let outcome = state.engine.rotate(&req.refresh_token, &meta).await?;
    let access_token = state.engine.sign_access(&outcome.sub)?;

    Ok(Json(RefreshResponse {
        sid: outcome.sid,
        rotated: outcome.rotated,
        access_token,
        refresh_token: outcome.refresh_token,
    }))
}

#[derive(Deserialize)]
struct LogoutRequest {
    refresh_token: String,
}

async fn logout<S: SessionStore>(
    State(state): State<AppState<S>>,
    Json(req): Json<LogoutRequest>,
) -> Result<StatusCode, SessionError> {
    state.engine.revoke_family(&req.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct RevokeAllResponse {
    revoked_count: usize,
}

async fn logout_all<S: SessionStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<RevokeAllResponse>, SessionError> {
    let claims = state.engine.authenticate(bearer_token(&headers)?)?;
    let revoked_count = state.engine.revoke_all(&claims.sub).await?;
    Ok(Json(RevokeAllResponse { revoked_count }))
}

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<SessionView>,
}

async fn list_sessions<S: SessionStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<SessionListResponse>, SessionError> {
    let claims = state.engine.authenticate(bearer_token(&headers)?)?;
    let sessions = state.engine.list_sessions(&claims.sub).await?;
    Ok(Json(SessionListResponse { sessions }))
}

#[derive(Serialize)]
struct RevokeSidResponse {
    revoked: bool,
}

async fn revoke_session<S: SessionStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Path(sid): Path<String>,
) -> Result<Json<RevokeSidResponse>, SessionError> {
    let claims = state.engine.authenticate(bearer_token(&headers)?)?;
    let revoked = state.engine.revoke_sid(&claims.sub, &sid).await?;
    Ok(Json(RevokeSidResponse { revoked }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_bearer_token_missing_or_malformed() {
        let headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert!(bearer_token(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(bearer_token(&headers).is_err());
    }

    #[test]
    fn test_meta_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, "keygate-cli/1.0".parse().unwrap());
        headers.insert("x-forwarded-for", "10.0.0.1, 172.16.0.1".parse().unwrap());

        let meta = meta_from_headers(&headers);
        assert_eq!(meta.user_agent.as_deref(), Some("keygate-cli/1.0"));
        assert_eq!(meta.ip.as_deref(), Some("10.0.0.1"));
    }
}
