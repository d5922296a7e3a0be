//! Session endpoints: logout, list, revoke one, revoke all.
//!
//! Revoking a session is a two-store operation: the SQL row goes inactive
//! (truth), and the surrendered token ids are pushed into the cache so the
//! still-unexpired access token stops working immediately and the refresh
//! token can never be consumed.

use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::AuthFailure;
use super::gate::require_access;
use super::session_store::{self, SurrenderedTokens};
use super::state::AuthState;
use super::types::{
    LogoutRequest, MessageResponse, RevokedCountResponse, SessionInfo, SessionRevokeRequest,
};

/// Blacklist the access token and drop the refresh whitelist entry of a
/// revoked session. Best effort: a cache hiccup here only means the access
/// token dies by TTL instead of immediately.
pub(super) async fn retire_session_tokens(state: &AuthState, surrendered: &SurrenderedTokens) {
    let access_deadline = (Utc::now() + state.config().access_ttl()).timestamp();
    if let Err(err) = state
        .revocation()
        .revoke_until(surrendered.access_jti, access_deadline)
        .await
    {
        warn!("failed to blacklist access token: {err:#}");
    }
    if let Err(err) = state
        .revocation()
        .forget_refresh(surrendered.refresh_jti)
        .await
    {
        warn!("failed to drop refresh whitelist entry: {err:#}");
    }
}

/// Log out of one session by its refresh token id.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Session revoked", body = MessageResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No such session for this account")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AuthFailure> {
    let (principal, _claims) = require_access(&headers, &pool, &auth_state).await?;

    // Ownership first: a foreign refresh id must read as not-found without
    // side effects.
    let session = session_store::find_by_refresh(&pool, request.refresh_jti)
        .await?
        .filter(|session| session.user_id == principal.user_id)
        .ok_or(AuthFailure::NotFound)?;

    let surrendered = session_store::revoke_by_refresh(&pool, session.refresh_jti)
        .await?
        .ok_or(AuthFailure::NotFound)?;
    retire_session_tokens(&auth_state, &surrendered).await;

    info!(user = %principal.public_id, "logout");
    Ok(Json(MessageResponse::new("logged out")))
}

/// List the caller's active sessions, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/auth/sessions",
    responses(
        (status = 200, description = "Active sessions", body = [SessionInfo]),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthFailure> {
    let (principal, _claims) = require_access(&headers, &pool, &auth_state).await?;
    let sessions = session_store::list_active(&pool, principal.user_id).await?;
    let body: Vec<SessionInfo> = sessions
        .iter()
        .map(|session| SessionInfo {
            session_id: session.public_id,
            created_at: session.created_at,
            expires_at: session.expires_at,
        })
        .collect();
    Ok(Json(body))
}

/// Revoke one of the caller's sessions by its id.
#[utoipa::path(
    post,
    path = "/api/v1/auth/sessions/revoke",
    request_body = SessionRevokeRequest,
    responses(
        (status = 200, description = "Session revoked", body = MessageResponse),
        (status = 404, description = "No such session for this account")
    ),
    tag = "auth"
)]
pub async fn revoke_session(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<SessionRevokeRequest>,
) -> Result<impl IntoResponse, AuthFailure> {
    let (principal, _claims) = require_access(&headers, &pool, &auth_state).await?;

    let surrendered =
        session_store::revoke_by_public_id(&pool, request.session_id, principal.user_id)
            .await?
            .ok_or(AuthFailure::NotFound)?;
    retire_session_tokens(&auth_state, &surrendered).await;

    info!(user = %principal.public_id, session = %request.session_id, "session revoked");
    Ok(Json(MessageResponse::new("session revoked")))
}

/// Revoke every active session of the caller, including the current one.
#[utoipa::path(
    post,
    path = "/api/v1/auth/sessions/revoke-all",
    responses(
        (status = 200, description = "Count of revoked sessions", body = RevokedCountResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn revoke_all_sessions(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthFailure> {
    let (principal, _claims) = require_access(&headers, &pool, &auth_state).await?;

    let revoked = session_store::revoke_all_for_user(&pool, principal.user_id).await?;
    for surrendered in &revoked {
        retire_session_tokens(&auth_state, surrendered).await;
    }

    info!(user = %principal.public_id, count = revoked.len(), "all sessions revoked");
    Ok(Json(RevokedCountResponse {
        revoked: revoked.len() as u64,
    }))
}
