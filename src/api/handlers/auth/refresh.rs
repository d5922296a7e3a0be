//! Refresh-token rotation.
//!
//! Single use is enforced by the cache, not by this handler: the atomic
//! consume means concurrent attempts with the same token race inside the
//! cache and at most one proceeds. The loser gets a 401, which is how a
//! replayed refresh token looks as well.

use axum::{Json, extract::Extension};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::token::TokenKind;

use super::error::AuthFailure;
use super::gate::{decode_claims, parse_claim_uuid};
use super::session_store;
use super::state::AuthState;
use super::tokens::sign_pair;
use super::types::{RefreshRequest, TokenPairResponse};

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenPairResponse),
        (status = 400, description = "Not a refresh token"),
        (status = 401, description = "Reused, revoked, or unknown refresh token")
    ),
    tag = "auth"
)]
pub async fn refresh(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, AuthFailure> {
    let claims = decode_claims(&auth_state, request.refresh_token.trim()).await?;
    if claims.kind != TokenKind::Refresh {
        return Err(AuthFailure::BadRequest("not a refresh token".to_string()));
    }

    let old_jti = parse_claim_uuid(&claims.jti)?;
    let Some(sub) = auth_state.revocation().consume_refresh(old_jti).await? else {
        return Err(AuthFailure::TokenReused);
    };

    let pair = sign_pair(&auth_state, &sub).await?;

    let Some(previous) = session_store::rotate_tokens(
        &pool,
        old_jti,
        pair.access.jti,
        pair.refresh.jti,
        pair.refresh.expires_at,
    )
    .await?
    else {
        // Whitelisted but no active session row: the session was revoked
        // between issuance and now.
        return Err(AuthFailure::TokenReused);
    };

    auth_state
        .revocation()
        .store_refresh(pair.refresh.jti, &sub, pair.refresh.expires_at.timestamp())
        .await?;

    // The rotated-out access token is known server-side; blacklist it for
    // the rest of its possible lifetime.
    let access_deadline = (Utc::now() + auth_state.config().access_ttl()).timestamp();
    auth_state
        .revocation()
        .revoke_until(previous.access_jti, access_deadline)
        .await?;

    info!(sub = %sub, "refresh rotation");
    Ok(Json(pair.into_response()))
}
