//! Shared issuance path: sign a pair, bind it to the rolling session, and
//! whitelist the refresh id. Login, the 2FA step, and refresh all end here.

use anyhow::Context;
use sqlx::PgPool;

use crate::token::{self, IssuedToken, TokenKind};

use super::error::AuthFailure;
use super::session_store;
use super::state::AuthState;
use super::storage::AuthUserRecord;
use super::types::TokenPairResponse;

pub(super) struct IssuedPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

impl IssuedPair {
    pub(super) fn into_response(self) -> TokenPairResponse {
        TokenPairResponse::bearer(self.access.token, self.refresh.token)
    }
}

/// Sign a fresh access+refresh pair for `sub` without touching any store.
pub(super) async fn sign_pair(
    state: &AuthState,
    sub: &str,
) -> Result<IssuedPair, AuthFailure> {
    let access = token::encode(
        state.keyring(),
        TokenKind::Access,
        sub,
        state.config().access_ttl(),
    )
    .await
    .map_err(|err| AuthFailure::Internal(anyhow::anyhow!(err).context("failed to sign access token")))?;

    let refresh = token::encode(
        state.keyring(),
        TokenKind::Refresh,
        sub,
        state.config().refresh_ttl(),
    )
    .await
    .map_err(|err| AuthFailure::Internal(anyhow::anyhow!(err).context("failed to sign refresh token")))?;

    Ok(IssuedPair { access, refresh })
}

/// Full login issuance: sign a pair, create-or-roll the latest session, and
/// whitelist the refresh id for single-use consumption.
pub(super) async fn issue_session_tokens(
    pool: &PgPool,
    state: &AuthState,
    user: &AuthUserRecord,
) -> Result<TokenPairResponse, AuthFailure> {
    let sub = user.public_id.to_string();
    let pair = sign_pair(state, &sub).await?;

    session_store::create_or_update_latest(
        pool,
        user.id,
        pair.access.jti,
        pair.refresh.jti,
        pair.refresh.expires_at,
    )
    .await
    .context("failed to persist session")?;

    state
        .revocation()
        .store_refresh(pair.refresh.jti, &sub, pair.refresh.expires_at.timestamp())
        .await
        .context("failed to whitelist refresh token")?;

    Ok(pair.into_response())
}
