//! Login and the two-factor challenge step.

use anyhow::Context;
use axum::{
    Form, Json,
    extract::Extension,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::password;
use crate::token::{self, TokenKind};
use crate::totp::backup;

use super::error::AuthFailure;
use super::gate::{decode_claims, load_claim_user, parse_claim_uuid};
use super::state::AuthState;
use super::storage::{self, AuthUserRecord};
use super::tokens::issue_session_tokens;
use super::types::{
    LoginForm, TokenPairResponse, TwoFactorChallengeResponse, TwoFactorLoginRequest,
};
use super::utils::normalize_email;

/// Password login. Accounts with the second factor enabled receive a
/// short-lived challenge token instead of the pair.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body(
        content = LoginForm,
        content_type = "application/x-www-form-urlencoded"
    ),
    responses(
        (status = 200, description = "Token pair, or a 2FA challenge", body = TokenPairResponse),
        (status = 401, description = "Invalid credentials or inactive account")
    ),
    tag = "auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AuthFailure> {
    let email = normalize_email(&form.username);

    let Some(user) = storage::lookup_by_email(&pool, &email).await? else {
        // Burn a hash comparison so a missing account costs the same as a
        // wrong password.
        let plain = form.password;
        tokio::task::spawn_blocking(move || password::verify_dummy(&plain))
            .await
            .context("password verification task failed")?;
        return Err(AuthFailure::CredentialInvalid);
    };

    let plain = form.password;
    let stored = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || password::verify(&plain, &stored))
        .await
        .context("password verification task failed")?
        .map_err(|_| AuthFailure::CredentialInvalid)?;
    if !valid {
        return Err(AuthFailure::CredentialInvalid);
    }

    if !user.active {
        return Err(AuthFailure::AccountInactive);
    }

    if user.two_factor_enabled {
        let challenge = token::encode(
            auth_state.keyring(),
            TokenKind::TwoFactorChallenge,
            &user.public_id.to_string(),
            auth_state.config().challenge_ttl(),
        )
        .await
        .map_err(|err| {
            AuthFailure::Internal(anyhow::anyhow!(err).context("failed to sign challenge token"))
        })?;
        return Ok(Json(TwoFactorChallengeResponse {
            two_factor_required: true,
            temp_token: challenge.token,
        })
        .into_response());
    }

    let pair = issue_session_tokens(&pool, &auth_state, &user).await?;
    info!(email = %email, "login");
    Ok(Json(pair).into_response())
}

/// Complete a 2FA challenge with a TOTP code or a backup code.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login/2fa",
    request_body = TwoFactorLoginRequest,
    responses(
        (status = 200, description = "Token pair", body = TokenPairResponse),
        (status = 400, description = "Not a challenge token"),
        (status = 401, description = "Invalid challenge or code")
    ),
    tag = "auth"
)]
pub async fn login_2fa(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<TwoFactorLoginRequest>,
) -> Result<Json<TokenPairResponse>, AuthFailure> {
    let claims = decode_claims(&auth_state, request.temp_token.trim()).await?;
    if claims.kind != TokenKind::TwoFactorChallenge {
        return Err(AuthFailure::BadRequest(
            "not a two-factor challenge token".to_string(),
        ));
    }

    let jti = parse_claim_uuid(&claims.jti)?;
    if auth_state.revocation().is_revoked(jti).await? {
        return Err(AuthFailure::TokenInvalid);
    }

    let user = load_claim_user(&pool, &claims).await?;
    if !user.active {
        return Err(AuthFailure::AccountInactive);
    }

    verify_second_factor(&pool, &auth_state, &user, request.code.trim()).await?;

    // Challenges are one-shot: blacklist the jti for the rest of its life.
    auth_state.revocation().revoke_until(jti, claims.exp).await?;

    let pair = issue_session_tokens(&pool, &auth_state, &user).await?;
    info!(email = %user.email, "two-factor login");
    Ok(Json(pair))
}

/// TOTP first, backup-code fallback. A consumed backup code is removed from
/// the stored set before the login proceeds.
pub(super) async fn verify_second_factor(
    pool: &PgPool,
    state: &AuthState,
    user: &AuthUserRecord,
    code: &str,
) -> Result<(), AuthFailure> {
    let secret = user
        .totp_secret
        .as_deref()
        .ok_or(AuthFailure::CredentialInvalid)?;

    if state.totp().verify(secret, code)? {
        return Ok(());
    }

    let hashes = user.backup_code_hashes()?;
    if hashes.is_empty() {
        return Err(AuthFailure::CredentialInvalid);
    }
    let presented = code.to_string();
    let remaining = tokio::task::spawn_blocking(move || backup::consume(&hashes, &presented))
        .await
        .context("backup code verification task failed")?
        .ok_or(AuthFailure::CredentialInvalid)?;

    storage::set_backup_codes(pool, user.id, &remaining).await?;
    Ok(())
}
