//! Second-factor enrollment lifecycle.
//!
//! Enable stores the secret and the hashed backup codes but leaves the
//! factor off; only a successful TOTP verification flips it on. Disable
//! requires the password plus a valid code (TOTP or backup) and clears
//! everything.

use anyhow::Context;
use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::password;
use crate::totp::backup;

use super::error::AuthFailure;
use super::gate::require_access;
use super::login::verify_second_factor;
use super::state::AuthState;
use super::storage;
use super::types::{
    MessageResponse, TwoFactorDisableRequest, TwoFactorEnableResponse, TwoFactorVerifyRequest,
};

/// Begin enrollment: generate the secret and backup codes, return them with
/// the provisioning QR. The factor stays off until `/2fa/verify`.
#[utoipa::path(
    post,
    path = "/api/v1/auth/2fa/enable",
    responses(
        (status = 200, description = "Secret, QR, and backup codes", body = TwoFactorEnableResponse),
        (status = 400, description = "Second factor already enabled"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn enable_2fa(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthFailure> {
    let (principal, _claims) = require_access(&headers, &pool, &auth_state).await?;
    let user = storage::lookup_by_public_id(&pool, principal.public_id)
        .await?
        .ok_or(AuthFailure::TokenInvalid)?;
    if user.two_factor_enabled {
        return Err(AuthFailure::BadRequest(
            "second factor already enabled".to_string(),
        ));
    }

    let secret = auth_state.totp().generate_secret();
    let qr = auth_state.totp().qr(&secret, &user.email)?;

    let count = auth_state.config().backup_code_count();
    let codes = tokio::task::spawn_blocking(move || backup::issue(count))
        .await
        .context("backup code issuance task failed")??;

    storage::store_totp_secret(&pool, user.id, &secret).await?;
    storage::set_backup_codes(&pool, user.id, &codes.hashes).await?;

    info!(user = %principal.public_id, "two-factor enrollment started");
    Ok(Json(TwoFactorEnableResponse {
        secret,
        qr,
        backup_codes: codes.codes,
    }))
}

/// Confirm enrollment with a first TOTP code; only then does the second
/// factor become required at login.
#[utoipa::path(
    post,
    path = "/api/v1/auth/2fa/verify",
    request_body = TwoFactorVerifyRequest,
    responses(
        (status = 200, description = "Second factor enabled", body = MessageResponse),
        (status = 400, description = "Invalid code or no pending enrollment"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn verify_2fa(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<TwoFactorVerifyRequest>,
) -> Result<impl IntoResponse, AuthFailure> {
    let (principal, _claims) = require_access(&headers, &pool, &auth_state).await?;
    let user = storage::lookup_by_public_id(&pool, principal.public_id)
        .await?
        .ok_or(AuthFailure::TokenInvalid)?;
    if user.two_factor_enabled {
        return Err(AuthFailure::BadRequest(
            "second factor already enabled".to_string(),
        ));
    }
    let Some(secret) = user.totp_secret.as_deref() else {
        return Err(AuthFailure::BadRequest(
            "no pending enrollment".to_string(),
        ));
    };

    if !auth_state.totp().verify(secret, request.code.trim())? {
        return Err(AuthFailure::BadRequest("invalid code".to_string()));
    }

    storage::enable_two_factor(&pool, user.id).await?;
    info!(user = %principal.public_id, "two-factor enabled");
    Ok(Json(MessageResponse::new("two-factor enabled")))
}

/// Turn the second factor off. Requires the current password and a valid
/// TOTP or backup code.
#[utoipa::path(
    post,
    path = "/api/v1/auth/2fa/disable",
    request_body = TwoFactorDisableRequest,
    responses(
        (status = 200, description = "Second factor disabled", body = MessageResponse),
        (status = 400, description = "Second factor not enabled"),
        (status = 401, description = "Wrong password or code")
    ),
    tag = "auth"
)]
pub async fn disable_2fa(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<TwoFactorDisableRequest>,
) -> Result<impl IntoResponse, AuthFailure> {
    let (principal, _claims) = require_access(&headers, &pool, &auth_state).await?;
    let user = storage::lookup_by_public_id(&pool, principal.public_id)
        .await?
        .ok_or(AuthFailure::TokenInvalid)?;
    if !user.two_factor_enabled {
        return Err(AuthFailure::BadRequest(
            "second factor not enabled".to_string(),
        ));
    }

    let plain = request.password;
    let stored = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || password::verify(&plain, &stored))
        .await
        .context("password verification task failed")?
        .map_err(|_| AuthFailure::CredentialInvalid)?;
    if !valid {
        return Err(AuthFailure::CredentialInvalid);
    }

    verify_second_factor(&pool, &auth_state, &user, request.code.trim()).await?;

    storage::disable_two_factor(&pool, user.id).await?;
    info!(user = %principal.public_id, "two-factor disabled");
    Ok(Json(MessageResponse::new("two-factor disabled")))
}
