//! Password change and the three-step reset flow.

use anyhow::Context;
use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::email::EmailMessage;
use crate::otp::OtpNamespace;
use crate::password;

use super::error::AuthFailure;
use super::gate::require_access;
use super::session_store;
use super::sessions::retire_session_tokens;
use super::state::AuthState;
use super::storage;
use super::types::{
    MessageResponse, PasswordChangeRequest, PasswordResetCompleteRequest, PasswordResetRequest,
    PasswordResetValidateRequest,
};
use super::utils::{check_password_strength, normalize_email, valid_email};

const RESET_GENERIC_MESSAGE: &str = "if the address is registered, a reset code was sent";

/// Change the password of the authenticated user. All sessions are revoked;
/// the client must log in again.
#[utoipa::path(
    post,
    path = "/api/v1/auth/password/change",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed, sessions revoked", body = MessageResponse),
        (status = 400, description = "Weak password or confirmation mismatch"),
        (status = 401, description = "Wrong current password")
    ),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<PasswordChangeRequest>,
) -> Result<impl IntoResponse, AuthFailure> {
    let (principal, _claims) = require_access(&headers, &pool, &auth_state).await?;

    if request.new_password != request.confirm_password {
        return Err(AuthFailure::BadRequest(
            "password confirmation does not match".to_string(),
        ));
    }
    check_password_strength(&request.new_password).map_err(AuthFailure::BadRequest)?;

    let user = storage::lookup_by_public_id(&pool, principal.public_id)
        .await?
        .ok_or(AuthFailure::TokenInvalid)?;

    let current = request.current_password;
    let stored = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || password::verify(&current, &stored))
        .await
        .context("password verification task failed")?
        .map_err(|_| AuthFailure::CredentialInvalid)?;
    if !valid {
        return Err(AuthFailure::CredentialInvalid);
    }

    let new_password = request.new_password;
    let new_hash = tokio::task::spawn_blocking(move || password::hash(&new_password))
        .await
        .context("password hashing task failed")??;
    storage::set_password_hash(&pool, user.id, &new_hash).await?;

    revoke_all_and_retire(&pool, &auth_state, user.id).await?;
    notify(&auth_state, &user.email, "Your Stadion password was changed");

    info!(user = %principal.public_id, "password changed");
    Ok(Json(MessageResponse::new("password changed")))
}

/// Request a password-reset code. The response is the same whether or not
/// the account exists, and while a code is pending no new email goes out.
#[utoipa::path(
    post,
    path = "/api/v1/auth/password-reset/request",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Generic acceptance", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn reset_request(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<impl IntoResponse, AuthFailure> {
    let generic = || Json(MessageResponse::new(RESET_GENERIC_MESSAGE));

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Ok(generic());
    }
    let Some(_user) = storage::lookup_by_email(&pool, &email).await? else {
        return Ok(generic());
    };
    if auth_state
        .otp()
        .exists(OtpNamespace::PasswordReset, &email)
        .await?
    {
        // Throttle-success: same wording, no second email.
        return Ok(generic());
    }

    let code = auth_state
        .otp()
        .issue(OtpNamespace::PasswordReset, &email)
        .await?;
    let message = EmailMessage {
        to_email: email.clone(),
        subject: "Stadion password reset".to_string(),
        body: format!("Your Stadion password reset code is {code}. It expires in 5 minutes."),
    };
    if let Err(err) = auth_state.mailer().send(&message) {
        auth_state
            .otp()
            .delete(OtpNamespace::PasswordReset, &email)
            .await?;
        return Err(AuthFailure::Internal(
            err.context("failed to send reset email"),
        ));
    }

    info!(email = %email, "password reset requested");
    Ok(generic())
}

/// Non-consuming code check, so the UI can collect the new password only
/// after the code is known to be right.
#[utoipa::path(
    post,
    path = "/api/v1/auth/password-reset/validate-code",
    request_body = PasswordResetValidateRequest,
    responses(
        (status = 200, description = "Code is valid", body = MessageResponse),
        (status = 400, description = "Invalid code")
    ),
    tag = "auth"
)]
pub async fn reset_validate(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<PasswordResetValidateRequest>,
) -> Result<impl IntoResponse, AuthFailure> {
    let email = normalize_email(&request.email);
    let valid = auth_state
        .otp()
        .peek(OtpNamespace::PasswordReset, &email, request.code.trim())
        .await?;
    if !valid {
        return Err(AuthFailure::BadRequest("invalid code".to_string()));
    }
    Ok(Json(MessageResponse::new("code valid")))
}

/// Complete the reset: consume the code, store the new hash, revoke every
/// session.
#[utoipa::path(
    post,
    path = "/api/v1/auth/password-reset/reset",
    request_body = PasswordResetCompleteRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid code or weak password"),
        (status = 404, description = "Unknown email")
    ),
    tag = "auth"
)]
pub async fn reset_complete(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<PasswordResetCompleteRequest>,
) -> Result<impl IntoResponse, AuthFailure> {
    let email = normalize_email(&request.email);
    let user = storage::lookup_by_email(&pool, &email)
        .await?
        .ok_or(AuthFailure::NotFound)?;

    let consumed = auth_state
        .otp()
        .consume(OtpNamespace::PasswordReset, &email, request.code.trim())
        .await?;
    if !consumed {
        return Err(AuthFailure::BadRequest(
            "invalid or expired code".to_string(),
        ));
    }

    check_password_strength(&request.new_password).map_err(AuthFailure::BadRequest)?;

    let new_password = request.new_password;
    let new_hash = tokio::task::spawn_blocking(move || password::hash(&new_password))
        .await
        .context("password hashing task failed")??;
    storage::set_password_hash(&pool, user.id, &new_hash).await?;

    revoke_all_and_retire(&pool, &auth_state, user.id).await?;
    notify(&auth_state, &email, "Your Stadion password was reset");

    info!(email = %email, "password reset completed");
    Ok(Json(MessageResponse::new("password reset")))
}

async fn revoke_all_and_retire(
    pool: &PgPool,
    state: &AuthState,
    user_id: i64,
) -> Result<(), AuthFailure> {
    let revoked = session_store::revoke_all_for_user(pool, user_id).await?;
    for surrendered in &revoked {
        retire_session_tokens(state, surrendered).await;
    }
    Ok(())
}

/// Notification emails are advisory: failures are logged and swallowed.
fn notify(state: &AuthState, email: &str, subject: &str) {
    let message = EmailMessage {
        to_email: email.to_string(),
        subject: subject.to_string(),
        body: format!("{subject}. If this was not you, contact your club administrator."),
    };
    if let Err(err) = state.mailer().send(&message) {
        warn!(email = %email, "failed to send notification email: {err:#}");
    }
}
