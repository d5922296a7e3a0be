//! Email verification endpoints.

use axum::{Json, extract::Extension, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::otp::OtpNamespace;

use super::error::AuthFailure;
use super::register::send_verification_code;
use super::state::AuthState;
use super::storage;
use super::types::{MessageResponse, ResendVerificationRequest, VerifyEmailRequest};
use super::utils::{normalize_email, valid_email};

/// Consume the emailed code and activate the account.
#[utoipa::path(
    post,
    path = "/api/v1/auth/email/verify",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified, account active", body = MessageResponse),
        (status = 400, description = "Invalid or expired code"),
        (status = 404, description = "Unknown email")
    ),
    tag = "auth"
)]
pub async fn verify_email(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<impl IntoResponse, AuthFailure> {
    let email = normalize_email(&request.email);
    let user = storage::lookup_by_email(&pool, &email)
        .await?
        .ok_or(AuthFailure::NotFound)?;

    let consumed = auth_state
        .otp()
        .consume(OtpNamespace::EmailVerify, &email, request.code.trim())
        .await?;
    if !consumed {
        return Err(AuthFailure::BadRequest(
            "invalid or expired code".to_string(),
        ));
    }

    storage::activate_user(&pool, user.id).await?;
    info!(email = %email, "email verified");
    Ok(Json(MessageResponse::new("email verified")))
}

/// Send a fresh verification code. While a code is pending the request is
/// throttled with the remaining TTL; the generic success body never reveals
/// whether the address is registered.
#[utoipa::path(
    post,
    path = "/api/v1/auth/email/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Generic acceptance", body = MessageResponse),
        (status = 400, description = "Account already active"),
        (status = 429, description = "A code is already pending")
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<ResendVerificationRequest>,
) -> Result<impl IntoResponse, AuthFailure> {
    let generic = || Json(MessageResponse::new("if the address is registered, a code was sent"));

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Ok(generic());
    }

    let Some(user) = storage::lookup_by_email(&pool, &email).await? else {
        return Ok(generic());
    };
    if user.active {
        return Err(AuthFailure::BadRequest(
            "account already verified".to_string(),
        ));
    }

    if auth_state
        .otp()
        .exists(OtpNamespace::EmailVerify, &email)
        .await?
    {
        let retry_after = auth_state
            .otp()
            .ttl(OtpNamespace::EmailVerify, &email)
            .await?
            .unwrap_or(OtpNamespace::EmailVerify.ttl_seconds());
        return Err(AuthFailure::Throttled { retry_after });
    }

    send_verification_code(&auth_state, &email).await?;
    Ok(generic())
}
