//! Registration endpoint.

use anyhow::Context;
use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::api::email::EmailMessage;
use crate::otp::OtpNamespace;
use crate::password;

use super::error::AuthFailure;
use super::state::AuthState;
use super::storage::{self, AuthUserRecord, SignupOutcome};
use super::types::{RegisterRequest, Role, UserRead};
use super::utils::{check_password_strength, normalize_email, valid_email};

fn user_read(user: &AuthUserRecord) -> UserRead {
    UserRead {
        id: user.public_id,
        email: user.email.clone(),
        full_name: user.full_name.clone(),
        role: user.role,
        active: user.active,
        created_at: user.created_at,
    }
}

/// Create an inactive account and send the email-verification code.
///
/// A repeated registration for a pending email returns the same 201 shape
/// without reissuing the code, so the endpoint neither leaks existence nor
/// lets callers pump the mailer.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, verification email sent", body = UserRead),
        (status = 409, description = "Email already registered"),
        (status = 422, description = "Invalid email or weak password")
    ),
    tag = "auth"
)]
pub async fn register(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthFailure> {
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(AuthFailure::Validation("invalid email address".to_string()));
    }
    check_password_strength(&request.password).map_err(AuthFailure::Validation)?;
    let full_name = request.full_name.trim().to_string();
    if full_name.is_empty() {
        return Err(AuthFailure::Validation("missing full name".to_string()));
    }

    // Argon2 is CPU-bound; keep it off the request executor.
    let plain = request.password;
    let password_hash = tokio::task::spawn_blocking(move || password::hash(&plain))
        .await
        .context("password hashing task failed")??;

    let user = match storage::insert_user(&pool, &email, &password_hash, &full_name, Role::Trainee)
        .await?
    {
        SignupOutcome::Created(user) => user,
        SignupOutcome::Conflict => {
            let existing = storage::lookup_by_email(&pool, &email)
                .await?
                .ok_or(AuthFailure::EmailConflict)?;
            if existing.active {
                return Err(AuthFailure::EmailConflict);
            }
            // Pending account: answer with the registration shape and rely
            // on the pending code as the resend throttle.
            return Ok((StatusCode::CREATED, Json(user_read(&existing))));
        }
    };

    send_verification_code(&auth_state, &email).await?;
    info!(email = %email, "registered new account");

    Ok((StatusCode::CREATED, Json(user_read(&user))))
}

/// Issue an email-verification code and hand it to the mailer. A delivery
/// failure removes the code again: a code that was never sent must not
/// exist.
pub(super) async fn send_verification_code(
    state: &AuthState,
    email: &str,
) -> Result<(), AuthFailure> {
    if state.otp().exists(OtpNamespace::EmailVerify, email).await? {
        return Ok(());
    }

    let code = state.otp().issue(OtpNamespace::EmailVerify, email).await?;
    let message = EmailMessage {
        to_email: email.to_string(),
        subject: "Verify your Stadion email".to_string(),
        body: format!("Your Stadion verification code is {code}. It expires in 15 minutes."),
    };
    if let Err(err) = state.mailer().send(&message) {
        state.otp().delete(OtpNamespace::EmailVerify, email).await?;
        return Err(AuthFailure::Internal(
            err.context("failed to send verification email"),
        ));
    }
    Ok(())
}
