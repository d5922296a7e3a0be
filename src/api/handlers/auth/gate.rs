//! Request gate for protected endpoints.
//!
//! A small pipeline of independently testable steps: extract the bearer,
//! decode it, require an access token, check the blacklist, load the user,
//! and require an active account. Every failure collapses into one of
//! three broad 401 shapes so responses do not narrate which step tripped.

use anyhow::Context;
use axum::http::HeaderMap;
use sqlx::PgPool;
use uuid::Uuid;

use crate::token::{self, Claims, TokenError, TokenKind};

use super::error::AuthFailure;
use super::state::AuthState;
use super::storage::{self, AuthUserRecord};
use super::types::Role;
use super::utils::extract_bearer_token;

/// Authenticated caller attached to the request.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: i64,
    pub public_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl Principal {
    /// Role guard: reject with 403 unless the principal's role is allowed.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), AuthFailure> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AuthFailure::Forbidden)
        }
    }
}

/// Run the full gate pipeline. Returns the principal plus the verified
/// claims (the access jti is needed by the logout paths).
pub async fn require_access(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<(Principal, Claims), AuthFailure> {
    let token = extract_bearer_token(headers).ok_or(AuthFailure::MissingCredential)?;
    let claims = decode_access_claims(state, &token).await?;

    let jti = parse_claim_uuid(&claims.jti)?;
    if state
        .revocation()
        .is_revoked(jti)
        .await
        .context("failed to check token revocation")?
    {
        return Err(AuthFailure::TokenInvalid);
    }

    let user = load_claim_user(pool, &claims).await?;
    if !user.active {
        return Err(AuthFailure::AccountInactive);
    }

    Ok((
        Principal {
            user_id: user.id,
            public_id: user.public_id,
            email: user.email,
            role: user.role,
        },
        claims,
    ))
}

/// Decode a bearer and require the `access` type.
pub(super) async fn decode_access_claims(
    state: &AuthState,
    token: &str,
) -> Result<Claims, AuthFailure> {
    let claims = decode_claims(state, token).await?;
    if claims.kind != TokenKind::Access {
        return Err(AuthFailure::TokenInvalid);
    }
    Ok(claims)
}

/// Decode any stadion token into claims, mapping codec errors to the
/// generic invalid-token shape.
pub(super) async fn decode_claims(state: &AuthState, token: &str) -> Result<Claims, AuthFailure> {
    match token::decode(state.keyring(), token).await {
        Ok(claims) => Ok(claims),
        Err(TokenError::Expired | TokenError::Invalid) => Err(AuthFailure::TokenInvalid),
        Err(TokenError::Keyring(err)) => Err(AuthFailure::Internal(err)),
    }
}

/// Resolve the `sub` claim to a user row; unknown subjects read as invalid
/// tokens, not as missing users.
pub(super) async fn load_claim_user(
    pool: &PgPool,
    claims: &Claims,
) -> Result<AuthUserRecord, AuthFailure> {
    let public_id = parse_claim_uuid(&claims.sub)?;
    storage::lookup_by_public_id(pool, public_id)
        .await
        .context("failed to load token subject")?
        .ok_or(AuthFailure::TokenInvalid)
}

pub(super) fn parse_claim_uuid(value: &str) -> Result<Uuid, AuthFailure> {
    Uuid::parse_str(value).map_err(|_| AuthFailure::TokenInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: 1,
            public_id: Uuid::nil(),
            email: "coach@example.com".to_string(),
            role,
        }
    }

    #[test]
    fn role_guard_allows_listed_roles() {
        assert!(principal(Role::Admin)
            .require_role(&[Role::Admin, Role::Trainer])
            .is_ok());
        assert!(principal(Role::Trainer)
            .require_role(&[Role::Admin, Role::Trainer])
            .is_ok());
    }

    #[test]
    fn role_guard_rejects_everyone_else() {
        let err = principal(Role::Trainee)
            .require_role(&[Role::Admin])
            .unwrap_err();
        assert!(matches!(err, AuthFailure::Forbidden));
    }

    #[test]
    fn claim_uuid_parsing() {
        assert!(parse_claim_uuid(&Uuid::new_v4().to_string()).is_ok());
        assert!(matches!(
            parse_claim_uuid("not-a-uuid"),
            Err(AuthFailure::TokenInvalid)
        ));
    }
}
