//! Boundary error for every auth endpoint.
//!
//! Responses are deliberately coarse: the three 401 shapes (missing
//! credential, invalid token, inactive user) and a generic
//! invalid-credentials body carry no hint of which internal step failed.
//! Internal failures are logged with detail and rendered as an opaque 500.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum AuthFailure {
    #[error("invalid credentials")]
    CredentialInvalid,
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid or expired token")]
    TokenInvalid,
    #[error("refresh token already used or unknown")]
    TokenReused,
    #[error("account inactive")]
    AccountInactive,
    #[error("not found")]
    NotFound,
    #[error("email already registered")]
    EmailConflict,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Validation(String),
    #[error("too many requests")]
    Throttled { retry_after: u64 },
    #[error("forbidden")]
    Forbidden,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

impl AuthFailure {
    fn status(&self) -> StatusCode {
        match self {
            Self::CredentialInvalid
            | Self::MissingCredential
            | Self::TokenInvalid
            | Self::TokenReused
            | Self::AccountInactive => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::EmailConflict => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(err) => {
                error!("auth internal error: {err:#}");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(ErrorBody { error: message })).into_response();
        if let Self::Throttled { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_kinds() {
        assert_eq!(
            AuthFailure::CredentialInvalid.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthFailure::TokenReused.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthFailure::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AuthFailure::EmailConflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            AuthFailure::Validation("weak".to_string()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AuthFailure::Throttled { retry_after: 60 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AuthFailure::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthFailure::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn throttled_response_sets_retry_after() {
        let response = AuthFailure::Throttled { retry_after: 120 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER).unwrap().to_str().unwrap(),
            "120"
        );
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let response = AuthFailure::Internal(anyhow::anyhow!("db password is hunter2"))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
