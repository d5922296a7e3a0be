//! Request/response types for the auth endpoints, plus the role enum the
//! rest of the platform keys authorization on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Authorization role carried on every profile.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Trainer,
    Trainee,
    Guardian,
    Intern,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Trainer => "TRAINER",
            Self::Trainee => "TRAINEE",
            Self::Guardian => "GUARDIAN",
            Self::Intern => "INTERN",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "ADMIN" => Some(Self::Admin),
            "TRAINER" => Some(Self::Trainer),
            "TRAINEE" => Some(Self::Trainee),
            "GUARDIAN" => Some(Self::Guardian),
            "INTERN" => Some(Self::Intern),
            _ => None,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserRead {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendVerificationRequest {
    pub email: String,
}

/// OAuth2-style form body for `/login`.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

impl TokenPairResponse {
    #[must_use]
    pub fn bearer(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorChallengeResponse {
    pub two_factor_required: bool,
    pub temp_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorLoginRequest {
    pub temp_token: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutRequest {
    pub refresh_jti: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetValidateRequest {
    pub email: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetCompleteRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorEnableResponse {
    pub secret: String,
    pub qr: String,
    pub backup_codes: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorVerifyRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorDisableRequest {
    pub password: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionRevokeRequest {
    pub session_id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RevokedCountResponse {
    pub revoked: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_serde() {
        let value = serde_json::to_value(Role::Guardian).unwrap();
        assert_eq!(value, "GUARDIAN");
        let decoded: Role = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, Role::Guardian);
    }

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse(" Trainer "), Some(Role::Trainer));
        assert_eq!(Role::parse("athlete"), None);
    }

    #[test]
    fn token_pair_defaults_to_bearer() {
        let pair = TokenPairResponse::bearer("a".to_string(), "r".to_string());
        assert_eq!(pair.token_type, "bearer");
    }

    #[test]
    fn register_request_round_trips() {
        let request = RegisterRequest {
            email: "runner@example.com".to_string(),
            password: "P@ssw0rd1".to_string(),
            full_name: "Casey Runner".to_string(),
        };
        let value = serde_json::to_value(&request).unwrap();
        let decoded: RegisterRequest = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.email, "runner@example.com");
        assert_eq!(decoded.full_name, "Casey Runner");
    }

    #[test]
    fn two_factor_challenge_shape() {
        let response = TwoFactorChallengeResponse {
            two_factor_required: true,
            temp_token: "token".to_string(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["two_factor_required"], true);
        assert_eq!(value["temp_token"], "token");
    }
}
