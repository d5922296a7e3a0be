//! Signed bearer-token codec over the signing keyring.
//!
//! Tokens are HS256 JWTs. Encoding always signs with the newest active key;
//! decoding tries every key in the grace window, newest first, so tokens
//! issued before a rotation keep verifying until the window closes.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keyring::{KeyRing, SigningKey};

/// The `type` claim carried by every token.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    #[serde(rename = "access")]
    Access,
    #[serde(rename = "refresh")]
    Refresh,
    #[serde(rename = "2fa-challenge")]
    TwoFactorChallenge,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::TwoFactorChallenge => "2fa-challenge",
        }
    }
}

/// Claims carried by every stadion token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User external id (UUID string).
    pub sub: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Expiration (unix seconds).
    pub exp: i64,
    /// Unique token id (UUID string), key for blacklist/whitelist entries.
    pub jti: String,
}

/// A freshly signed token together with the metadata callers persist.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub jti: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error(transparent)]
    Keyring(#[from] anyhow::Error),
}

/// Sign a token of `kind` for `sub` with the ring's current key.
///
/// # Errors
/// Returns an error if the keyring cannot provide a key or signing fails.
pub async fn encode(
    keyring: &KeyRing,
    kind: TokenKind,
    sub: &str,
    ttl: Duration,
) -> Result<IssuedToken, TokenError> {
    let key = keyring.current().await?;
    let now = Utc::now();
    let expires_at = now + ttl;
    let jti = Uuid::new_v4();
    let claims = Claims {
        sub: sub.to_string(),
        kind,
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
        jti: jti.to_string(),
    };

    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(key.secret.as_bytes()),
    )
    .map_err(|_| TokenError::Invalid)?;

    Ok(IssuedToken {
        token,
        jti,
        issued_at: now,
        expires_at,
    })
}

/// Decode and verify a token against every key in the grace window.
///
/// When no key verifies, the ring is reloaded from disk once and the set is
/// retried, so a rotation performed by another process heals itself. The
/// caller is responsible for checking `sub` and `type`.
///
/// # Errors
/// `TokenError::Expired` when the signature checks out but `exp` has
/// passed, `TokenError::Invalid` otherwise.
pub async fn decode(keyring: &KeyRing, token: &str) -> Result<Claims, TokenError> {
    match try_keys(&keyring.valid_set().await, token) {
        Ok(claims) => Ok(claims),
        Err(TokenError::Invalid) => {
            keyring.reload().await?;
            try_keys(&keyring.valid_set().await, token)
        }
        Err(err) => Err(err),
    }
}

fn try_keys(keys: &[SigningKey], token: &str) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp"]);
    // No leeway: an expired token is expired, and the rotation tests rely
    // on exact boundaries.
    validation.leeway = 0;

    for key in keys {
        match jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(key.secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => return Ok(data.claims),
            Err(err) => match err.kind() {
                // Signature matched this key; the token itself is stale.
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    return Err(TokenError::Expired);
                }
                _ => {}
            },
        }
    }
    Err(TokenError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::{DEFAULT_GRACE_DAYS, DEFAULT_ROTATION_DAYS};
    use tempfile::TempDir;

    async fn test_ring(dir: &TempDir) -> KeyRing {
        KeyRing::open(
            dir.path().join("keys.json"),
            DEFAULT_ROTATION_DAYS,
            DEFAULT_GRACE_DAYS,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn encode_decode_round_trip() {
        let dir = TempDir::new().unwrap();
        let ring = test_ring(&dir).await;
        let sub = Uuid::new_v4().to_string();

        let issued = encode(&ring, TokenKind::Access, &sub, Duration::minutes(15))
            .await
            .unwrap();
        let claims = decode(&ring, &issued.token).await.unwrap();

        assert_eq!(claims.sub, sub);
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.jti, issued.jti.to_string());
        assert!(claims.exp > claims.iat);
    }

    #[tokio::test]
    async fn jti_is_unique_per_token() {
        let dir = TempDir::new().unwrap();
        let ring = test_ring(&dir).await;

        let first = encode(&ring, TokenKind::Refresh, "sub", Duration::days(7))
            .await
            .unwrap();
        let second = encode(&ring, TokenKind::Refresh, "sub", Duration::days(7))
            .await
            .unwrap();
        assert_ne!(first.jti, second.jti);
    }

    #[tokio::test]
    async fn token_kind_round_trips_through_serde() {
        let claims = Claims {
            sub: "user".to_string(),
            kind: TokenKind::TwoFactorChallenge,
            iat: 0,
            exp: 1,
            jti: "jti".to_string(),
        };
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["type"], "2fa-challenge");
        let decoded: Claims = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.kind, TokenKind::TwoFactorChallenge);
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ring = test_ring(&dir).await;

        let issued = encode(&ring, TokenKind::Access, "sub", Duration::seconds(-120))
            .await
            .unwrap();
        let err = decode(&ring, &issued.token).await.unwrap_err();
        assert!(matches!(err, TokenError::Expired));
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() {
        let dir = TempDir::new().unwrap();
        let ring = test_ring(&dir).await;
        ring.current().await.unwrap();

        let err = decode(&ring, "not-a-token").await.unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }

    #[tokio::test]
    async fn decode_survives_rotation_via_grace_window() {
        let dir = TempDir::new().unwrap();
        let ring = test_ring(&dir).await;
        let issued = encode(&ring, TokenKind::Access, "sub", Duration::minutes(15))
            .await
            .unwrap();

        // rotate() inside the same second is a no-op, so reopen with a
        // backdated current key through a second handle.
        let other = test_ring(&dir).await;
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let outcome = other.rotate().await.unwrap();
        assert!(outcome.rotated);

        // The original handle self-heals by reloading the ring file.
        let claims = decode(&ring, &issued.token).await.unwrap();
        assert_eq!(claims.sub, "sub");

        // New tokens sign with the fresh key and still verify.
        let fresh = encode(&other, TokenKind::Access, "sub2", Duration::minutes(15))
            .await
            .unwrap();
        let claims = decode(&other, &fresh.token).await.unwrap();
        assert_eq!(claims.sub, "sub2");
    }

    #[tokio::test]
    async fn token_signed_with_unknown_key_is_invalid() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let ring_a = test_ring(&dir_a).await;
        let ring_b = test_ring(&dir_b).await;

        let issued = encode(&ring_a, TokenKind::Access, "sub", Duration::minutes(15))
            .await
            .unwrap();
        let err = decode(&ring_b, &issued.token).await.unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }
}
