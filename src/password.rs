//! Password hashing and verification using Argon2id.
//!
//! Stored hashes are PHC-format strings. Verification time depends only on
//! the Argon2 parameters embedded in the stored hash, not on the password.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;

/// Hash used when a login targets an unknown email, so that the response
/// latency matches the wrong-password path.
static DUMMY_HASH: Lazy<String> =
    Lazy::new(|| hash("stadion-dummy-password").unwrap_or_default());

/// Hash a plaintext password into a PHC-format Argon2id string.
///
/// # Errors
/// Returns an error if the KDF fails (out of memory or bad parameters).
pub fn hash(plain: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string();
    Ok(hash)
}

/// Verify a plaintext password against a stored PHC hash.
///
/// Returns `Ok(false)` on mismatch. The only error case is an unreadable
/// stored blob, which callers map to a generic invalid-credentials response.
pub fn verify(plain: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored).context("invalid stored password hash")?;
    match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow!("password verification failed: {err}")),
    }
}

/// Burn one Argon2 verification against a throwaway hash.
///
/// Called on the unknown-email login path so timing does not reveal whether
/// the account exists.
pub fn verify_dummy(plain: &str) {
    let _ = verify(plain, &DUMMY_HASH);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_password_matches() {
        let stored = hash("hunter2").unwrap();
        assert!(verify("hunter2", &stored).unwrap());
    }

    #[test]
    fn wrong_password_does_not_match() {
        let stored = hash("hunter2").unwrap();
        assert!(!verify("wrong", &stored).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash("hunter2").unwrap();
        let second = hash("hunter2").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_hash_returns_error() {
        assert!(verify("pw", "not-a-hash").is_err());
    }

    #[test]
    fn dummy_verify_does_not_panic() {
        verify_dummy("anything");
    }
}
