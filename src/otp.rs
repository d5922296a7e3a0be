//! Namespaced one-time codes for email verification and password reset.
//!
//! Each `(namespace, subject)` pair holds at most one pending code, stored
//! as a cache hash `{code, attempts}` under a namespace-specific TTL. The
//! pending record doubles as the server-side throttle: while it exists, no
//! new code is issued for that subject.

use anyhow::{Context, Result};
use rand::{Rng, rngs::OsRng};

use crate::cache::Cache;

const CODE_FIELD: &str = "code";
const ATTEMPTS_FIELD: &str = "attempts";

const DIGITS: &[u8] = b"0123456789";
const UPPER_DIGITS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// The two code namespaces and their issuing policies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OtpNamespace {
    EmailVerify,
    PasswordReset,
}

impl OtpNamespace {
    #[must_use]
    pub fn key_prefix(self) -> &'static str {
        match self {
            Self::EmailVerify => "email_verification",
            Self::PasswordReset => "password_reset",
        }
    }

    #[must_use]
    pub fn code_length(self) -> usize {
        match self {
            Self::EmailVerify => 6,
            Self::PasswordReset => 8,
        }
    }

    fn alphabet(self) -> &'static [u8] {
        match self {
            Self::EmailVerify => DIGITS,
            Self::PasswordReset => UPPER_DIGITS,
        }
    }

    #[must_use]
    pub fn ttl_seconds(self) -> u64 {
        match self {
            Self::EmailVerify => 900,
            Self::PasswordReset => 300,
        }
    }

    #[must_use]
    pub fn max_attempts(self) -> i64 {
        match self {
            Self::EmailVerify => 5,
            Self::PasswordReset => 3,
        }
    }

    fn key(self, subject: &str) -> String {
        format!("{}:{}", self.key_prefix(), subject.trim().to_lowercase())
    }
}

#[derive(Clone)]
pub struct OtpStore {
    cache: Cache,
}

impl OtpStore {
    #[must_use]
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Generate and store a fresh code for `(namespace, subject)`.
    ///
    /// Callers must check [`OtpStore::exists`] first and refuse to reissue
    /// while a code is pending; issue itself overwrites unconditionally.
    ///
    /// # Errors
    /// Returns an error when randomness or the cache write fails.
    pub async fn issue(&self, namespace: OtpNamespace, subject: &str) -> Result<String> {
        let code = generate_code(namespace)?;
        self.cache
            .hash_set_ex(
                &namespace.key(subject),
                &[
                    (CODE_FIELD, code.clone()),
                    (ATTEMPTS_FIELD, "0".to_string()),
                ],
                namespace.ttl_seconds(),
            )
            .await
            .context("failed to store one-time code")?;
        Ok(code)
    }

    /// Non-consuming equality probe. Does not bump the attempt counter, so
    /// a validate-only UI step cannot burn the code.
    pub async fn peek(&self, namespace: OtpNamespace, subject: &str, code: &str) -> Result<bool> {
        let stored = self
            .cache
            .hash_get(&namespace.key(subject), CODE_FIELD)
            .await?;
        Ok(stored.as_deref() == Some(code))
    }

    /// Consume a code: bump attempts, compare, and delete on success or on
    /// attempt exhaustion. Exactly one concurrent caller of a matching code
    /// returns `true`; the record is gone before that `true` is returned.
    pub async fn consume(&self, namespace: OtpNamespace, subject: &str, code: &str) -> Result<bool> {
        let key = namespace.key(subject);
        let (attempts, stored) = self
            .cache
            .hash_incr_get(&key, ATTEMPTS_FIELD, CODE_FIELD)
            .await?;

        let Some(stored) = stored else {
            // The increment materialized a stray record for an absent code.
            self.cache.delete(&key).await?;
            return Ok(false);
        };

        if attempts > namespace.max_attempts() {
            self.cache.delete(&key).await?;
            return Ok(false);
        }

        if stored == code {
            // The delete count arbitrates concurrent winners.
            let removed = self.cache.delete(&key).await?;
            return Ok(removed == 1);
        }

        Ok(false)
    }

    pub async fn exists(&self, namespace: OtpNamespace, subject: &str) -> Result<bool> {
        self.cache.exists(&namespace.key(subject)).await
    }

    /// Remaining lifetime of a pending code, for `Retry-After` responses.
    pub async fn ttl(&self, namespace: OtpNamespace, subject: &str) -> Result<Option<u64>> {
        self.cache.ttl(&namespace.key(subject)).await
    }

    /// Drop a pending code, e.g. to undo issuance when the email carrying
    /// it was never sent.
    pub async fn delete(&self, namespace: OtpNamespace, subject: &str) -> Result<()> {
        self.cache.delete(&namespace.key(subject)).await?;
        Ok(())
    }
}

fn generate_code(namespace: OtpNamespace) -> Result<String> {
    let alphabet = namespace.alphabet();
    let mut rng = OsRng;
    let code = (0..namespace.code_length())
        .map(|_| {
            let idx = rng.gen_range(0..alphabet.len());
            alphabet[idx] as char
        })
        .collect();
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn store() -> OtpStore {
        OtpStore::new(Cache::Memory(MemoryCache::new()))
    }

    #[tokio::test]
    async fn issue_produces_namespace_shaped_codes() {
        let store = store();
        let email_code = store
            .issue(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap();
        assert_eq!(email_code.len(), 6);
        assert!(email_code.bytes().all(|b| b.is_ascii_digit()));

        let reset_code = store
            .issue(OtpNamespace::PasswordReset, "a@example.com")
            .await
            .unwrap();
        assert_eq!(reset_code.len(), 8);
        assert!(reset_code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let store = store();
        store
            .issue(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap();
        assert!(store
            .exists(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap());
        assert!(!store
            .exists(OtpNamespace::PasswordReset, "a@example.com")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn subject_is_case_insensitive() {
        let store = store();
        store
            .issue(OtpNamespace::EmailVerify, "User@Example.COM")
            .await
            .unwrap();
        assert!(store
            .exists(OtpNamespace::EmailVerify, "user@example.com")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn consume_is_single_use() {
        let store = store();
        let code = store
            .issue(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap();

        assert!(store
            .consume(OtpNamespace::EmailVerify, "a@example.com", &code)
            .await
            .unwrap());
        assert!(!store
            .consume(OtpNamespace::EmailVerify, "a@example.com", &code)
            .await
            .unwrap());
        assert!(!store
            .exists(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn wrong_code_leaves_record_in_place() {
        let store = store();
        let code = store
            .issue(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap();

        assert!(!store
            .consume(OtpNamespace::EmailVerify, "a@example.com", "000000")
            .await
            .unwrap());
        assert!(store
            .exists(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap());
        assert!(store
            .consume(OtpNamespace::EmailVerify, "a@example.com", &code)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn attempts_past_max_invalidate_even_a_correct_code() {
        let store = store();
        let code = store
            .issue(OtpNamespace::PasswordReset, "a@example.com")
            .await
            .unwrap();

        for _ in 0..OtpNamespace::PasswordReset.max_attempts() {
            assert!(!store
                .consume(OtpNamespace::PasswordReset, "a@example.com", "XXXXXXXX")
                .await
                .unwrap());
        }

        // Counter is already at max; the next attempt exceeds it.
        assert!(!store
            .consume(OtpNamespace::PasswordReset, "a@example.com", &code)
            .await
            .unwrap());
        assert!(!store
            .exists(OtpNamespace::PasswordReset, "a@example.com")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn peek_does_not_consume_or_count() {
        let store = store();
        let code = store
            .issue(OtpNamespace::PasswordReset, "a@example.com")
            .await
            .unwrap();

        for _ in 0..10 {
            assert!(store
                .peek(OtpNamespace::PasswordReset, "a@example.com", &code)
                .await
                .unwrap());
            assert!(!store
                .peek(OtpNamespace::PasswordReset, "a@example.com", "WRONG123")
                .await
                .unwrap());
        }

        assert!(store
            .consume(OtpNamespace::PasswordReset, "a@example.com", &code)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn consume_of_absent_code_leaves_no_stray_record() {
        let store = store();
        assert!(!store
            .consume(OtpNamespace::EmailVerify, "ghost@example.com", "123456")
            .await
            .unwrap());
        assert!(!store
            .exists(OtpNamespace::EmailVerify, "ghost@example.com")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn ttl_tracks_namespace_policy() {
        let store = store();
        store
            .issue(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap();
        let ttl = store
            .ttl(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(ttl <= 900 && ttl > 890);
    }

    #[tokio::test]
    async fn delete_undoes_issue() {
        let store = store();
        store
            .issue(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap();
        store
            .delete(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap();
        assert!(!store
            .exists(OtpNamespace::EmailVerify, "a@example.com")
            .await
            .unwrap());
    }
}
