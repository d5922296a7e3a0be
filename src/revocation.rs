//! Token-id revocation state: access blacklist and refresh whitelist.
//!
//! Both live in the TTL cache so entries vanish exactly when the token they
//! refer to expires. Session truth stays in SQL; this store only answers
//! "is this jti still usable" on the hot path.

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use crate::cache::Cache;

const BLACKLIST_PREFIX: &str = "bl";
const REFRESH_PREFIX: &str = "rt";

#[derive(Clone)]
pub struct RevocationStore {
    cache: Cache,
}

impl RevocationStore {
    #[must_use]
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// True when the access token id has been revoked before its expiry.
    pub async fn is_revoked(&self, jti: Uuid) -> Result<bool> {
        self.cache.exists(&blacklist_key(jti)).await
    }

    /// Blacklist an access token id until `exp_unix`. A token already past
    /// its expiry needs no entry.
    pub async fn revoke_until(&self, jti: Uuid, exp_unix: i64) -> Result<()> {
        let Some(remaining) = remaining_seconds(exp_unix) else {
            return Ok(());
        };
        self.cache.set_ex(&blacklist_key(jti), "1", remaining).await
    }

    /// Whitelist a refresh token id for its full lifetime, mapping it to
    /// the subject it was issued for.
    pub async fn store_refresh(&self, jti: Uuid, sub: &str, exp_unix: i64) -> Result<()> {
        let Some(remaining) = remaining_seconds(exp_unix) else {
            return Ok(());
        };
        self.cache.set_ex(&refresh_key(jti), sub, remaining).await
    }

    /// Consume a refresh token id: atomic read-then-delete. Concurrent
    /// refresh attempts see at most one `Some`; the losers observe a miss,
    /// not an error.
    pub async fn consume_refresh(&self, jti: Uuid) -> Result<Option<String>> {
        self.cache.get_del(&refresh_key(jti)).await
    }

    /// Drop a refresh whitelist entry without consuming it (logout paths).
    pub async fn forget_refresh(&self, jti: Uuid) -> Result<()> {
        self.cache.delete(&refresh_key(jti)).await?;
        Ok(())
    }
}

fn blacklist_key(jti: Uuid) -> String {
    format!("{BLACKLIST_PREFIX}:{jti}")
}

fn refresh_key(jti: Uuid) -> String {
    format!("{REFRESH_PREFIX}:{jti}")
}

fn remaining_seconds(exp_unix: i64) -> Option<u64> {
    let remaining = exp_unix - Utc::now().timestamp();
    u64::try_from(remaining).ok().filter(|secs| *secs > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn store() -> RevocationStore {
        RevocationStore::new(Cache::Memory(MemoryCache::new()))
    }

    fn future_exp() -> i64 {
        Utc::now().timestamp() + 600
    }

    #[tokio::test]
    async fn revoked_jti_is_reported() {
        let store = store();
        let jti = Uuid::new_v4();
        assert!(!store.is_revoked(jti).await.unwrap());

        store.revoke_until(jti, future_exp()).await.unwrap();
        assert!(store.is_revoked(jti).await.unwrap());
    }

    #[tokio::test]
    async fn revoking_expired_token_is_a_noop() {
        let store = store();
        let jti = Uuid::new_v4();
        store
            .revoke_until(jti, Utc::now().timestamp() - 10)
            .await
            .unwrap();
        assert!(!store.is_revoked(jti).await.unwrap());
    }

    #[tokio::test]
    async fn refresh_is_consumed_at_most_once() {
        let store = store();
        let jti = Uuid::new_v4();
        store
            .store_refresh(jti, "subject", future_exp())
            .await
            .unwrap();

        let first = store.consume_refresh(jti).await.unwrap();
        assert_eq!(first.as_deref(), Some("subject"));

        let second = store.consume_refresh(jti).await.unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn unknown_refresh_yields_none() {
        let store = store();
        assert_eq!(store.consume_refresh(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn forget_refresh_prevents_later_consume() {
        let store = store();
        let jti = Uuid::new_v4();
        store.store_refresh(jti, "subject", future_exp()).await.unwrap();
        store.forget_refresh(jti).await.unwrap();
        assert_eq!(store.consume_refresh(jti).await.unwrap(), None);
    }
}
