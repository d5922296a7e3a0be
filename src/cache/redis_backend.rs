//! Redis backend over a shared `ConnectionManager`.
//!
//! Every compound operation runs as an atomic `MULTI`/`EXEC` pipeline so
//! that concurrent consumers race inside Redis, not in this process.

use anyhow::{Context, Result};
use redis::{AsyncCommands, aio::ConnectionManager};

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Open a managed connection. The manager reconnects on failure, so a
    /// clone of it is the whole shared state.
    ///
    /// # Errors
    /// Returns an error when the URL is invalid or the initial connection
    /// cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis URL")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to open redis connection")?;
        Ok(Self { manager })
    }

    pub(super) async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        let () = conn
            .set_ex(key, value, ttl_seconds)
            .await
            .context("redis SET EX failed")?;
        Ok(())
    }

    pub(super) async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await.context("redis GET failed")?;
        Ok(value)
    }

    pub(super) async fn get_del(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let (value, _removed): (Option<String>, i64) = redis::pipe()
            .atomic()
            .get(key)
            .del(key)
            .query_async(&mut conn)
            .await
            .context("redis GET+DEL pipeline failed")?;
        Ok(value)
    }

    pub(super) async fn delete(&self, key: &str) -> Result<u64> {
        let mut conn = self.manager.clone();
        let removed: u64 = conn.del(key).await.context("redis DEL failed")?;
        Ok(removed)
    }

    pub(super) async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let exists: bool = conn.exists(key).await.context("redis EXISTS failed")?;
        Ok(exists)
    }

    pub(super) async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.manager.clone();
        let ttl: i64 = conn.ttl(key).await.context("redis TTL failed")?;
        // -2 = missing key, -1 = no expiry; our entries always carry one.
        Ok(u64::try_from(ttl).ok())
    }

    pub(super) async fn hash_set_ex(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl_seconds: u64,
    ) -> Result<()> {
        let mut conn = self.manager.clone();
        let () = redis::pipe()
            .atomic()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, i64::try_from(ttl_seconds).unwrap_or(i64::MAX))
            .ignore()
            .query_async(&mut conn)
            .await
            .context("redis HSET+EXPIRE pipeline failed")?;
        Ok(())
    }

    pub(super) async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.hget(key, field).await.context("redis HGET failed")?;
        Ok(value)
    }

    pub(super) async fn hash_incr_get(
        &self,
        key: &str,
        incr_field: &str,
        get_field: &str,
    ) -> Result<(i64, Option<String>)> {
        let mut conn = self.manager.clone();
        let (count, value): (i64, Option<String>) = redis::pipe()
            .atomic()
            .hincr(key, incr_field, 1)
            .hget(key, get_field)
            .query_async(&mut conn)
            .await
            .context("redis HINCRBY+HGET pipeline failed")?;
        Ok((count, value))
    }
}
