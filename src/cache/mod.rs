//! TTL-capable key-value cache behind a backend selected by URL scheme.
//!
//! `memory://` keeps everything in-process and is the default for tests and
//! single-instance deployments; `redis://` (or `rediss://`) shares state
//! across processes. Compound operations (`get_del`, `hash_set_ex`,
//! `hash_incr_get`) are atomic on both backends: a mutex-guarded map in
//! memory, a `MULTI`/`EXEC` pipeline on Redis. The cache is the sole
//! arbiter of token-id uniqueness, so that atomicity is what turns
//! "refresh is single-use" into a guarantee instead of a race.

mod memory;
mod redis_backend;

use anyhow::{Context, Result, anyhow};

pub use memory::MemoryCache;
pub use redis_backend::RedisCache;

#[derive(Clone)]
pub enum Cache {
    Memory(MemoryCache),
    Redis(RedisCache),
}

impl Cache {
    /// Build a cache from a URL spec: `memory://` or `redis://host[:port]/db`.
    ///
    /// # Errors
    /// Returns an error for unknown schemes or an unreachable Redis.
    pub async fn from_url(spec: &str) -> Result<Self> {
        if spec.starts_with("memory://") || spec == "memory" {
            return Ok(Self::Memory(MemoryCache::new()));
        }
        if spec.starts_with("redis://") || spec.starts_with("rediss://") {
            let backend = RedisCache::connect(spec)
                .await
                .context("failed to connect to redis")?;
            return Ok(Self::Redis(backend));
        }
        Err(anyhow!("unsupported cache URL: {spec}"))
    }

    /// Set `key` to `value` with a TTL in seconds.
    pub async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        match self {
            Self::Memory(backend) => backend.set_ex(key, value, ttl_seconds).await,
            Self::Redis(backend) => backend.set_ex(key, value, ttl_seconds).await,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            Self::Memory(backend) => backend.get(key).await,
            Self::Redis(backend) => backend.get(key).await,
        }
    }

    /// Atomically read and remove `key`. At most one concurrent caller
    /// observes the value.
    pub async fn get_del(&self, key: &str) -> Result<Option<String>> {
        match self {
            Self::Memory(backend) => backend.get_del(key).await,
            Self::Redis(backend) => backend.get_del(key).await,
        }
    }

    /// Remove `key`, returning how many entries were actually removed.
    /// The count arbitrates concurrent consumers: only one caller sees 1.
    pub async fn delete(&self, key: &str) -> Result<u64> {
        match self {
            Self::Memory(backend) => backend.delete(key).await,
            Self::Redis(backend) => backend.delete(key).await,
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self {
            Self::Memory(backend) => backend.exists(key).await,
            Self::Redis(backend) => backend.exists(key).await,
        }
    }

    /// Remaining TTL in seconds, or `None` when the key is absent.
    pub async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        match self {
            Self::Memory(backend) => backend.ttl(key).await,
            Self::Redis(backend) => backend.ttl(key).await,
        }
    }

    /// Create a hash entry with the given fields and TTL in one step.
    pub async fn hash_set_ex(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl_seconds: u64,
    ) -> Result<()> {
        match self {
            Self::Memory(backend) => backend.hash_set_ex(key, fields, ttl_seconds).await,
            Self::Redis(backend) => backend.hash_set_ex(key, fields, ttl_seconds).await,
        }
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        match self {
            Self::Memory(backend) => backend.hash_get(key, field).await,
            Self::Redis(backend) => backend.hash_get(key, field).await,
        }
    }

    /// Atomically increment `incr_field` and read `get_field` from a hash.
    /// Mirrors Redis semantics: incrementing a missing key creates it.
    pub async fn hash_incr_get(
        &self,
        key: &str,
        incr_field: &str,
        get_field: &str,
    ) -> Result<(i64, Option<String>)> {
        match self {
            Self::Memory(backend) => backend.hash_incr_get(key, incr_field, get_field).await,
            Self::Redis(backend) => backend.hash_incr_get(key, incr_field, get_field).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_url_selects_memory() {
        let cache = Cache::from_url("memory://").await.unwrap();
        assert!(matches!(cache, Cache::Memory(_)));
    }

    #[tokio::test]
    async fn from_url_rejects_unknown_scheme() {
        assert!(Cache::from_url("etcd://localhost").await.is_err());
    }

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let cache = Cache::from_url("memory://").await.unwrap();
        cache.set_ex("k", "v", 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(cache.exists("k").await.unwrap());
        assert_eq!(cache.delete("k").await.unwrap(), 1);
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.delete("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_del_consumes_exactly_once() {
        let cache = Cache::from_url("memory://").await.unwrap();
        cache.set_ex("once", "value", 60).await.unwrap();
        assert_eq!(
            cache.get_del("once").await.unwrap().as_deref(),
            Some("value")
        );
        assert_eq!(cache.get_del("once").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = Cache::from_url("memory://").await.unwrap();
        cache.set_ex("gone", "v", 1).await.unwrap();
        assert!(cache.exists("gone").await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(!cache.exists("gone").await.unwrap());
        assert_eq!(cache.ttl("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hash_operations() {
        let cache = Cache::from_url("memory://").await.unwrap();
        cache
            .hash_set_ex(
                "h",
                &[("code", "123456".to_string()), ("attempts", "0".to_string())],
                60,
            )
            .await
            .unwrap();

        assert_eq!(
            cache.hash_get("h", "code").await.unwrap().as_deref(),
            Some("123456")
        );

        let (attempts, code) = cache.hash_incr_get("h", "attempts", "code").await.unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(code.as_deref(), Some("123456"));

        let (attempts, _) = cache.hash_incr_get("h", "attempts", "code").await.unwrap();
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn hash_incr_on_missing_key_creates_it() {
        let cache = Cache::from_url("memory://").await.unwrap();
        let (attempts, code) = cache
            .hash_incr_get("fresh", "attempts", "code")
            .await
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(code, None);
        assert!(cache.exists("fresh").await.unwrap());
    }
}
