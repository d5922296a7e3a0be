//! In-process TTL map used for tests and single-instance deployments.
//!
//! Expired entries are dropped lazily on access, the same way the login
//! state map in the teacher service expires abandoned handshakes.

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone, Debug)]
enum Stored {
    Value(String),
    Hash(HashMap<String, String>),
}

#[derive(Clone, Debug)]
struct Entry {
    stored: Stored,
    // None mirrors Redis: a hash created by an increment has no TTL until
    // one is set explicitly.
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| !entry.expired(now));
        entries.insert(
            key.to_string(),
            Entry {
                stored: Stored::Value(value.to_string()),
                expires_at: Some(now + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    pub(super) async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        Ok(live_value(&mut entries, key))
    }

    pub(super) async fn get_del(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        let value = live_value(&mut entries, key);
        if value.is_some() {
            entries.remove(key);
        }
        Ok(value)
    }

    pub(super) async fn delete(&self, key: &str) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.remove(key) {
            Some(entry) if !entry.expired(now) => Ok(1),
            _ => Ok(0),
        }
    }

    pub(super) async fn exists(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        Ok(live_entry(&mut entries, key).is_some())
    }

    pub(super) async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let Some(entry) = live_entry(&mut entries, key) else {
            return Ok(None);
        };
        Ok(entry
            .expires_at
            .map(|at| at.saturating_duration_since(now).as_secs()))
    }

    pub(super) async fn hash_set_ex(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl_seconds: u64,
    ) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| !entry.expired(now));
        let hash = fields
            .iter()
            .map(|(field, value)| ((*field).to_string(), value.clone()))
            .collect();
        entries.insert(
            key.to_string(),
            Entry {
                stored: Stored::Hash(hash),
                expires_at: Some(now + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    pub(super) async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key) {
            Some(Entry {
                stored: Stored::Hash(hash),
                ..
            }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(anyhow!("cache key {key} holds a plain value, not a hash")),
            None => Ok(None),
        }
    }

    pub(super) async fn hash_incr_get(
        &self,
        key: &str,
        incr_field: &str,
        get_field: &str,
    ) -> Result<(i64, Option<String>)> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.expired(now)) {
            entries.remove(key);
        }

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            stored: Stored::Hash(HashMap::new()),
            expires_at: None,
        });
        let Stored::Hash(hash) = &mut entry.stored else {
            return Err(anyhow!("cache key {key} holds a plain value, not a hash"));
        };

        let counter = hash.entry(incr_field.to_string()).or_insert_with(|| "0".to_string());
        let next = counter.parse::<i64>().unwrap_or(0) + 1;
        *counter = next.to_string();

        Ok((next, hash.get(get_field).cloned()))
    }
}

fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|entry| entry.expired(now)) {
        entries.remove(key);
        return None;
    }
    entries.get(key)
}

fn live_value(entries: &mut HashMap<String, Entry>, key: &str) -> Option<String> {
    match live_entry(entries, key) {
        Some(Entry {
            stored: Stored::Value(value),
            ..
        }) => Some(value.clone()),
        _ => None,
    }
}
