//! Persistent ring of token-signing secrets with rotation and grace.
//!
//! The ring lives in a single JSON document that is replaced atomically
//! (write to a temp file in the same directory, then rename). At most one
//! key is active at a time; previously active keys keep verifying tokens
//! until their age exceeds `rotation_days + grace_days`.
//!
//! The file backend assumes a single writer (one process, or a shared
//! volume with one rotating instance). `KeyRing` is the swap point for a
//! KV-store or secret-manager backend.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const DEFAULT_ROTATION_DAYS: i64 = 90;
pub const DEFAULT_GRACE_DAYS: i64 = 30;

const SECRET_BYTES: usize = 64;

/// One signing secret with its lifecycle metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningKey {
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

impl SigningKey {
    fn fresh() -> Result<Self> {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate signing secret")?;
        Ok(Self {
            secret: URL_SAFE_NO_PAD.encode(bytes),
            created_at: Utc::now(),
            active: true,
        })
    }

    fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct KeyRingDoc {
    secrets: Vec<SigningKey>,
    last_updated: Option<DateTime<Utc>>,
}

impl KeyRingDoc {
    fn newest_active(&self) -> Option<&SigningKey> {
        self.secrets
            .iter()
            .filter(|key| key.active)
            .max_by_key(|key| key.created_at)
    }
}

/// Result of a completed rotation.
#[derive(Clone, Debug)]
pub struct RotationOutcome {
    pub rotated: bool,
    pub previous: Option<SigningKey>,
    pub current: SigningKey,
    pub rotated_at: DateTime<Utc>,
}

/// Shared handle over the persisted ring.
#[derive(Clone)]
pub struct KeyRing {
    path: PathBuf,
    rotation_days: i64,
    grace_days: i64,
    state: Arc<RwLock<KeyRingDoc>>,
}

impl KeyRing {
    /// Load the ring from `path`, creating it with a fresh key when the
    /// file is missing or unreadable. Read failures never surface as an
    /// empty ring.
    ///
    /// # Errors
    /// Returns an error only when the initial persist fails.
    pub async fn open(path: impl AsRef<Path>, rotation_days: i64, grace_days: i64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = match load_doc(&path) {
            Ok(Some(doc)) if !doc.secrets.is_empty() => doc,
            Ok(_) => {
                let doc = initial_doc()?;
                persist_doc(&path, &doc)?;
                info!(path = %path.display(), "initialized signing keyring");
                doc
            }
            Err(err) => {
                warn!(path = %path.display(), "unreadable keyring, reinitializing: {err:#}");
                let doc = initial_doc()?;
                persist_doc(&path, &doc)?;
                doc
            }
        };

        Ok(Self {
            path,
            rotation_days,
            grace_days,
            state: Arc::new(RwLock::new(doc)),
        })
    }

    /// The newest active key. Initializes the ring if no active key exists.
    ///
    /// # Errors
    /// Returns an error if an empty ring cannot be persisted after init.
    pub async fn current(&self) -> Result<SigningKey> {
        {
            let doc = self.state.read().await;
            if let Some(key) = doc.newest_active() {
                return Ok(key.clone());
            }
        }

        let mut doc = self.state.write().await;
        // Re-check under the write lock; another task may have initialized.
        if let Some(key) = doc.newest_active() {
            return Ok(key.clone());
        }
        let key = SigningKey::fresh()?;
        doc.secrets.push(key.clone());
        doc.last_updated = Some(Utc::now());
        persist_doc(&self.path, &doc)?;
        Ok(key)
    }

    /// Every key a verifier should try, newest first: all active keys plus
    /// inactive keys still inside the grace window.
    pub async fn valid_set(&self) -> Vec<SigningKey> {
        let now = Utc::now();
        let window = Duration::days(self.rotation_days + self.grace_days);
        let doc = self.state.read().await;
        let mut keys: Vec<SigningKey> = doc
            .secrets
            .iter()
            .filter(|key| key.active || key.age(now) <= window)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        keys
    }

    /// True when the newest active key is old enough to rotate.
    pub async fn should_rotate(&self) -> bool {
        let now = Utc::now();
        let doc = self.state.read().await;
        match doc.newest_active() {
            Some(key) => key.age(now) >= Duration::days(self.rotation_days),
            None => false,
        }
    }

    /// Deactivate every key, append a fresh active one, and drop entries
    /// that have aged out of the grace window. Persisted atomically.
    ///
    /// A second call within the same second is a no-op, so an accidental
    /// double rotation cannot burn through the ring.
    ///
    /// # Errors
    /// Persistence failures are fatal here: an unpersisted rotation would
    /// desynchronize this process from the file.
    pub async fn rotate(&self) -> Result<RotationOutcome> {
        let now = Utc::now();
        let mut doc = self.state.write().await;

        let previous = doc.newest_active().cloned();
        if let Some(newest) = &previous {
            if newest.age(now) < Duration::seconds(1) {
                return Ok(RotationOutcome {
                    rotated: false,
                    previous: None,
                    current: newest.clone(),
                    rotated_at: now,
                });
            }
        }

        for key in &mut doc.secrets {
            key.active = false;
        }
        let fresh = SigningKey::fresh()?;
        doc.secrets.push(fresh.clone());

        let window = Duration::days(self.rotation_days + self.grace_days);
        doc.secrets
            .retain(|key| key.active || key.age(now) <= window);

        doc.last_updated = Some(now);
        persist_doc(&self.path, &doc).context("failed to persist keyring rotation")?;

        Ok(RotationOutcome {
            rotated: true,
            previous,
            current: fresh,
            rotated_at: now,
        })
    }

    /// Re-read the document from disk, picking up a rotation performed by
    /// another process. Unreadable files leave the in-memory state as-is.
    pub async fn reload(&self) -> Result<()> {
        match load_doc(&self.path) {
            Ok(Some(doc)) if !doc.secrets.is_empty() => {
                *self.state.write().await = doc;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(path = %self.path.display(), "keyring reload failed: {err:#}");
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn initial_doc() -> Result<KeyRingDoc> {
    Ok(KeyRingDoc {
        secrets: vec![SigningKey::fresh()?],
        last_updated: Some(Utc::now()),
    })
}

fn load_doc(path: &Path) -> Result<Option<KeyRingDoc>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).context("failed to read keyring file"),
    };
    let doc: KeyRingDoc = serde_json::from_str(&raw).context("failed to parse keyring file")?;
    Ok(Some(doc))
}

fn persist_doc(path: &Path, doc: &KeyRingDoc) -> Result<()> {
    let json = serde_json::to_string_pretty(doc).context("failed to serialize keyring")?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json).context("failed to write keyring temp file")?;
    std::fs::rename(&tmp, path).context("failed to replace keyring file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ring_path(dir: &TempDir) -> PathBuf {
        dir.path().join("signing_keys.json")
    }

    #[tokio::test]
    async fn open_initializes_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = ring_path(&dir);
        let ring = KeyRing::open(&path, DEFAULT_ROTATION_DAYS, DEFAULT_GRACE_DAYS)
            .await
            .unwrap();
        let current = ring.current().await.unwrap();
        assert!(current.active);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn open_recovers_from_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = ring_path(&dir);
        std::fs::write(&path, "not json").unwrap();
        let ring = KeyRing::open(&path, DEFAULT_ROTATION_DAYS, DEFAULT_GRACE_DAYS)
            .await
            .unwrap();
        assert_eq!(ring.valid_set().await.len(), 1);
    }

    #[tokio::test]
    async fn valid_set_contains_current_and_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let ring = KeyRing::open(ring_path(&dir), DEFAULT_ROTATION_DAYS, DEFAULT_GRACE_DAYS)
            .await
            .unwrap();
        let current = ring.current().await.unwrap();
        let keys = ring.valid_set().await;
        assert!(!keys.is_empty());
        assert_eq!(keys[0].secret, current.secret);
    }

    #[tokio::test]
    async fn rotate_within_same_second_is_noop() {
        let dir = TempDir::new().unwrap();
        let ring = KeyRing::open(ring_path(&dir), DEFAULT_ROTATION_DAYS, DEFAULT_GRACE_DAYS)
            .await
            .unwrap();
        let before = ring.current().await.unwrap();
        let outcome = ring.rotate().await.unwrap();
        assert!(!outcome.rotated);
        assert_eq!(outcome.current.secret, before.secret);
        assert_eq!(ring.valid_set().await.len(), 1);
    }

    #[tokio::test]
    async fn rotate_keeps_old_key_in_grace() {
        let dir = TempDir::new().unwrap();
        let path = ring_path(&dir);
        let ring = KeyRing::open(&path, DEFAULT_ROTATION_DAYS, DEFAULT_GRACE_DAYS)
            .await
            .unwrap();
        let old = ring.current().await.unwrap();

        // Age the key past the same-second guard.
        backdate(&ring, chrono::Duration::days(1)).await;

        let outcome = ring.rotate().await.unwrap();
        assert!(outcome.rotated);
        assert_ne!(outcome.current.secret, old.secret);

        let keys = ring.valid_set().await;
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].secret, outcome.current.secret);
        assert!(keys.iter().any(|key| key.secret == old.secret));
    }

    #[tokio::test]
    async fn rotate_drops_keys_past_grace() {
        let dir = TempDir::new().unwrap();
        let ring = KeyRing::open(
            ring_path(&dir),
            DEFAULT_ROTATION_DAYS,
            DEFAULT_GRACE_DAYS,
        )
        .await
        .unwrap();
        let old = ring.current().await.unwrap();

        backdate(
            &ring,
            chrono::Duration::days(DEFAULT_ROTATION_DAYS + DEFAULT_GRACE_DAYS + 1),
        )
        .await;

        let outcome = ring.rotate().await.unwrap();
        assert!(outcome.rotated);
        let keys = ring.valid_set().await;
        assert_eq!(keys.len(), 1);
        assert!(keys.iter().all(|key| key.secret != old.secret));
    }

    #[tokio::test]
    async fn should_rotate_honors_rotation_age() {
        let dir = TempDir::new().unwrap();
        let ring = KeyRing::open(ring_path(&dir), DEFAULT_ROTATION_DAYS, DEFAULT_GRACE_DAYS)
            .await
            .unwrap();
        ring.current().await.unwrap();
        assert!(!ring.should_rotate().await);

        backdate(&ring, chrono::Duration::days(DEFAULT_ROTATION_DAYS)).await;
        assert!(ring.should_rotate().await);
    }

    #[tokio::test]
    async fn reload_picks_up_external_rotation() {
        let dir = TempDir::new().unwrap();
        let path = ring_path(&dir);
        let ring = KeyRing::open(&path, DEFAULT_ROTATION_DAYS, DEFAULT_GRACE_DAYS)
            .await
            .unwrap();
        ring.current().await.unwrap();

        // Simulate a rotation performed by a second process.
        let other = KeyRing::open(&path, DEFAULT_ROTATION_DAYS, DEFAULT_GRACE_DAYS)
            .await
            .unwrap();
        backdate(&other, chrono::Duration::days(1)).await;
        persist_doc(&path, &other.state.read().await.clone()).unwrap();
        let outcome = other.rotate().await.unwrap();
        assert!(outcome.rotated);

        ring.reload().await.unwrap();
        let current = ring.current().await.unwrap();
        assert_eq!(current.secret, outcome.current.secret);
    }

    /// Shift every key's `created_at` into the past.
    async fn backdate(ring: &KeyRing, by: chrono::Duration) {
        let mut doc = ring.state.write().await;
        for key in &mut doc.secrets {
            key.created_at -= by;
        }
    }
}
