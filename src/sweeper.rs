//! Background maintenance: key-rotation check at startup and a periodic
//! reaper for expired session rows.

use sqlx::PgPool;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::handlers::auth::session_store;
use crate::keyring::KeyRing;

pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 3600;

/// Spawn the sweeper. Cancel the token to stop it; awaiting the returned
/// handle waits for the in-flight iteration to finish.
pub fn spawn(
    pool: PgPool,
    keyring: KeyRing,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        rotate_if_due(&keyring).await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("sweeper shutting down");
                    break;
                }
                () = sleep(interval) => {
                    sweep(&pool).await;
                }
            }
        }
    })
}

async fn rotate_if_due(keyring: &KeyRing) {
    if !keyring.should_rotate().await {
        info!("signing key rotation not due");
        return;
    }
    match keyring.rotate().await {
        Ok(outcome) if outcome.rotated => {
            info!(rotated_at = %outcome.rotated_at, "signing key rotated at startup");
        }
        Ok(_) => info!("signing key rotation skipped (already fresh)"),
        Err(err) => error!("signing key rotation failed: {err:#}"),
    }
}

async fn sweep(pool: &PgPool) {
    match session_store::sweep_expired(pool).await {
        Ok(0) => {}
        Ok(count) => info!(count, "swept expired sessions"),
        Err(err) => error!("session sweep failed: {err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::{DEFAULT_GRACE_DAYS, DEFAULT_ROTATION_DAYS};
    use tempfile::TempDir;

    #[tokio::test]
    async fn rotate_if_due_is_a_noop_on_fresh_ring() {
        let dir = TempDir::new().unwrap();
        let ring = KeyRing::open(
            dir.path().join("keys.json"),
            DEFAULT_ROTATION_DAYS,
            DEFAULT_GRACE_DAYS,
        )
        .await
        .unwrap();
        let before = ring.current().await.unwrap();

        rotate_if_due(&ring).await;

        let after = ring.current().await.unwrap();
        assert_eq!(before.secret, after.secret);
    }
}
