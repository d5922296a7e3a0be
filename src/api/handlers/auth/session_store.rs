//! Durable session records (`auth_users_sessions`).
//!
//! Each user holds a single rolling "latest" session: a re-login overwrites
//! the newest active row instead of inserting a second one. Refresh
//! rotation and revocation are single-row UPDATEs, so no lock beyond the
//! row itself is required; `revoke_all_for_user` and `sweep_expired` are
//! idempotent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub id: i64,
    pub public_id: Uuid,
    pub user_id: i64,
    pub access_jti: Uuid,
    pub refresh_jti: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Token ids surrendered by a session when it is rotated or revoked,
/// so callers can blacklist/forget them in the cache.
#[derive(Clone, Debug)]
pub struct SurrenderedTokens {
    pub user_id: i64,
    pub access_jti: Uuid,
    pub refresh_jti: Uuid,
    pub expires_at: DateTime<Utc>,
}

const SESSION_COLUMNS: &str =
    "id, public_id, user_id, access_jti, refresh_jti, active, created_at, expires_at";

fn map_session(row: &PgRow) -> SessionRecord {
    SessionRecord {
        id: row.get("id"),
        public_id: row.get("public_id"),
        user_id: row.get("user_id"),
        access_jti: row.get("access_jti"),
        refresh_jti: row.get("refresh_jti"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    }
}

fn map_surrendered(row: &PgRow) -> SurrenderedTokens {
    SurrenderedTokens {
        user_id: row.get("user_id"),
        access_jti: row.get("access_jti"),
        refresh_jti: row.get("refresh_jti"),
        expires_at: row.get("expires_at"),
    }
}

/// Newest active session for a user, if any.
pub async fn latest_active(pool: &PgPool, user_id: i64) -> Result<Option<SessionRecord>> {
    let query = format!(
        "SELECT {SESSION_COLUMNS} FROM auth_users_sessions \
         WHERE user_id = $1 AND active \
         ORDER BY created_at DESC LIMIT 1"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to select latest session")?;
    Ok(row.as_ref().map(map_session))
}

/// Reuse the newest active session by overwriting its token ids in place,
/// or insert a fresh row when the user has none. This is why a user keeps a
/// single rolling session across re-logins.
pub async fn create_or_update_latest(
    pool: &PgPool,
    user_id: i64,
    access_jti: Uuid,
    refresh_jti: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<SessionRecord> {
    let mut tx = pool.begin().await.context("begin session transaction")?;

    let select = format!(
        "SELECT {SESSION_COLUMNS} FROM auth_users_sessions \
         WHERE user_id = $1 AND active \
         ORDER BY created_at DESC LIMIT 1 \
         FOR UPDATE"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %select
    );
    let existing = sqlx::query(&select)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lock latest session")?;

    let record = if let Some(existing) = existing {
        let id: i64 = existing.get("id");
        let update = format!(
            "UPDATE auth_users_sessions \
             SET access_jti = $2, refresh_jti = $3, expires_at = $4 \
             WHERE id = $1 RETURNING {SESSION_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = %update
        );
        let row = sqlx::query(&update)
            .bind(id)
            .bind(access_jti)
            .bind(refresh_jti)
            .bind(expires_at)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .context("failed to update latest session")?;
        map_session(&row)
    } else {
        let insert = format!(
            "INSERT INTO auth_users_sessions (user_id, access_jti, refresh_jti, expires_at) \
             VALUES ($1, $2, $3, $4) RETURNING {SESSION_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = %insert
        );
        let row = sqlx::query(&insert)
            .bind(user_id)
            .bind(access_jti)
            .bind(refresh_jti)
            .bind(expires_at)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert session")?;
        map_session(&row)
    };

    tx.commit().await.context("commit session transaction")?;
    Ok(record)
}

/// Swap both token ids of the session holding `old_refresh_jti`. Matches at
/// most one row; `None` means the refresh id is not attached to an active
/// session. Returns the token ids the row surrendered so the old access
/// token can be blacklisted.
pub async fn rotate_tokens(
    pool: &PgPool,
    old_refresh_jti: Uuid,
    new_access_jti: Uuid,
    new_refresh_jti: Uuid,
    new_expires_at: DateTime<Utc>,
) -> Result<Option<SurrenderedTokens>> {
    let mut tx = pool.begin().await.context("begin rotate transaction")?;

    let select = "SELECT user_id, access_jti, refresh_jti, expires_at \
         FROM auth_users_sessions \
         WHERE refresh_jti = $1 AND active \
         FOR UPDATE";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = select
    );
    let Some(previous) = sqlx::query(select)
        .bind(old_refresh_jti)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lock session for rotation")?
    else {
        tx.rollback().await.ok();
        return Ok(None);
    };
    let previous = map_surrendered(&previous);

    let update = "UPDATE auth_users_sessions \
         SET access_jti = $2, refresh_jti = $3, expires_at = $4 \
         WHERE refresh_jti = $1 AND active";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = update
    );
    sqlx::query(update)
        .bind(old_refresh_jti)
        .bind(new_access_jti)
        .bind(new_refresh_jti)
        .bind(new_expires_at)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to rotate session tokens")?;

    tx.commit().await.context("commit rotate transaction")?;
    Ok(Some(previous))
}

/// Active session holding `refresh_jti`, if any (ownership checks).
pub async fn find_by_refresh(pool: &PgPool, refresh_jti: Uuid) -> Result<Option<SessionRecord>> {
    let query = format!(
        "SELECT {SESSION_COLUMNS} FROM auth_users_sessions \
         WHERE refresh_jti = $1 AND active LIMIT 1"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(refresh_jti)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to find session by refresh id")?;
    Ok(row.as_ref().map(map_session))
}

/// Deactivate the session holding `refresh_jti`.
pub async fn revoke_by_refresh(
    pool: &PgPool,
    refresh_jti: Uuid,
) -> Result<Option<SurrenderedTokens>> {
    revoke_where(pool, "refresh_jti = $1", refresh_jti).await
}

/// Deactivate the session holding `access_jti`.
pub async fn revoke_by_access(
    pool: &PgPool,
    access_jti: Uuid,
) -> Result<Option<SurrenderedTokens>> {
    revoke_where(pool, "access_jti = $1", access_jti).await
}

/// Deactivate a session by its public id, enforcing ownership in the WHERE
/// clause so a foreign session id reads as not-found.
pub async fn revoke_by_public_id(
    pool: &PgPool,
    session_public_id: Uuid,
    owner_user_id: i64,
) -> Result<Option<SurrenderedTokens>> {
    let query = "UPDATE auth_users_sessions \
         SET active = FALSE \
         WHERE public_id = $1 AND user_id = $2 AND active \
         RETURNING user_id, access_jti, refresh_jti, expires_at";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(session_public_id)
        .bind(owner_user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to revoke session by public id")?;
    Ok(row.as_ref().map(map_surrendered))
}

async fn revoke_where(
    pool: &PgPool,
    predicate: &str,
    jti: Uuid,
) -> Result<Option<SurrenderedTokens>> {
    let query = format!(
        "UPDATE auth_users_sessions SET active = FALSE \
         WHERE {predicate} AND active \
         RETURNING user_id, access_jti, refresh_jti, expires_at"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(jti)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to revoke session")?;
    Ok(row.as_ref().map(map_surrendered))
}

/// Deactivate every active session of a user. Returns the surrendered token
/// ids so the access tokens can be best-effort blacklisted.
pub async fn revoke_all_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<SurrenderedTokens>> {
    let query = "UPDATE auth_users_sessions SET active = FALSE \
         WHERE user_id = $1 AND active \
         RETURNING user_id, access_jti, refresh_jti, expires_at";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to revoke user sessions")?;
    Ok(rows.iter().map(map_surrendered).collect())
}

/// Active sessions for a user, newest first.
pub async fn list_active(pool: &PgPool, user_id: i64) -> Result<Vec<SessionRecord>> {
    let query = format!(
        "SELECT {SESSION_COLUMNS} FROM auth_users_sessions \
         WHERE user_id = $1 AND active \
         ORDER BY created_at DESC"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list active sessions")?;
    Ok(rows.iter().map(map_session).collect())
}

/// Deactivate every session whose refresh expiry has passed.
pub async fn sweep_expired(pool: &PgPool) -> Result<u64> {
    let query = "UPDATE auth_users_sessions SET active = FALSE \
         WHERE expires_at < NOW() AND active";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to sweep expired sessions")?;
    Ok(result.rows_affected())
}
