//! Database helpers for the identity root (`auth_users`).

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use super::types::Role;
use super::utils::is_unique_violation;

/// Full identity row, including the profile columns the platform keys on.
#[derive(Clone, Debug)]
pub struct AuthUserRecord {
    pub id: i64,
    pub public_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
    pub email_confirmed_at: Option<DateTime<Utc>>,
    pub full_name: String,
    pub role: Role,
    pub totp_secret: Option<String>,
    pub two_factor_enabled: bool,
    pub totp_backup_codes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuthUserRecord {
    /// Parse the stored backup-code hashes, treating absence as empty.
    pub fn backup_code_hashes(&self) -> Result<Vec<String>> {
        match &self.totp_backup_codes {
            Some(raw) => serde_json::from_str(raw).context("invalid backup code store"),
            None => Ok(Vec::new()),
        }
    }
}

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub enum SignupOutcome {
    Created(AuthUserRecord),
    Conflict,
}

const USER_COLUMNS: &str = "id, public_id, email, password_hash, active, email_confirmed_at, \
     full_name, role, totp_secret, two_factor_enabled, totp_backup_codes, created_at";

fn map_user(row: &PgRow) -> Result<AuthUserRecord> {
    let role_raw: String = row.get("role");
    let role = Role::parse(&role_raw).ok_or_else(|| anyhow!("unknown role in database: {role_raw}"))?;
    Ok(AuthUserRecord {
        id: row.get("id"),
        public_id: row.get("public_id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        active: row.get("active"),
        email_confirmed_at: row.get("email_confirmed_at"),
        full_name: row.get("full_name"),
        role,
        totp_secret: row.get("totp_secret"),
        two_factor_enabled: row.get("two_factor_enabled"),
        totp_backup_codes: row.get("totp_backup_codes"),
        created_at: row.get("created_at"),
    })
}

/// Insert an inactive user with their profile columns.
pub async fn insert_user(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    full_name: &str,
    role: Role,
) -> Result<SignupOutcome> {
    let query = format!(
        "INSERT INTO auth_users (email, password_hash, full_name, role) \
         VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(email)
        .bind(password_hash)
        .bind(full_name)
        .bind(role.as_str())
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(SignupOutcome::Created(map_user(&row)?)),
        Err(err) if is_unique_violation(&err) => Ok(SignupOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

pub async fn lookup_by_email(pool: &PgPool, email: &str) -> Result<Option<AuthUserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM auth_users WHERE email = $1 LIMIT 1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;
    row.as_ref().map(map_user).transpose()
}

pub async fn lookup_by_public_id(
    pool: &PgPool,
    public_id: Uuid,
) -> Result<Option<AuthUserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM auth_users WHERE public_id = $1 LIMIT 1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(public_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by public id")?;
    row.as_ref().map(map_user).transpose()
}

/// Activate an account after email verification.
pub async fn activate_user(pool: &PgPool, user_id: i64) -> Result<()> {
    let query = "UPDATE auth_users \
         SET active = TRUE, email_confirmed_at = NOW(), updated_at = NOW() \
         WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to activate user")?;
    Ok(())
}

pub async fn set_password_hash(pool: &PgPool, user_id: i64, password_hash: &str) -> Result<()> {
    let query = "UPDATE auth_users SET password_hash = $2, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update password hash")?;
    Ok(())
}

/// Store a pending TOTP secret without enabling the second factor yet.
pub async fn store_totp_secret(pool: &PgPool, user_id: i64, secret: &str) -> Result<()> {
    let query = "UPDATE auth_users SET totp_secret = $2, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(secret)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store TOTP secret")?;
    Ok(())
}

/// Flip the second factor on. The secret must already be stored.
pub async fn enable_two_factor(pool: &PgPool, user_id: i64) -> Result<()> {
    let query = "UPDATE auth_users \
         SET two_factor_enabled = TRUE, updated_at = NOW() \
         WHERE id = $1 AND totp_secret IS NOT NULL";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to enable two-factor")?;
    if result.rows_affected() == 0 {
        return Err(anyhow!("two-factor enable without a stored secret"));
    }
    Ok(())
}

/// Clear the secret, the enabled flag, and the backup-code store.
pub async fn disable_two_factor(pool: &PgPool, user_id: i64) -> Result<()> {
    let query = "UPDATE auth_users \
         SET two_factor_enabled = FALSE, totp_secret = NULL, totp_backup_codes = NULL, \
             updated_at = NOW() \
         WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to disable two-factor")?;
    Ok(())
}

/// Replace the stored backup-code hashes (issue or consume).
pub async fn set_backup_codes(pool: &PgPool, user_id: i64, hashes: &[String]) -> Result<()> {
    let json = serde_json::to_string(hashes).context("failed to serialize backup codes")?;
    let query = "UPDATE auth_users SET totp_backup_codes = $2, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(json)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store backup codes")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(backup: Option<&str>) -> AuthUserRecord {
        AuthUserRecord {
            id: 1,
            public_id: Uuid::nil(),
            email: "a@example.com".to_string(),
            password_hash: "hash".to_string(),
            active: true,
            email_confirmed_at: None,
            full_name: "A".to_string(),
            role: Role::Trainee,
            totp_secret: None,
            two_factor_enabled: false,
            totp_backup_codes: backup.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn backup_code_hashes_default_to_empty() {
        assert!(record(None).backup_code_hashes().unwrap().is_empty());
    }

    #[test]
    fn backup_code_hashes_parse_json() {
        let parsed = record(Some(r#"["h1","h2"]"#)).backup_code_hashes().unwrap();
        assert_eq!(parsed, vec!["h1".to_string(), "h2".to_string()]);
    }

    #[test]
    fn backup_code_hashes_reject_garbage() {
        assert!(record(Some("not json")).backup_code_hashes().is_err());
    }

    #[test]
    fn signup_outcome_debug_names() {
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }
}
