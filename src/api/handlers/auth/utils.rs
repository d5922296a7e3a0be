//! Small helpers shared across the auth handlers.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use regex::Regex;

const PASSWORD_MIN_LEN: usize = 8;
const PASSWORD_MAX_LEN: usize = 128;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Password strength rules: 8..=128 chars with upper, lower, digit, and a
/// special character. Returns the reason on failure so the 422 body can say
/// which rule was broken without echoing the password.
pub(crate) fn check_password_strength(password: &str) -> Result<(), String> {
    let length = password.chars().count();
    if length < PASSWORD_MIN_LEN {
        return Err(format!(
            "password must be at least {PASSWORD_MIN_LEN} characters"
        ));
    }
    if length > PASSWORD_MAX_LEN {
        return Err(format!(
            "password must be at most {PASSWORD_MAX_LEN} characters"
        ));
    }
    if !password.chars().any(char::is_uppercase) {
        return Err("password must contain an uppercase letter".to_string());
    }
    if !password.chars().any(char::is_lowercase) {
        return Err("password must contain a lowercase letter".to_string());
    }
    if !password.chars().any(|ch| ch.is_ascii_digit()) {
        return Err("password must contain a digit".to_string());
    }
    if !password
        .chars()
        .any(|ch| !ch.is_alphanumeric() && !ch.is_whitespace())
    {
        return Err("password must contain a special character".to_string());
    }
    Ok(())
}

/// Pull the bearer token out of the Authorization header, if any.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
