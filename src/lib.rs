//! # Stadion (Auth & Session Core)
//!
//! `stadion` is the authentication and session core of the athletics
//! management backend. It issues, validates, rotates, and revokes bearer
//! credentials for the HTTP API and gates access by role.
//!
//! ## Token lifecycle
//!
//! - **Access tokens** are short-lived HS256 JWTs. On every protected
//!   request the gate decodes the token against the signing keyring and
//!   checks its `jti` against the cache blacklist.
//! - **Refresh tokens** are single-use: each is whitelisted in the cache
//!   for exactly its lifetime and consumed with an atomic read-then-delete,
//!   so a replayed refresh loses the race instead of minting a second pair.
//! - **Signing keys** live in a file-backed ring. Rotation deactivates the
//!   old key but keeps it verifying inside a grace window, so outstanding
//!   tokens survive a rotation.
//!
//! ## Sessions
//!
//! Each user holds a single rolling session row: re-login overwrites the
//! newest active row, refresh rotates its token ids in place, and logout /
//! password changes deactivate rows and blacklist the surrendered tokens.
//!
//! ## Second factor
//!
//! TOTP (RFC 6238) with single-use backup codes. Login returns a short
//! challenge token for enrolled accounts; `/login/2fa` exchanges it plus a
//! code for the real pair.

pub mod api;
pub mod cache;
pub mod cli;
pub mod keyring;
pub mod otp;
pub mod password;
pub mod revocation;
pub mod sweeper;
pub mod token;
pub mod totp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
