//! Auth state and configuration shared by every handler.

use chrono::Duration;
use std::sync::Arc;

use crate::api::email::EmailSender;
use crate::keyring::KeyRing;
use crate::otp::OtpStore;
use crate::revocation::RevocationStore;
use crate::totp::TotpService;

const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;
const DEFAULT_REFRESH_TTL_DAYS: i64 = 7;
const DEFAULT_CHALLENGE_TTL_MINUTES: i64 = 5;
const DEFAULT_BACKUP_CODE_COUNT: usize = 10;
const DEFAULT_TOKEN_ISSUER: &str = "stadion";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    issuer: String,
    access_ttl_minutes: i64,
    refresh_ttl_days: i64,
    challenge_ttl_minutes: i64,
    backup_code_count: usize,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            access_ttl_minutes: DEFAULT_ACCESS_TTL_MINUTES,
            refresh_ttl_days: DEFAULT_REFRESH_TTL_DAYS,
            challenge_ttl_minutes: DEFAULT_CHALLENGE_TTL_MINUTES,
            backup_code_count: DEFAULT_BACKUP_CODE_COUNT,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_access_ttl_minutes(mut self, minutes: i64) -> Self {
        self.access_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_days(mut self, days: i64) -> Self {
        self.refresh_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_minutes(mut self, minutes: i64) -> Self {
        // The 2FA challenge token must stay short-lived.
        self.challenge_ttl_minutes = minutes.clamp(1, DEFAULT_CHALLENGE_TTL_MINUTES);
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        Duration::minutes(self.access_ttl_minutes)
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        Duration::days(self.refresh_ttl_days)
    }

    #[must_use]
    pub fn challenge_ttl(&self) -> Duration {
        Duration::minutes(self.challenge_ttl_minutes)
    }

    #[must_use]
    pub fn backup_code_count(&self) -> usize {
        self.backup_code_count
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the auth handlers share besides the SQL pool.
pub struct AuthState {
    config: AuthConfig,
    keyring: KeyRing,
    revocation: RevocationStore,
    otp: OtpStore,
    totp: TotpService,
    mailer: Arc<dyn EmailSender>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        keyring: KeyRing,
        revocation: RevocationStore,
        otp: OtpStore,
        mailer: Arc<dyn EmailSender>,
    ) -> Self {
        let totp = TotpService::new(config.issuer().to_string());
        Self {
            config,
            keyring,
            revocation,
            otp,
            totp,
            mailer,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn keyring(&self) -> &KeyRing {
        &self.keyring
    }

    #[must_use]
    pub fn revocation(&self) -> &RevocationStore {
        &self.revocation
    }

    #[must_use]
    pub fn otp(&self) -> &OtpStore {
        &self.otp
    }

    #[must_use]
    pub fn totp(&self) -> &TotpService {
        &self.totp
    }

    #[must_use]
    pub fn mailer(&self) -> &dyn EmailSender {
        self.mailer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_overrides() {
        let config = AuthConfig::new();
        assert_eq!(config.issuer(), "stadion");
        assert_eq!(config.access_ttl(), Duration::minutes(15));
        assert_eq!(config.refresh_ttl(), Duration::days(7));
        assert_eq!(config.challenge_ttl(), Duration::minutes(5));
        assert_eq!(config.backup_code_count(), 10);

        let config = config
            .with_issuer("stadion-test".to_string())
            .with_access_ttl_minutes(5)
            .with_refresh_ttl_days(1);
        assert_eq!(config.issuer(), "stadion-test");
        assert_eq!(config.access_ttl(), Duration::minutes(5));
        assert_eq!(config.refresh_ttl(), Duration::days(1));
    }

    #[test]
    fn challenge_ttl_is_capped_at_five_minutes() {
        let config = AuthConfig::new().with_challenge_ttl_minutes(30);
        assert_eq!(config.challenge_ttl(), Duration::minutes(5));

        let config = AuthConfig::new().with_challenge_ttl_minutes(0);
        assert_eq!(config.challenge_ttl(), Duration::minutes(1));
    }
}
