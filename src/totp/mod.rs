//! Time-based one-time password second factor (RFC 6238).
//!
//! SHA-1, 6 digits, 30-second step, one step of skew in each direction so
//! a device clock up to ~30 s off still verifies.

pub mod backup;

use anyhow::{Result, anyhow};
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Stateless TOTP operations bound to the configured issuer.
#[derive(Clone, Debug)]
pub struct TotpService {
    issuer: String,
}

impl TotpService {
    #[must_use]
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }

    /// Generate a fresh base32 (RFC 4648) secret.
    #[must_use]
    pub fn generate_secret(&self) -> String {
        Secret::generate_secret().to_encoded().to_string()
    }

    /// Standard `otpauth://totp/...` URI for authenticator apps.
    ///
    /// # Errors
    /// Returns an error if the secret is not valid base32.
    pub fn provisioning_uri(&self, secret: &str, account: &str) -> Result<String> {
        Ok(self.totp(secret, account)?.get_url())
    }

    /// Render the provisioning URI as a PNG, returned as a base64 data URL.
    ///
    /// # Errors
    /// Returns an error if the secret is invalid or QR rendering fails.
    pub fn qr(&self, secret: &str, account: &str) -> Result<String> {
        let qr = self
            .totp(secret, account)?
            .get_qr_base64()
            .map_err(|err| anyhow!("QR generation failed: {err}"))?;
        Ok(format!("data:image/png;base64,{qr}"))
    }

    /// Verify a code against the secret, accepting adjacent time steps.
    ///
    /// # Errors
    /// Returns an error only when the stored secret is unreadable.
    pub fn verify(&self, secret: &str, code: &str) -> Result<bool> {
        // The account label does not participate in code generation.
        let totp = self.totp(secret, "account")?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    fn totp(&self, secret: &str, account: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|err| anyhow!("invalid TOTP secret: {err}"))?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|err| anyhow!("TOTP init failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TotpService {
        TotpService::new("Stadion".to_string())
    }

    #[test]
    fn generated_secret_is_base32() {
        let secret = service().generate_secret();
        assert!(!secret.is_empty());
        assert!(secret
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b)));
    }

    #[test]
    fn provisioning_uri_carries_issuer_and_account() {
        let service = service();
        let secret = service.generate_secret();
        let uri = service
            .provisioning_uri(&secret, "runner@example.com")
            .unwrap();
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("Stadion"));
        assert!(uri.contains("runner"));
    }

    #[test]
    fn qr_is_a_png_data_url() {
        let service = service();
        let secret = service.generate_secret();
        let qr = service.qr(&secret, "runner@example.com").unwrap();
        assert!(qr.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn current_code_verifies() {
        let service = service();
        let secret = service.generate_secret();

        let secret_bytes = Secret::Encoded(secret.clone()).to_bytes().unwrap();
        let totp = TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret_bytes,
            Some("Stadion".to_string()),
            "runner@example.com".to_string(),
        )
        .unwrap();
        let code = totp.generate_current().unwrap();

        assert!(service.verify(&secret, &code).unwrap());
    }

    #[test]
    fn wrong_code_fails() {
        let service = service();
        let secret = service.generate_secret();
        assert!(!service.verify(&secret, "000000").unwrap());
    }

    #[test]
    fn invalid_secret_is_an_error() {
        assert!(service().verify("this is not base32!", "123456").is_err());
    }
}
