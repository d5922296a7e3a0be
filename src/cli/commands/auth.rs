use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_KEYRING_PATH: &str = "keyring-path";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_ACCESS_TTL_MINUTES: &str = "access-ttl-minutes";
pub const ARG_REFRESH_TTL_DAYS: &str = "refresh-ttl-days";
pub const ARG_ROTATION_DAYS: &str = "key-rotation-days";
pub const ARG_GRACE_DAYS: &str = "key-grace-days";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_KEYRING_PATH)
                .long(ARG_KEYRING_PATH)
                .help("Path of the JSON signing-key ring")
                .env("STADION_KEYRING_PATH")
                .default_value("signing_keys.json"),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer label used in TOTP provisioning URIs")
                .env("STADION_TOKEN_ISSUER")
                .default_value("stadion"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL_MINUTES)
                .long(ARG_ACCESS_TTL_MINUTES)
                .help("Access token lifetime in minutes")
                .env("STADION_ACCESS_TTL_MINUTES")
                .default_value("15")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_DAYS)
                .long(ARG_REFRESH_TTL_DAYS)
                .help("Refresh token lifetime in days")
                .env("STADION_REFRESH_TTL_DAYS")
                .default_value("7")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_ROTATION_DAYS)
                .long(ARG_ROTATION_DAYS)
                .help("Days before a signing key is due for rotation")
                .env("STADION_KEY_ROTATION_DAYS")
                .default_value("90")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_GRACE_DAYS)
                .long(ARG_GRACE_DAYS)
                .help("Days a rotated-out key keeps verifying tokens")
                .env("STADION_KEY_GRACE_DAYS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Interval of the expired-session sweeper")
                .env("STADION_SWEEP_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub keyring_path: String,
    pub token_issuer: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub rotation_days: i64,
    pub grace_days: i64,
    pub sweep_interval_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error when a defaulted argument is missing, which only a
    /// broken `Command` wiring can cause.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            keyring_path: matches
                .get_one::<String>(ARG_KEYRING_PATH)
                .cloned()
                .context("missing keyring-path")?,
            token_issuer: matches
                .get_one::<String>(ARG_TOKEN_ISSUER)
                .cloned()
                .context("missing token-issuer")?,
            access_ttl_minutes: matches
                .get_one::<i64>(ARG_ACCESS_TTL_MINUTES)
                .copied()
                .context("missing access-ttl-minutes")?,
            refresh_ttl_days: matches
                .get_one::<i64>(ARG_REFRESH_TTL_DAYS)
                .copied()
                .context("missing refresh-ttl-days")?,
            rotation_days: matches
                .get_one::<i64>(ARG_ROTATION_DAYS)
                .copied()
                .context("missing key-rotation-days")?,
            grace_days: matches
                .get_one::<i64>(ARG_GRACE_DAYS)
                .copied()
                .context("missing key-grace-days")?,
            sweep_interval_seconds: matches
                .get_one::<u64>(ARG_SWEEP_INTERVAL_SECONDS)
                .copied()
                .context("missing sweep-interval-seconds")?,
        })
    }
}
