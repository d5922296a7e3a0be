use crate::api::{self, ServerConfig, handlers::auth::AuthConfig};
use anyhow::Result;
use std::path::PathBuf;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub cache_url: String,
    pub keyring_path: String,
    pub token_issuer: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub rotation_days: i64,
    pub grace_days: i64,
    pub sweep_interval_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database, cache, or keyring cannot be opened,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = AuthConfig::new()
        .with_issuer(args.token_issuer)
        .with_access_ttl_minutes(args.access_ttl_minutes)
        .with_refresh_ttl_days(args.refresh_ttl_days);

    let server = ServerConfig {
        port: args.port,
        dsn: args.dsn,
        cache_url: args.cache_url,
        keyring_path: PathBuf::from(args.keyring_path),
        rotation_days: args.rotation_days,
        grace_days: args.grace_days,
        sweep_interval_seconds: args.sweep_interval_seconds,
    };

    api::new(server, auth_config).await
}
