use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_CACHE_URL: &str = "cache-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_CACHE_URL)
            .long(ARG_CACHE_URL)
            .help("Cache backend URL: memory:// or redis://host[:port]/db")
            .env("STADION_CACHE_URL")
            .default_value("memory://"),
    )
}

#[derive(Debug)]
pub struct Options {
    pub url: String,
}

impl Options {
    /// # Errors
    /// Returns an error when the argument is missing (it has a default, so
    /// only a broken `Command` wiring can trigger this).
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>(ARG_CACHE_URL)
            .cloned()
            .context("missing cache-url")?;
        Ok(Self { url })
    }
}
