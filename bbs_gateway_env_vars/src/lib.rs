//! Small helpers for reading configuration out of the process environment.
//!
//! `.env` files are loaded lazily and only once, the first time any of these
//! functions are called, mirroring `dotenvy`'s own recommended usage.

use anyhow::{anyhow, Context};
use std::env::VarError;
use std::str::FromStr;
use std::sync::Once;

static DOTENV: Once = Once::new();

fn load_dotenv() {
    DOTENV.call_once(|| {
        if let Err(error) = dotenvy::dotenv() {
            if !error.not_found() {
                warn_dotenv_error(&error);
            }
        }
    });
}

#[cfg(not(test))]
fn warn_dotenv_error(error: &dotenvy::Error) {
    eprintln!("Failed to read .env file, ignoring it: {error}");
}

#[cfg(test)]
fn warn_dotenv_error(_error: &dotenvy::Error) {}

/// Reads an environment variable, returning `None` if it is unset.
pub fn var(key: &str) -> anyhow::Result<Option<String>> {
    load_dotenv();

    match std::env::var(key) {
        Ok(content) => Ok(Some(content)),
        Err(VarError::NotPresent) => Ok(None),
        Err(error @ VarError::NotUnicode(_)) => {
            Err(error).with_context(|| format!("Failed to read {key}"))
        }
    }
}

/// Reads an environment variable and parses it, returning `None` if it is unset.
pub fn var_parsed<R>(key: &str) -> anyhow::Result<Option<R>>
where
    R: FromStr,
    R::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key)? {
        None => Ok(None),
        Some(content) => content
            .parse()
            .map(Some)
            .with_context(|| format!("Failed to parse {key}")),
    }
}

/// Reads an environment variable, returning an error if it is unset.
pub fn required_var(key: &str) -> anyhow::Result<String> {
    var(key)?.ok_or_else(|| anyhow!("Failed to find required env var {key}"))
}

/// Reads an environment variable and parses it, returning an error if it is
/// unset or cannot be parsed.
pub fn required_var_parsed<R>(key: &str) -> anyhow::Result<R>
where
    R: FromStr,
    R::Err: std::error::Error + Send + Sync + 'static,
{
    required_var(key)?
        .parse()
        .with_context(|| format!("Failed to parse {key}"))
}
