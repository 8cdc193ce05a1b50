//! Process configuration read from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `GITHUB_TOKEN` (or `TOKEN`) | none; required by `run` |
//! | `GITHUB_API_URL` | `https://api.github.com/repos` |
//! | `RECONCILER_STORE` | `.issues` |
//! | `RECONCILER_WORKERS` | `2` |
//! | `RECONCILER_RESYNC_SECS` | `300` |
//! | `RECONCILER_REQUEST_TIMEOUT_SECS` | `30` |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_API_URL: &str = "https://api.github.com/repos";
const DEFAULT_STORE: &str = ".issues";
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_RESYNC_SECS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// A bearer token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for building the authorization header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Settings for the store, the tracker client, and the controller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Tracker credential, if one was supplied.
    pub credential: Option<Credential>,
    /// Base URL that `<owner>/<name>/issues` is appended to.
    pub api_url: String,
    /// Root directory of the file store.
    pub store_root: PathBuf,
    /// Number of concurrent reconciliation workers.
    pub workers: usize,
    /// Interval between full resyncs of every record.
    pub resync_interval: Duration,
    /// Per-request timeout for tracker calls.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credential: None,
            api_url: DEFAULT_API_URL.to_string(),
            store_root: PathBuf::from(DEFAULT_STORE),
            workers: DEFAULT_WORKERS,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which returns a variable's value if set.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a numeric variable does not parse or
    /// the worker count is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let credential = non_empty("GITHUB_TOKEN").or_else(|| non_empty("TOKEN")).map(Credential);
        let workers =
            parse_or(non_empty("RECONCILER_WORKERS"), "RECONCILER_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(Error::config("RECONCILER_WORKERS must be at least 1"));
        }
        let resync: u64 = parse_or(
            non_empty("RECONCILER_RESYNC_SECS"),
            "RECONCILER_RESYNC_SECS",
            DEFAULT_RESYNC_SECS,
        )?;
        let timeout: u64 = parse_or(
            non_empty("RECONCILER_REQUEST_TIMEOUT_SECS"),
            "RECONCILER_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        Ok(Self {
            credential,
            api_url: non_empty("GITHUB_API_URL").unwrap_or(defaults.api_url),
            store_root: non_empty("RECONCILER_STORE").map_or(defaults.store_root, PathBuf::from),
            workers,
            resync_interval: Duration::from_secs(resync),
            request_timeout: Duration::from_secs(timeout.max(1)),
        })
    }

    /// Returns the credential, or an error naming the variable to set.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no token was supplied.
    pub fn require_credential(&self) -> Result<&Credential> {
        self.credential.as_ref().ok_or_else(|| Error::config("GITHUB_TOKEN is not set"))
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: fmt::Display,
{
    raw.map_or(Ok(default), |value| {
        value.trim().parse().map_err(|e| Error::config(format!("{key}={value:?}: {e}")))
    })
}
