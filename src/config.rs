//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Bounded retry with linear backoff, used when an optimistic commit loses a
/// race against a concurrent writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one before surfacing a conflict.
    pub retries: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(25))
    }
}

/// Configuration for the registrar service.
#[derive(Clone, Debug)]
pub struct Config {
    /// Database file (from REGISTRAR_DB_PATH). `None` uses the platform data dir.
    pub database_path: Option<PathBuf>,
    /// HTTP port (from REGISTRAR_PORT)
    pub port: u16,
    /// Retry policy for term activation and rule-set commits
    /// (from REGISTRAR_ACTIVATION_RETRIES and REGISTRAR_RETRY_BACKOFF_MS)
    pub retry: RetryPolicy,
    /// How long an in-flight activation claim is honoured before another
    /// activation may take it over (from REGISTRAR_LEASE_TTL_SECS)
    pub lease_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            port: 3000,
            retry: RetryPolicy::default(),
            lease_ttl: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let database_path = lookup("REGISTRAR_DB_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let port = lookup("REGISTRAR_PORT")
            .and_then(|s| s.trim().parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let retries = parsed("REGISTRAR_ACTIVATION_RETRIES")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(defaults.retry.retries);

        let backoff = parsed("REGISTRAR_RETRY_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry.backoff);

        let lease_ttl = parsed("REGISTRAR_LEASE_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.lease_ttl);

        Self {
            database_path,
            port,
            retry: RetryPolicy::new(retries, backoff),
            lease_ttl,
        }
    }
}
