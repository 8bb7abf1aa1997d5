use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::catalog::BehaviorCatalog;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub retry: RetryPolicy,
    pub catalog_path: Option<PathBuf>,
    pub notify_capacity: usize,
}

impl Config {
    /// Environment variables:
    /// - `DATABASE_URL` (required by commands that touch Postgres)
    /// - `POINTS_MAX_CONNECTIONS` (default: 5)
    /// - `POINTS_RETRY_ATTEMPTS` (default: 8)
    /// - `POINTS_RETRY_BASE_MS` (default: 5)
    /// - `POINTS_RETRY_MAX_MS` (default: 250)
    /// - `POINTS_BEHAVIOR_CATALOG` (default: built-in catalog; see `data/behaviors.csv`)
    /// - `POINTS_NOTIFY_CAPACITY` (default: 256)
    pub fn from_env() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            max_connections: parse_var("POINTS_MAX_CONNECTIONS").unwrap_or(5),
            retry: RetryPolicy {
                max_attempts: parse_var("POINTS_RETRY_ATTEMPTS")
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.max_attempts),
                base_backoff: parse_var("POINTS_RETRY_BASE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.base_backoff),
                max_backoff: parse_var("POINTS_RETRY_MAX_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.max_backoff),
            },
            catalog_path: env::var_os("POINTS_BEHAVIOR_CATALOG").map(PathBuf::from),
            notify_capacity: parse_var("POINTS_NOTIFY_CAPACITY").unwrap_or(256),
        }
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }

    pub fn load_catalog(&self) -> anyhow::Result<BehaviorCatalog> {
        match &self.catalog_path {
            Some(path) => BehaviorCatalog::from_csv(path),
            None => Ok(BehaviorCatalog::builtin()),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring unparseable {name}={raw}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases share one test so they never race on the process environment.
    #[test]
    fn reads_defaults_and_overrides() {
        for name in [
            "DATABASE_URL",
            "POINTS_MAX_CONNECTIONS",
            "POINTS_RETRY_ATTEMPTS",
            "POINTS_RETRY_BASE_MS",
            "POINTS_RETRY_MAX_MS",
            "POINTS_BEHAVIOR_CATALOG",
            "POINTS_NOTIFY_CAPACITY",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env();
        assert!(config.database_url.is_none());
        assert!(config.database_url().is_err());
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.catalog_path.is_none());
        assert_eq!(config.load_catalog().unwrap().len(), BehaviorCatalog::builtin().len());

        env::set_var("DATABASE_URL", "postgres://localhost/points");
        env::set_var("POINTS_RETRY_ATTEMPTS", "3");
        env::set_var("POINTS_RETRY_BASE_MS", "10");
        env::set_var("POINTS_RETRY_MAX_MS", "not-a-number");
        env::set_var("POINTS_NOTIFY_CAPACITY", "16");

        let config = Config::from_env();
        assert_eq!(config.database_url().unwrap(), "postgres://localhost/points");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_backoff, Duration::from_millis(10));
        assert_eq!(config.retry.max_backoff, RetryPolicy::default().max_backoff);
        assert_eq!(config.notify_capacity, 16);

        for name in [
            "DATABASE_URL",
            "POINTS_RETRY_ATTEMPTS",
            "POINTS_RETRY_BASE_MS",
            "POINTS_RETRY_MAX_MS",
            "POINTS_NOTIFY_CAPACITY",
        ] {
            env::remove_var(name);
        }
    }
}
