use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use forkline_types::models::UserId;

/// Path value that selects the in-memory store.
pub const MEMORY_DB: &str = ":memory:";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub default_model: String,
    pub default_user: UserId,
    pub generator_url: Option<String>,
    pub generator_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let port = var("FORKLINE_PORT", "3000")
            .parse()
            .context("FORKLINE_PORT must be a port number")?;
        let default_user = var("FORKLINE_DEFAULT_USER", "1")
            .parse()
            .context("FORKLINE_DEFAULT_USER must be an integer")?;
        let timeout_secs: u64 = var("FORKLINE_GENERATOR_TIMEOUT_SECS", "30")
            .parse()
            .context("FORKLINE_GENERATOR_TIMEOUT_SECS must be a number of seconds")?;

        Ok(Self {
            host: var("FORKLINE_HOST", "0.0.0.0"),
            port,
            db_path: var("FORKLINE_DB_PATH", "forkline.db").into(),
            default_model: var("FORKLINE_DEFAULT_MODEL", "gpt-4"),
            default_user,
            generator_url: lookup("FORKLINE_GENERATOR_URL").filter(|url| !url.trim().is_empty()),
            generator_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn in_memory(&self) -> bool {
        self.db_path.as_os_str() == MEMORY_DB
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.default_model, "gpt-4");
        assert_eq!(config.default_user, 1);
        assert!(config.generator_url.is_none());
        assert_eq!(config.generator_timeout, Duration::from_secs(30));
        assert!(!config.in_memory());
    }

    #[test]
    fn memory_path_selects_memory_store() {
        let config = config(&[("FORKLINE_DB_PATH", ":memory:"), ("FORKLINE_PORT", "8080")]).unwrap();
        assert!(config.in_memory());
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(config(&[("FORKLINE_PORT", "http")]).is_err());
        assert!(config(&[("FORKLINE_DEFAULT_USER", "admin")]).is_err());
    }
}
