//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "RTVS";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Worker pool size from RTVS_PARALLELISM
    pub parallelism: Option<usize>,
    /// Per-test watchdog from RTVS_TEST_TIMEOUT
    pub test_timeout_secs: Option<u64>,
    /// Session wait bound from RTVS_SESSION_TIMEOUT
    pub session_timeout_secs: Option<u64>,
    /// Heartbeat interval from RTVS_HEARTBEAT_MS
    pub heartbeat_interval_ms: Option<u64>,
    /// Target environment from RTVS_ENV
    pub environment: Option<String>,
    /// Catalog file from RTVS_CATALOG
    pub catalog_file: Option<String>,
    /// Journal directory from RTVS_STORE_DIR
    pub store_dir: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            parallelism: get_env_parse("PARALLELISM"),
            test_timeout_secs: get_env_parse("TEST_TIMEOUT"),
            session_timeout_secs: get_env_parse("SESSION_TIMEOUT"),
            heartbeat_interval_ms: get_env_parse("HEARTBEAT_MS"),
            environment: get_env("ENV"),
            catalog_file: get_env("CATALOG"),
            store_dir: get_env("STORE_DIR"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.parallelism.is_some()
            || self.test_timeout_secs.is_some()
            || self.session_timeout_secs.is_some()
            || self.heartbeat_interval_ms.is_some()
            || self.environment.is_some()
            || self.catalog_file.is_some()
            || self.store_dir.is_some()
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Guard that restores environment variables on drop (test helper)
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    /// Set prefixed variables, remembering their previous values
    pub fn set(vars: &[(&str, &str)]) -> Self {
        let previous = vars
            .iter()
            .map(|(k, _)| {
                let key = format!("{ENV_PREFIX}_{k}");
                let old = env::var(&key).ok();
                (key, old)
            })
            .collect();
        for (k, v) in vars {
            env::set_var(format!("{ENV_PREFIX}_{k}"), v);
        }
        EnvGuard { previous }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_config_load() {
        let _guard = EnvGuard::set(&[("PARALLELISM", "6"), ("ENV", "stage")]);

        let config = EnvConfig::load();
        assert_eq!(config.parallelism, Some(6));
        assert_eq!(config.environment.as_deref(), Some("stage"));
        assert!(config.has_any());
    }
}
