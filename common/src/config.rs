//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from `.env` and environment variables.
//! Tests can override single fields through the setters and restore the
//! environment-derived values with [`AppConfig::reset`].

use std::env;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

/// Complete application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    pub database_path: String,
    /// How many times a failed recompute transaction is re-run.
    pub recompute_retry_attempts: u32,
    /// Pause before each re-run, in milliseconds.
    pub recompute_retry_backoff_ms: u64,
}

static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: "development".into(),
            project_name: "attendance-ledger".into(),
            log_level: "info".into(),
            log_file: "logs/ledger.log".into(),
            log_to_stdout: false,
            database_path: "data/attendance.db".into(),
            recompute_retry_attempts: 1,
            recompute_retry_backoff_ms: 50,
        }
    }
}

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Missing keys and numbers that fail to parse fall back to the defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            env: var_or("APP_ENV", &defaults.env),
            project_name: var_or("PROJECT_NAME", &defaults.project_name),
            log_level: var_or("LOG_LEVEL", &defaults.log_level),
            log_file: var_or("LOG_FILE", &defaults.log_file),
            log_to_stdout: var_or("LOG_TO_STDOUT", "false") == "true",
            database_path: var_or("DATABASE_PATH", &defaults.database_path),
            recompute_retry_attempts: parsed_or(
                "RECOMPUTE_RETRY_ATTEMPTS",
                defaults.recompute_retry_attempts,
            ),
            recompute_retry_backoff_ms: parsed_or(
                "RECOMPUTE_RETRY_BACKOFF_MS",
                defaults.recompute_retry_backoff_ms,
            ),
        }
    }

    /// Returns a snapshot of the global configuration.
    pub fn global() -> AppConfig {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        match lock.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Reloads the configuration from the environment, discarding overrides.
    pub fn reset() {
        if CONFIG_INSTANCE.get().is_some() {
            AppConfig::set_field(|cfg| *cfg = AppConfig::from_env());
        }
    }

    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = match lock.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_env(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.env = value.into());
    }

    pub fn set_log_level(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_level = value.into());
    }

    pub fn set_log_file(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_file = value.into());
    }

    pub fn set_log_to_stdout(value: bool) {
        AppConfig::set_field(|cfg| cfg.log_to_stdout = value);
    }

    pub fn set_database_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.database_path = value.into());
    }

    pub fn set_recompute_retry_attempts(value: u32) {
        AppConfig::set_field(|cfg| cfg.recompute_retry_attempts = value);
    }

    pub fn set_recompute_retry_backoff_ms(value: u64) {
        AppConfig::set_field(|cfg| cfg.recompute_retry_backoff_ms = value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn malformed_numbers_fall_back_to_defaults() {
        unsafe {
            env::set_var("RECOMPUTE_RETRY_ATTEMPTS", "lots");
            env::set_var("RECOMPUTE_RETRY_BACKOFF_MS", " 125 ");
        }

        let cfg = AppConfig::from_env();
        assert_eq!(cfg.recompute_retry_attempts, 1);
        assert_eq!(cfg.recompute_retry_backoff_ms, 125);

        unsafe {
            env::remove_var("RECOMPUTE_RETRY_ATTEMPTS");
            env::remove_var("RECOMPUTE_RETRY_BACKOFF_MS");
        }
    }

    #[test]
    #[serial]
    fn setters_override_until_reset() {
        AppConfig::set_env("test");
        AppConfig::set_log_level("debug");
        AppConfig::set_log_file("/tmp/ledger-test.log");
        AppConfig::set_log_to_stdout(true);
        AppConfig::set_database_path("/tmp/override.db");
        AppConfig::set_recompute_retry_attempts(4);
        AppConfig::set_recompute_retry_backoff_ms(10);

        let cfg = AppConfig::global();
        assert_eq!(cfg.env, "test");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.log_file, "/tmp/ledger-test.log");
        assert!(cfg.log_to_stdout);
        assert_eq!(cfg.database_path, "/tmp/override.db");
        assert_eq!(cfg.recompute_retry_attempts, 4);
        assert_eq!(cfg.recompute_retry_backoff_ms, 10);

        AppConfig::reset();
        assert_eq!(AppConfig::global(), AppConfig::from_env());
    }
}
