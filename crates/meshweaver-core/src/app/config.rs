//! OrchestratorConfig - 環境変数からの設定
//!
//! All knobs live in one plain struct with sensible defaults. `from_env`
//! reads `MESHWEAVER_*` variables; `from_lookup` takes any key -> value
//! function so tests never touch the process environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::scheduler::SchedulerConfig;
use crate::transport::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://api.tripo3d.ai/v2/openapi";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Bound on every API call.
    pub timeout: Duration,
    /// Bound on a single asset download.
    pub download_timeout: Duration,
    pub scheduler: SchedulerConfig,
    /// Where the task list is persisted between sessions.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(120),
            scheduler: SchedulerConfig::default(),
            snapshot_path: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        config.api_key = get("MESHWEAVER_API_KEY");
        if let Some(url) = get("MESHWEAVER_BASE_URL") {
            config.base_url = url;
        }
        if let Some(v) = get("MESHWEAVER_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(positive("MESHWEAVER_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("MESHWEAVER_DOWNLOAD_TIMEOUT_SECS") {
            config.download_timeout = Duration::from_secs(positive("MESHWEAVER_DOWNLOAD_TIMEOUT_SECS", &v)?);
        }

        let scheduler = &mut config.scheduler;
        if let Some(v) = get("MESHWEAVER_POLL_INTERVAL_SECS") {
            scheduler.poll_interval = Duration::from_secs(positive("MESHWEAVER_POLL_INTERVAL_SECS", &v)?);
        }
        let retry: &mut RetryPolicy = &mut scheduler.retry;
        if let Some(v) = get("MESHWEAVER_MAX_ATTEMPTS") {
            retry.max_attempts = positive("MESHWEAVER_MAX_ATTEMPTS", &v)?
                .try_into()
                .map_err(|_| invalid("MESHWEAVER_MAX_ATTEMPTS", &v, "too large"))?;
        }
        if let Some(v) = get("MESHWEAVER_RETRY_BASE_MS") {
            retry.base_delay = Duration::from_millis(positive("MESHWEAVER_RETRY_BASE_MS", &v)?);
        }
        if let Some(v) = get("MESHWEAVER_RETRY_MAX_SECS") {
            retry.max_delay = Duration::from_secs(positive("MESHWEAVER_RETRY_MAX_SECS", &v)?);
        }
        if retry.max_delay < retry.base_delay {
            return Err(invalid(
                "MESHWEAVER_RETRY_MAX_SECS",
                &retry.max_delay.as_secs().to_string(),
                "must not be below the base delay",
            ));
        }
        if let Some(v) = get("MESHWEAVER_BALANCE_GUARD") {
            scheduler.balance_guard = flag("MESHWEAVER_BALANCE_GUARD", &v)?;
        }
        if let Some(v) = get("MESHWEAVER_AUTO_IMPORT") {
            scheduler.auto_import = flag("MESHWEAVER_AUTO_IMPORT", &v)?;
        }

        config.snapshot_path = get("MESHWEAVER_SNAPSHOT").map(PathBuf::from);
        Ok(config)
    }
}

fn invalid(key: &'static str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    }
}

fn positive(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(0) => Err(invalid(key, value, "must be greater than zero")),
        Ok(n) => Ok(n),
        Err(_) => Err(invalid(key, value, "expected a whole number")),
    }
}

fn flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = OrchestratorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn variables_override_defaults() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("MESHWEAVER_API_KEY", " tsk_abc "),
            ("MESHWEAVER_POLL_INTERVAL_SECS", "5"),
            ("MESHWEAVER_MAX_ATTEMPTS", "8"),
            ("MESHWEAVER_RETRY_BASE_MS", "250"),
            ("MESHWEAVER_BALANCE_GUARD", "off"),
            ("MESHWEAVER_AUTO_IMPORT", "false"),
            ("MESHWEAVER_SNAPSHOT", "/tmp/tasks.json"),
        ]))
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("tsk_abc"));
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(5));
        assert_eq!(config.scheduler.retry.max_attempts, 8);
        assert_eq!(config.scheduler.retry.base_delay, Duration::from_millis(250));
        assert!(!config.scheduler.balance_guard);
        assert!(!config.scheduler.auto_import);
        assert_eq!(config.snapshot_path, Some(PathBuf::from("/tmp/tasks.json")));
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = OrchestratorConfig::from_lookup(lookup(&[("MESHWEAVER_API_KEY", "  ")])).unwrap();
        assert_eq!(config.api_key, None);
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = OrchestratorConfig::from_lookup(lookup(&[("MESHWEAVER_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(err.to_string().starts_with("MESHWEAVER_TIMEOUT_SECS"));

        let err = OrchestratorConfig::from_lookup(lookup(&[("MESHWEAVER_AUTO_IMPORT", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MESHWEAVER_AUTO_IMPORT", .. }));

        let err = OrchestratorConfig::from_lookup(lookup(&[
            ("MESHWEAVER_RETRY_BASE_MS", "10000"),
            ("MESHWEAVER_RETRY_MAX_SECS", "5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MESHWEAVER_RETRY_MAX_SECS", .. }));
    }
}
