use std::path::PathBuf;
use std::time::Duration;

use sigforge_storage::HttpClientConfig;
use thiserror::Error;

pub const DEFAULT_USER_AGENT: &str = "sigforge/0.1 (job aggregator)";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("alerts are enabled but {0} is not set")]
    MissingAlertSetting(&'static str),
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
}

/// Process configuration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub rules_file: PathBuf,
    pub sources_file: PathBuf,
    pub interval_minutes: u64,
    pub schedule_crons: Vec<String>,
    pub run_on_start: bool,
    pub run_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub enable_alerts: bool,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub web_addr: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |key: &str, default: bool| {
            var(key)
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True" | "yes"))
                .unwrap_or(default)
        };
        let number = |key: &str, default: u64| var(key).and_then(|v| v.parse().ok()).unwrap_or(default);

        Self {
            database_url: var("DATABASE_URL"),
            rules_file: var("SIGFORGE_RULES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("rules/job_rules.yaml")),
            sources_file: var("SIGFORGE_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("sources.yaml")),
            interval_minutes: number("SIGFORGE_INTERVAL_MINUTES", 60),
            schedule_crons: var("SIGFORGE_SCHEDULE_CRONS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            run_on_start: flag("SIGFORGE_RUN_ON_START", true),
            run_timeout_secs: number("SIGFORGE_RUN_TIMEOUT_SECS", 120),
            http_timeout_secs: number("SIGFORGE_HTTP_TIMEOUT_SECS", 30),
            user_agent: var("SIGFORGE_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            enable_alerts: flag("SIGFORGE_ENABLE_ALERTS", false),
            telegram_token: var("TELEGRAM_TOKEN"),
            telegram_chat_id: var("TELEGRAM_CHAT_ID"),
            web_addr: var("SIGFORGE_WEB_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_minutes == 0 {
            return Err(ConfigError::Zero {
                name: "SIGFORGE_INTERVAL_MINUTES",
            });
        }
        if self.run_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                name: "SIGFORGE_RUN_TIMEOUT_SECS",
            });
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                name: "SIGFORGE_HTTP_TIMEOUT_SECS",
            });
        }
        if self.enable_alerts {
            if self.telegram_token.is_none() {
                return Err(ConfigError::MissingAlertSetting("TELEGRAM_TOKEN"));
            }
            if self.telegram_chat_id.is_none() {
                return Err(ConfigError::MissingAlertSetting("TELEGRAM_CHAT_ID"));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = SyncConfig::default();
        assert_eq!(config.database_url, None);
        assert_eq!(config.rules_file, PathBuf::from("rules/job_rules.yaml"));
        assert_eq!(config.sources_file, PathBuf::from("sources.yaml"));
        assert_eq!(config.interval(), Duration::from_secs(3600));
        assert!(config.schedule_crons.is_empty());
        assert!(config.run_on_start);
        assert_eq!(config.run_timeout(), Duration::from_secs(120));
        assert!(!config.enable_alerts);
        assert_eq!(config.web_addr, "0.0.0.0:8000");
        assert_eq!(config.http_client_config().user_agent.as_deref(), Some(DEFAULT_USER_AGENT));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://sf:sf@localhost/sf"),
            ("SIGFORGE_INTERVAL_MINUTES", "15"),
            ("SIGFORGE_SCHEDULE_CRONS", "0 0 6 * * *, ,0 0 18 * * *"),
            ("SIGFORGE_RUN_ON_START", "false"),
            ("SIGFORGE_RUN_TIMEOUT_SECS", "not-a-number"),
            ("SIGFORGE_ENABLE_ALERTS", "1"),
            ("TELEGRAM_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "42"),
        ]));
        assert_eq!(config.database_url.as_deref(), Some("postgres://sf:sf@localhost/sf"));
        assert_eq!(config.interval_minutes, 15);
        assert_eq!(config.schedule_crons, vec!["0 0 6 * * *", "0 0 18 * * *"]);
        assert!(!config.run_on_start);
        assert_eq!(config.run_timeout_secs, 120);
        assert!(config.enable_alerts);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn alerts_without_credentials_fail_validation() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("SIGFORGE_ENABLE_ALERTS", "true"),
            ("TELEGRAM_TOKEN", "123:abc"),
        ]));
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingAlertSetting("TELEGRAM_CHAT_ID"))
        );

        let zero = SyncConfig::from_lookup(lookup(&[("SIGFORGE_INTERVAL_MINUTES", "0")]));
        assert!(matches!(zero.validate(), Err(ConfigError::Zero { .. })));
    }
}
