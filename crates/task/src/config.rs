//! Service configuration.
//!
//! Loaded from TOML, then overlaid by `REKEY_*` environment variables. Every
//! section has defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! lead_time = "2h"
//! scan_interval = "5m"
//! application_scopes = ["https://vault.example/.default"]
//!
//! [workflow]
//! skip_cleanup = false
//! call_timeout = "2m"
//!
//! [lease]
//! max_wait = "45s"
//!
//! [log]
//! level = "info,rekey_task=debug"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use humantime_serde::re::humantime;
use rekey_storage::LeasePolicy;
use rekey_workflow::WorkflowOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    Env { key: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for the rekeying service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RekeyConfig {
    /// How close to expiry a secret must be before a signal or scan rotates it.
    #[serde(with = "humantime_serde")]
    pub lead_time: Duration,
    /// Longest an external-signal caller waits for the rotation.
    #[serde(with = "humantime_serde")]
    pub external_signal_timeout: Duration,
    /// Period of the background scan.
    #[serde(with = "humantime_serde")]
    pub scan_interval: Duration,
    /// Task expiry when the secret does not expire sooner.
    #[serde(with = "humantime_serde")]
    pub default_task_lifetime: Duration,
    /// Scopes requested for the application credential.
    pub application_scopes: Vec<String>,
    /// Resource requested in on-behalf-of exchanges.
    pub on_behalf_of_resource: String,
    pub workflow: WorkflowOptions,
    pub lease: LeasePolicy,
    pub log: rekey_log::Config,
}

impl Default for RekeyConfig {
    fn default() -> Self {
        Self {
            lead_time: Duration::from_secs(2 * 3600),
            external_signal_timeout: Duration::from_secs(30),
            scan_interval: Duration::from_secs(5 * 60),
            default_task_lifetime: Duration::from_secs(7 * 24 * 3600),
            application_scopes: Vec::new(),
            on_behalf_of_resource: "rekey".to_string(),
            workflow: WorkflowOptions::default(),
            lease: LeasePolicy::default(),
            log: rekey_log::Config::default(),
        }
    }
}

fn duration_var(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::Env {
        key,
        reason: e.to_string(),
    })
}

fn bool_var(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Env {
            key,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

impl RekeyConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, overlay the process environment and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        let config = config.with_env_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_env_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `REKEY_*` values from `lookup`.
    pub fn with_env_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let durations: [(&'static str, &mut Duration); 8] = [
            ("REKEY_LEAD_TIME", &mut self.lead_time),
            ("REKEY_EXTERNAL_SIGNAL_TIMEOUT", &mut self.external_signal_timeout),
            ("REKEY_SCAN_INTERVAL", &mut self.scan_interval),
            ("REKEY_DEFAULT_TASK_LIFETIME", &mut self.default_task_lifetime),
            ("REKEY_CALL_TIMEOUT", &mut self.workflow.call_timeout),
            ("REKEY_ATTEMPT_TIMEOUT", &mut self.workflow.attempt_timeout),
            ("REKEY_LEASE_ABANDON_AFTER", &mut self.lease.abandon_after),
            ("REKEY_LEASE_MAX_WAIT", &mut self.lease.max_wait),
        ];
        for (key, slot) in durations {
            if let Some(raw) = lookup(key) {
                *slot = duration_var(key, &raw)?;
            }
        }

        if let Some(raw) = lookup("REKEY_APPLICATION_SCOPES") {
            self.application_scopes = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(raw) = lookup("REKEY_OBO_RESOURCE") {
            self.on_behalf_of_resource = raw;
        }
        if let Some(raw) = lookup("REKEY_SKIP_CLEANUP") {
            self.workflow.skip_cleanup = bool_var("REKEY_SKIP_CLEANUP", &raw)?;
        }
        if let Some(raw) = lookup("REKEY_RUN_SANITY_TESTS") {
            self.workflow.run_sanity_tests = bool_var("REKEY_RUN_SANITY_TESTS", &raw)?;
        }

        self.log = self.log.with_env_lookup(&lookup);
        Ok(self)
    }

    /// Reject values that would stall the service.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval.is_zero() {
            return Err(ConfigError::Invalid("scan_interval must be positive".into()));
        }
        if self.external_signal_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "external_signal_timeout must be positive".into(),
            ));
        }
        if self.default_task_lifetime.is_zero() {
            return Err(ConfigError::Invalid(
                "default_task_lifetime must be positive".into(),
            ));
        }
        if self.lease.backoff_min > self.lease.backoff_max {
            return Err(ConfigError::Invalid(format!(
                "lease.backoff_min ({:?}) exceeds lease.backoff_max ({:?})",
                self.lease.backoff_min, self.lease.backoff_max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use pretty_assertions::assert_eq;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(RekeyConfig::from_toml_str("").unwrap(), RekeyConfig::default());
    }

    #[test]
    fn sections_parse() {
        let config = RekeyConfig::from_toml_str(
            r#"
            lead_time = "90m"
            application_scopes = ["a/.default"]

            [workflow]
            skip_cleanup = true
            call_timeout = "45s"

            [lease]
            backoff_max = "2s"

            [log]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.lead_time, Duration::from_secs(90 * 60));
        assert_eq!(config.application_scopes, vec!["a/.default".to_string()]);
        assert!(config.workflow.skip_cleanup);
        assert!(config.workflow.run_sanity_tests);
        assert_eq!(config.workflow.call_timeout, Duration::from_secs(45));
        assert_eq!(config.lease.backoff_max, Duration::from_secs(2));
        assert_eq!(config.lease.max_wait, Duration::from_secs(30));
        assert_eq!(config.log.format, rekey_log::Format::Json);
    }

    #[test]
    fn environment_overrides_file() {
        let config = RekeyConfig::from_toml_str("lead_time = \"1h\"")
            .unwrap()
            .with_env_lookup(env(&[
                ("REKEY_LEAD_TIME", "3h"),
                ("REKEY_APPLICATION_SCOPES", "x, y,,"),
                ("REKEY_SKIP_CLEANUP", "yes"),
                ("REKEY_LOG", "warn"),
            ]))
            .unwrap();
        assert_eq!(config.lead_time, Duration::from_secs(3 * 3600));
        assert_eq!(config.application_scopes, vec!["x".to_string(), "y".to_string()]);
        assert!(config.workflow.skip_cleanup);
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn bad_environment_value_names_the_key() {
        let err = RekeyConfig::default()
            .with_env_lookup(env(&[("REKEY_SCAN_INTERVAL", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "REKEY_SCAN_INTERVAL", .. }));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let err = RekeyConfig::from_toml_str(
            "[lease]\nbackoff_min = \"2s\"\nbackoff_max = \"1s\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rekey.toml");
        std::fs::write(&path, "scan_interval = \"1m\"\n").unwrap();
        let config = RekeyConfig::load(&path).unwrap();
        assert_eq!(config.scan_interval, Duration::from_secs(60));

        let missing = RekeyConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
