//! Gatekeeper configuration
//!
//! Defaults match production policy. A TOML file can replace any part of it
//! and `LUCI_*` environment variables override individual knobs on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::compliance::CompliancePolicy;
use crate::resilience::{BreakerConfig, CircuitBreaker};

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value {value:?} for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Circuit breaker thresholds, with per-provider overrides keyed by provider id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub default: BreakerConfig,
    pub services: HashMap<String, BreakerConfig>,
}

/// Top-level gatekeeper configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    pub policy: CompliancePolicy,
    pub breaker: BreakerSettings,
}

impl GatekeeperConfig {
    /// Defaults with `LUCI_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply `LUCI_*` environment overrides.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (an environment reader in production).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let policy = &mut self.policy;
        if let Some(v) = parse_var(&lookup, "LUCI_MIN_SCORE")? {
            policy.thresholds.campaign_ready_min = v;
        }
        if let Some(v) = parse_var(&lookup, "LUCI_CALLING_START_HOUR")? {
            policy.calling_window.start_hour = v;
        }
        if let Some(v) = parse_var(&lookup, "LUCI_CALLING_END_HOUR")? {
            policy.calling_window.end_hour = v;
        }
        if let Some(v) = parse_var(&lookup, "LUCI_UTC_OFFSET_MINUTES")? {
            policy.calling_window.default_utc_offset_minutes = v;
        }
        if let Some(v) = parse_var(&lookup, "LUCI_REQUIRE_TRACE")? {
            policy.require_trace = v;
        }

        let breaker = &mut self.breaker.default;
        if let Some(v) = parse_var(&lookup, "LUCI_BREAKER_FAILURE_THRESHOLD")? {
            breaker.failure_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "LUCI_BREAKER_RESET_TIMEOUT_SECS")? {
            breaker.reset_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "LUCI_BREAKER_CALL_TIMEOUT_MS")? {
            breaker.call_timeout_ms = v;
        }
        Ok(())
    }

    /// Reject thresholds and windows that cannot work together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.policy.thresholds;
        if t.manual_review_max >= t.campaign_ready_min {
            return Err(ConfigError::Invalid(format!(
                "manual_review_max ({}) must be below campaign_ready_min ({})",
                t.manual_review_max, t.campaign_ready_min
            )));
        }
        if t.campaign_ready_min > t.high_confidence || t.high_confidence > 100 {
            return Err(ConfigError::Invalid(format!(
                "thresholds must satisfy campaign_ready_min ({}) <= high_confidence ({}) <= 100",
                t.campaign_ready_min, t.high_confidence
            )));
        }

        let w = &self.policy.calling_window;
        if w.start_hour >= w.end_hour || w.end_hour > 24 {
            return Err(ConfigError::Invalid(format!(
                "calling window {}..{} is empty or exceeds 24h",
                w.start_hour, w.end_hour
            )));
        }
        if w.default_utc_offset_minutes.abs() > 14 * 60 {
            return Err(ConfigError::Invalid(format!(
                "utc offset {} minutes is out of range",
                w.default_utc_offset_minutes
            )));
        }
        if self.policy.max_phones_per_contact == 0 {
            return Err(ConfigError::Invalid(
                "max_phones_per_contact must be at least 1".into(),
            ));
        }

        for (service, breaker) in std::iter::once(("default", &self.breaker.default)).chain(
            self.breaker
                .services
                .iter()
                .map(|(name, cfg)| (name.as_str(), cfg)),
        ) {
            if breaker.failure_threshold == 0
                || breaker.half_open_success_threshold == 0
                || breaker.call_timeout_ms == 0
            {
                return Err(ConfigError::Invalid(format!(
                    "breaker config for '{service}' needs non-zero thresholds and timeout"
                )));
            }
        }
        Ok(())
    }

    /// Build a circuit breaker carrying the default and per-service settings.
    pub fn build_breaker(&self, clock: SharedClock) -> CircuitBreaker {
        self.breaker.services.iter().fold(
            CircuitBreaker::new(self.breaker.default.clone(), clock),
            |breaker, (service, config)| breaker.with_service_config(service.clone(), config.clone()),
        )
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value: raw,
        })
}
