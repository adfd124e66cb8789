use std::collections::BTreeMap;

use gatekeeper::contact::normalize_phone;
use serde::{Deserialize, Serialize};

use crate::worker::Worker;

/// Default spacing between two attempts of the same cartridge.
pub const DEFAULT_MIN_HOURS_BETWEEN_ATTEMPTS: u32 = 24;

/// Error type for outreach configuration
#[derive(Debug, thiserror::Error)]
pub enum OutreachConfigError {
    #[error("Invalid value {value:?} for {var}")]
    InvalidValue { var: String, value: String },
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutreachConfig {
    /// Shared sending number, used by workers without their own lane.
    pub from_number: Option<String>,
    /// Dedicated sending number per worker.
    pub lanes: BTreeMap<Worker, String>,
    /// Minimum spacing between attempts (hours).
    pub min_hours_between_attempts: u32,
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            from_number: None,
            lanes: BTreeMap::new(),
            min_hours_between_attempts: DEFAULT_MIN_HOURS_BETWEEN_ATTEMPTS,
        }
    }
}

impl OutreachConfig {
    /// Read `OUTREACH_*` and per-worker lane variables from the environment.
    pub fn from_env() -> Result<Self, OutreachConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, OutreachConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup("OUTREACH_FROM_NUMBER") {
            config.from_number = Some(phone_var("OUTREACH_FROM_NUMBER", raw)?);
        }
        if let Some(raw) = lookup("OUTREACH_MIN_HOURS_BETWEEN_ATTEMPTS") {
            config.min_hours_between_attempts =
                raw.trim()
                    .parse()
                    .map_err(|_| OutreachConfigError::InvalidValue {
                        var: "OUTREACH_MIN_HOURS_BETWEEN_ATTEMPTS".into(),
                        value: raw.clone(),
                    })?;
        }
        for worker in Worker::ALL {
            if let Some(raw) = lookup(worker.lane_env_var()) {
                config
                    .lanes
                    .insert(worker, phone_var(worker.lane_env_var(), raw)?);
            }
        }
        Ok(config)
    }

    /// Override the shared sending number.
    pub fn with_from_number(mut self, raw: &str) -> Result<Self, OutreachConfigError> {
        self.from_number = Some(phone_var("--from-number", raw.to_string())?);
        Ok(self)
    }

    pub fn with_min_hours(mut self, hours: u32) -> Self {
        self.min_hours_between_attempts = hours;
        self
    }

    /// Number `worker` sends from: its lane, else the shared number.
    pub fn number_for(&self, worker: Worker) -> Option<&str> {
        self.lanes
            .get(&worker)
            .or(self.from_number.as_ref())
            .map(String::as_str)
    }

    pub fn min_gap(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.min_hours_between_attempts))
    }
}

fn phone_var(var: &str, raw: String) -> Result<String, OutreachConfigError> {
    normalize_phone(&raw).ok_or(OutreachConfigError::InvalidValue {
        var: var.to_string(),
        value: raw,
    })
}
