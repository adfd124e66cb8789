//! JSON scenario fixtures
//!
//! A scenario seeds an in-memory deployment: contacts, canned provider
//! answers and pre-existing suppressions, plus the instant the clock starts
//! at. The CLI and the integration tests build their runtime from one.
//!
//! ```json
//! {
//!   "now": "2026-03-02T15:00:00Z",
//!   "contacts": [{ "id": "c-1", "teamId": "team-a", "phones": ["4155550123"] }],
//!   "verifications": { "4155550123": { "line_type": "mobile", "activity_confidence": 75 } },
//!   "traces": [{ "contact_id": "c-1", "confidence": 70 }],
//!   "suppressions": [{ "contactId": "c-9", "reason": "DNC" }]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use gatekeeper::cartridge::OutreachStateMachine;
use gatekeeper::clock::{Clock, ManualClock};
use gatekeeper::compliance::{ComplianceGatekeeper, SharedGatekeeper};
use gatekeeper::config::GatekeeperConfig;
use gatekeeper::contact::{ContactStore, NewContact};
use gatekeeper::error::GatekeeperError;
use gatekeeper::providers::{
    RecordingMessenger, StaticTraceProvider, StaticVerificationProvider, TraceResult,
    VerificationResult,
};
use gatekeeper::suppression::{SuppressionReason, SuppressionRegistry};

use crate::config::OutreachConfig;
use crate::dispatcher::Dispatcher;

pub const TRACE_PROVIDER_ID: &str = "tracerfy";
pub const VERIFICATION_PROVIDER_ID: &str = "trestle";
pub const MESSAGING_PROVIDER_ID: &str = "signalhouse";

/// Error type for scenario loading and seeding
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to seed scenario: {0}")]
    Seed(#[from] GatekeeperError),
}

/// A suppression present before the scenario starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedSuppression {
    pub contact_id: String,
    pub reason: SuppressionReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scenario {
    /// Clock start; the current time when absent
    pub now: Option<DateTime<Utc>>,
    pub contacts: Vec<NewContact>,
    /// Verification answers keyed by phone
    pub verifications: BTreeMap<String, VerificationResult>,
    pub traces: Vec<TraceResult>,
    /// Polls a trace batch needs before results are ready
    pub trace_ready_after_polls: u32,
    pub suppressions: Vec<SeedSuppression>,
}

/// Everything a scenario run needs, wired together.
pub struct Runtime {
    pub clock: Arc<ManualClock>,
    pub gatekeeper: SharedGatekeeper,
    pub machine: Arc<OutreachStateMachine>,
    pub dispatcher: Dispatcher,
    pub messenger: Arc<RecordingMessenger>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Build an in-memory deployment seeded with this scenario.
    pub fn build(
        &self,
        config: &GatekeeperConfig,
        outreach: OutreachConfig,
    ) -> Result<Runtime, ScenarioError> {
        let clock = ManualClock::shared(self.now.unwrap_or_else(Utc::now));
        let store = ContactStore::new(clock.clone()).shared();
        let suppressions = SuppressionRegistry::new().shared();
        let breaker = config.build_breaker(clock.clone()).shared();

        let tracer = self.traces.iter().cloned().fold(
            StaticTraceProvider::new(TRACE_PROVIDER_ID)
                .with_polls_until_ready(self.trace_ready_after_polls),
            StaticTraceProvider::with_result,
        );
        let verifier = self.verifications.iter().fold(
            StaticVerificationProvider::new(VERIFICATION_PROVIDER_ID),
            |v, (phone, result)| v.with_result(phone, result.clone()),
        );
        let messenger = Arc::new(RecordingMessenger::new(MESSAGING_PROVIDER_ID));

        let gatekeeper = ComplianceGatekeeper::new(
            store.clone(),
            suppressions.clone(),
            breaker,
            Arc::new(tracer),
            Arc::new(verifier),
            clock.clone(),
        )
        .with_policy(config.policy.clone())
        .shared();
        let machine = Arc::new(
            OutreachStateMachine::new(store.clone(), suppressions.clone(), clock.clone())
                .with_min_gap(outreach.min_gap()),
        );
        let dispatcher = Dispatcher::new(
            gatekeeper.clone(),
            machine.clone(),
            messenger.clone(),
            outreach,
        );

        for contact in &self.contacts {
            store.ingest(contact.clone()).map_err(GatekeeperError::from)?;
        }
        let now = clock.now();
        for seed in &self.suppressions {
            suppressions
                .suppress(&seed.contact_id, seed.reason, now)
                .map_err(GatekeeperError::from)?;
        }

        info!(
            contacts = self.contacts.len(),
            suppressions = self.suppressions.len(),
            start = %now,
            "scenario loaded"
        );
        Ok(Runtime {
            clock,
            gatekeeper,
            machine,
            dispatcher,
            messenger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "now": "2026-03-02T15:00:00Z",
        "contacts": [
            { "id": "c-1", "teamId": "team-a", "phones": ["4155550123"] },
            { "id": "c-2", "teamId": "team-a", "phones": ["4155550100"] }
        ],
        "verifications": {
            "4155550123": { "line_type": "mobile", "activity_confidence": 75 }
        },
        "traces": [{ "contact_id": "c-1", "confidence": 70 }],
        "suppressions": [{ "contactId": "c-2", "reason": "LITIGATOR" }]
    }"#;

    #[test]
    fn test_parse_and_seed() {
        let scenario = Scenario::from_json(FIXTURE).unwrap();
        assert_eq!(scenario.contacts.len(), 2);
        assert!(scenario.verifications["4155550123"].valid);

        let runtime = scenario
            .build(&GatekeeperConfig::default(), OutreachConfig::default())
            .unwrap();
        assert_eq!(runtime.gatekeeper.store().len(), 2);
        assert_eq!(
            runtime.clock.now().to_rfc3339(),
            "2026-03-02T15:00:00+00:00"
        );
        assert!(runtime
            .gatekeeper
            .suppressions()
            .permanent("c-2")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_bad_phone_fails_seeding() {
        let scenario = Scenario::from_json(
            r#"{ "contacts": [{ "id": "c-1", "teamId": "team-a", "phones": ["12"] }] }"#,
        )
        .unwrap();
        let err = scenario
            .build(&GatekeeperConfig::default(), OutreachConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ScenarioError::Seed(_)));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            Scenario::from_json("{ \"contacts\": 3 }"),
            Err(ScenarioError::Parse(_))
        ));
    }
}
