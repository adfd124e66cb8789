//! Outreach dispatcher
//!
//! Runs on every scheduler tick. For each `CAMPAIGN_READY` contact of a team
//! it asks the gatekeeper whether the contact may be messaged right now, asks
//! the cartridge for the next step, and hands `Send` steps to the worker that
//! owns the contact's stage. Sends go through the circuit breaker.
//!
//! ```text
//! tick(team) ─▶ can_contact ──denied──▶ blocked
//!                    │ allowed
//!                    ▼
//!               send_next ──▶ Wait ──▶ waited
//!                    │        Holster ─▶ holstered
//!                    ▼ Send
//!          Worker::compose ─▶ breaker ─▶ MessagingProvider
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gatekeeper::cartridge::{
    AttemptOutcome, AttemptSender, OutboundAttempt, OutreachStateMachine, ReplyIntent,
    ReplyOutcome,
};
use gatekeeper::compliance::SharedGatekeeper;
use gatekeeper::contact::LuciStatus;
use gatekeeper::error::{ErrorCode, GatekeeperError, GatekeeperResult};
use gatekeeper::providers::{SendReceipt, SharedMessagingProvider};

use crate::config::OutreachConfig;
use crate::worker::Worker;

/// Carrier-standard opt-out keywords.
const OPT_OUT_KEYWORDS: [&str; 6] = ["STOP", "STOPALL", "UNSUBSCRIBE", "CANCEL", "END", "QUIT"];

/// Map an inbound body that is exactly an opt-out keyword to [`ReplyIntent::OptOut`].
///
/// Anything else needs the external reply classifier.
pub fn keyword_intent(body: &str) -> Option<ReplyIntent> {
    let word = body.trim().trim_end_matches(['.', '!']).to_uppercase();
    OPT_OUT_KEYWORDS
        .contains(&word.as_str())
        .then_some(ReplyIntent::OptOut)
}

/// One contact the tick could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickFailure {
    pub contact_id: String,
    pub code: ErrorCode,
    pub message: String,
}

/// Tally of one dispatcher tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub team_id: String,
    pub sent: usize,
    pub waited: usize,
    pub holstered: usize,
    pub blocked: usize,
    pub failed: usize,
    /// Blocked contacts by refusal reason
    pub blocked_reasons: BTreeMap<String, usize>,
    pub errors: Vec<TickFailure>,
}

/// Drives approved contacts through their cartridges.
pub struct Dispatcher {
    gatekeeper: SharedGatekeeper,
    machine: Arc<OutreachStateMachine>,
    messenger: SharedMessagingProvider,
    config: OutreachConfig,
}

impl Dispatcher {
    pub fn new(
        gatekeeper: SharedGatekeeper,
        machine: Arc<OutreachStateMachine>,
        messenger: SharedMessagingProvider,
        config: OutreachConfig,
    ) -> Self {
        Self {
            gatekeeper,
            machine,
            messenger,
            config,
        }
    }

    pub fn config(&self) -> &OutreachConfig {
        &self.config
    }

    /// One pass over the team's campaign-ready contacts.
    ///
    /// A failure on one contact is recorded in the report and the pass
    /// continues with the next.
    pub async fn tick(&self, team_id: &str) -> GatekeeperResult<TickReport> {
        if team_id.trim().is_empty() {
            return Err(GatekeeperError::validation("teamId is required"));
        }
        let contacts = self
            .gatekeeper
            .store()
            .list_team(team_id, Some(LuciStatus::CampaignReady))?;

        let mut report = TickReport {
            team_id: team_id.to_string(),
            ..Default::default()
        };

        for record in contacts {
            let decision = match self.gatekeeper.can_contact(&record.id, team_id) {
                Ok(decision) => decision,
                Err(e) => {
                    report.record_failure(&record.id, &e);
                    continue;
                }
            };
            if let Some(reason) = decision.reason {
                debug!(contact_id = %record.id, reason = reason.code(), "contact blocked this tick");
                report.blocked += 1;
                *report
                    .blocked_reasons
                    .entry(reason.code().to_string())
                    .or_default() += 1;
                continue;
            }

            match self.machine.send_next(&record.id, team_id, self).await {
                Ok(AttemptOutcome::Sent { holstered, .. }) => {
                    report.sent += 1;
                    if holstered {
                        report.holstered += 1;
                    }
                }
                Ok(AttemptOutcome::Waited { .. }) => report.waited += 1,
                Ok(AttemptOutcome::Holstered { .. }) => report.holstered += 1,
                Err(e) => report.record_failure(&record.id, &e),
            }
        }

        info!(
            team_id = %team_id,
            sent = report.sent,
            waited = report.waited,
            holstered = report.holstered,
            blocked = report.blocked,
            failed = report.failed,
            "dispatch tick complete"
        );
        Ok(report)
    }

    /// Apply a classified inbound reply.
    pub async fn handle_inbound(
        &self,
        contact_id: &str,
        team_id: &str,
        intent: ReplyIntent,
    ) -> GatekeeperResult<ReplyOutcome> {
        let outcome = self.machine.handle_reply(contact_id, team_id, intent).await?;
        info!(
            contact_id = %contact_id,
            intent = ?intent,
            stage = ?outcome.stage,
            worker = ?outcome.stage.and_then(Worker::for_stage),
            "inbound reply handled"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl AttemptSender for Dispatcher {
    async fn send_attempt(&self, attempt: &OutboundAttempt) -> GatekeeperResult<SendReceipt> {
        let worker = Worker::for_stage(attempt.stage).ok_or_else(|| {
            GatekeeperError::validation(format!("no worker sends from stage {}", attempt.stage))
        })?;
        let from = self.config.number_for(worker).ok_or_else(|| {
            GatekeeperError::validation(format!("no sending number configured for {worker}"))
        })?;
        let body = worker.compose(attempt.tone, None);

        let service = self.messenger.id().to_string();
        let receipt = self
            .gatekeeper
            .breaker()
            .execute(&service, || self.messenger.send(&attempt.phone, from, &body))
            .await?;
        debug!(
            contact_id = %attempt.contact_id,
            worker = %worker,
            attempt = attempt.attempt,
            "message handed to provider"
        );
        Ok(receipt)
    }
}

impl TickReport {
    fn record_failure(&mut self, contact_id: &str, err: &GatekeeperError) {
        warn!(contact_id = %contact_id, error = %err, "dispatch failed for contact");
        self.failed += 1;
        self.errors.push(TickFailure {
            contact_id: contact_id.to_string(),
            code: err.code(),
            message: err.to_string(),
        });
    }
}
