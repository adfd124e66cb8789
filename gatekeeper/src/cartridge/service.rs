//! Outreach state machine service
//!
//! Applies cartridge operations to stored contacts under the per-contact
//! operation lock. The actual send is delegated to an [`AttemptSender`], so the
//! attempt is only counted once the provider has accepted the message.

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::machine::{
    CartridgeAction, CartridgeError, CartridgeStatus, TransitionTrigger, DEFAULT_MIN_GAP_HOURS,
};
use super::stage::OutreachStage;
use super::tone::ToneType;
use crate::clock::SharedClock;
use crate::contact::{ContactRecord, LuciStatus, SharedContactStore};
use crate::error::{GatekeeperError, GatekeeperResult};
use crate::providers::SendReceipt;
use crate::suppression::{SharedSuppressionRegistry, SuppressionReason};

/// Everything a sender needs to deliver one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundAttempt {
    pub contact_id: String,
    pub team_id: String,
    pub phone: String,
    pub stage: OutreachStage,
    pub attempt: u32,
    pub tone: ToneType,
}

/// Delivers an outreach attempt (the dispatcher in production).
#[async_trait]
pub trait AttemptSender: Send + Sync {
    async fn send_attempt(&self, attempt: &OutboundAttempt) -> GatekeeperResult<SendReceipt>;
}

/// Result of [`OutreachStateMachine::send_next`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Sent {
        attempt: u32,
        tone: ToneType,
        message_id: String,
        /// The attempt was the final one and the contact was holstered
        holstered: bool,
    },
    Waited {
        until: chrono::DateTime<chrono::Utc>,
    },
    Holstered {
        attempt: u32,
    },
}

/// Classified inbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum ReplyIntent {
    /// STOP or equivalent
    OptOut,
    WrongNumber,
    Interested,
    AppointmentRequested,
    NotNow,
    /// Classifier picked a stage directly
    Route { target: OutreachStage },
}

impl ReplyIntent {
    /// Stage the reply routes to; `None` for the compliance intents.
    pub fn target_stage(&self) -> Option<OutreachStage> {
        match self {
            Self::OptOut | Self::WrongNumber => None,
            Self::Interested => Some(OutreachStage::FollowUp),
            Self::AppointmentRequested => Some(OutreachStage::BookAppointment),
            Self::NotNow => Some(OutreachStage::Nurture),
            Self::Route { target } => Some(*target),
        }
    }
}

/// Result of [`OutreachStateMachine::handle_reply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyOutcome {
    pub contact_id: String,
    pub stage: Option<OutreachStage>,
    pub cartridge_status: Option<CartridgeStatus>,
    pub status: LuciStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppression: Option<SuppressionReason>,
}

impl ReplyOutcome {
    fn from_record(record: &ContactRecord, suppression: Option<SuppressionReason>) -> Self {
        Self {
            contact_id: record.id.clone(),
            stage: record.stage(),
            cartridge_status: record.cartridge.as_ref().map(|c| c.status()),
            status: record.status,
            suppression,
        }
    }
}

/// Drives stored contacts through their outreach cartridges.
#[derive(Debug, Clone)]
pub struct OutreachStateMachine {
    store: SharedContactStore,
    suppressions: SharedSuppressionRegistry,
    clock: SharedClock,
    min_gap: Duration,
}

impl OutreachStateMachine {
    pub fn new(
        store: SharedContactStore,
        suppressions: SharedSuppressionRegistry,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            suppressions,
            clock,
            min_gap: Duration::hours(DEFAULT_MIN_GAP_HOURS),
        }
    }

    /// Override the spacing between attempts
    pub fn with_min_gap(mut self, min_gap: Duration) -> Self {
        self.min_gap = min_gap;
        self
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }

    /// Explicit stage change, validated against the transition table.
    ///
    /// Moving to `opted_out` this way has the same compliance effect as a STOP
    /// reply.
    pub async fn transition(
        &self,
        contact_id: &str,
        team_id: &str,
        to: OutreachStage,
        trigger: TransitionTrigger,
        reason: Option<&str>,
    ) -> GatekeeperResult<OutreachStage> {
        let _lease = self.store.lock_contact(contact_id).await?;
        let record = self.store.get_for_team(contact_id, team_id)?;
        let cartridge = record
            .cartridge
            .as_ref()
            .ok_or_else(|| not_approved(contact_id))?;
        if !cartridge.stage().can_transition_to(to) {
            return Err(CartridgeError::InvalidTransition {
                from: cartridge.stage(),
                to,
            }
            .into());
        }

        if to == OutreachStage::OptedOut {
            self.apply_opt_out(contact_id)?;
            return Ok(to);
        }

        let now = self.clock.now();
        self.store.update(contact_id, |r| match r.cartridge.as_mut() {
            Some(c) => c.transition(to, trigger, reason, now),
            None => Err(not_approved_cartridge(contact_id)),
        })??;
        info!(contact_id = %contact_id, to = %to, trigger = ?trigger, "stage transition");
        Ok(to)
    }

    /// Next cadence step for a contact, without side effects.
    pub fn next_action(&self, contact_id: &str, team_id: &str) -> GatekeeperResult<CartridgeAction> {
        let record = self.store.get_for_team(contact_id, team_id)?;
        let cartridge = record
            .cartridge
            .as_ref()
            .ok_or_else(|| not_approved(contact_id))?;
        Ok(cartridge.next_action(self.clock.now(), self.min_gap)?)
    }

    /// Run one cadence step: send the next attempt, wait, or holster.
    ///
    /// The attempt is counted only after `sender` succeeds; a failed send
    /// leaves the cartridge untouched. Sending the final attempt holsters the
    /// contact before the lock is released.
    pub async fn send_next(
        &self,
        contact_id: &str,
        team_id: &str,
        sender: &dyn AttemptSender,
    ) -> GatekeeperResult<AttemptOutcome> {
        let _lease = self.store.lock_contact(contact_id).await?;
        let record = self.store.get_for_team(contact_id, team_id)?;
        if record.status != LuciStatus::CampaignReady {
            return Err(GatekeeperError::validation(format!(
                "contact {contact_id} is {} and cannot be messaged",
                record.status
            )));
        }
        let cartridge = record
            .cartridge
            .as_ref()
            .ok_or_else(|| not_approved(contact_id))?;

        let now = self.clock.now();
        match cartridge.next_action(now, self.min_gap)? {
            CartridgeAction::Wait { until } => Ok(AttemptOutcome::Waited { until }),
            CartridgeAction::Holster => {
                let attempt = cartridge.attempt();
                self.holster_exhausted(contact_id)?;
                Ok(AttemptOutcome::Holstered { attempt })
            }
            CartridgeAction::Send { attempt, tone } => {
                let phone = record
                    .best_phone()
                    .ok_or_else(|| {
                        GatekeeperError::validation(format!("contact {contact_id} has no phone"))
                    })?
                    .to_string();
                let outbound = OutboundAttempt {
                    contact_id: contact_id.to_string(),
                    team_id: team_id.to_string(),
                    phone,
                    stage: cartridge.stage(),
                    attempt,
                    tone,
                };

                let receipt = sender.send_attempt(&outbound).await?;

                let sent_at = self.clock.now();
                let holstered = self.store.update(contact_id, |r| -> Result<bool, CartridgeError> {
                    r.last_contacted_at = Some(sent_at);
                    let c = r
                        .cartridge
                        .as_mut()
                        .ok_or_else(|| not_approved_cartridge(contact_id))?;
                    c.record_attempt(sent_at)?;
                    if c.is_exhausted() {
                        c.holster("final attempt sent without reply", sent_at)?;
                        return Ok(true);
                    }
                    Ok(false)
                })??;

                info!(
                    contact_id = %contact_id,
                    attempt,
                    tone = %tone,
                    message_id = %receipt.message_id,
                    holstered,
                    "outreach attempt sent"
                );
                Ok(AttemptOutcome::Sent {
                    attempt,
                    tone,
                    message_id: receipt.message_id,
                    holstered,
                })
            }
        }
    }

    /// Apply a classified inbound reply.
    pub async fn handle_reply(
        &self,
        contact_id: &str,
        team_id: &str,
        intent: ReplyIntent,
    ) -> GatekeeperResult<ReplyOutcome> {
        let _lease = self.store.lock_contact(contact_id).await?;
        let record = self.store.get_for_team(contact_id, team_id)?;

        let intent = match intent {
            ReplyIntent::Route {
                target: OutreachStage::OptedOut,
            } => ReplyIntent::OptOut,
            other => other,
        };
        match intent {
            ReplyIntent::OptOut => {
                let record = self.apply_opt_out(contact_id)?;
                Ok(ReplyOutcome::from_record(
                    &record,
                    Some(SuppressionReason::OptOut),
                ))
            }
            ReplyIntent::WrongNumber => {
                let now = self.clock.now();
                self.suppressions
                    .suppress(contact_id, SuppressionReason::WrongNumber, now)?;
                let record = self.store.update(contact_id, |r| -> Result<_, CartridgeError> {
                    r.status = LuciStatus::Suppressed;
                    // A permanent reason on the record is never overwritten
                    if r.suppression_reason.map_or(true, |s| !s.is_permanent()) {
                        r.suppression_reason = Some(SuppressionReason::WrongNumber);
                    }
                    if let Some(c) = r.cartridge.as_mut() {
                        if c.stage().can_transition_to(OutreachStage::Holster) {
                            c.transition(
                                OutreachStage::Holster,
                                TransitionTrigger::Inbound,
                                Some("wrong number"),
                                now,
                            )?;
                        }
                    }
                    Ok(r.clone())
                })??;
                warn!(contact_id = %contact_id, "wrong number reported, contact holstered");
                Ok(ReplyOutcome::from_record(
                    &record,
                    Some(SuppressionReason::WrongNumber),
                ))
            }
            intent => {
                let target = intent
                    .target_stage()
                    .ok_or_else(|| GatekeeperError::validation("reply intent has no target"))?;
                if record.cartridge.is_none() {
                    return Err(not_approved(contact_id));
                }
                let now = self.clock.now();
                let record = self.store.update(contact_id, |r| -> Result<_, CartridgeError> {
                    let c = r
                        .cartridge
                        .as_mut()
                        .ok_or_else(|| not_approved_cartridge(contact_id))?;
                    c.handle_reply(target, now)?;
                    Ok(r.clone())
                })??;
                info!(contact_id = %contact_id, intent = ?intent, stage = %target, "reply routed");
                Ok(ReplyOutcome::from_record(&record, None))
            }
        }
    }

    /// Record STOP: permanent suppression plus a forced `opted_out`.
    ///
    /// Caller must hold the contact lock.
    fn apply_opt_out(&self, contact_id: &str) -> GatekeeperResult<ContactRecord> {
        let now = self.clock.now();
        self.suppressions
            .suppress(contact_id, SuppressionReason::OptOut, now)?;
        let record = self.store.update(contact_id, |r| {
            r.status = LuciStatus::Suppressed;
            r.suppression_reason = Some(SuppressionReason::OptOut);
            if let Some(c) = r.cartridge.as_mut() {
                c.opt_out(now);
            }
            r.clone()
        })?;
        info!(contact_id = %contact_id, "contact opted out");
        Ok(record)
    }

    fn holster_exhausted(&self, contact_id: &str) -> GatekeeperResult<()> {
        let now = self.clock.now();
        self.store.update(contact_id, |r| match r.cartridge.as_mut() {
            Some(c) => c.holster("attempt ceiling reached", now),
            None => Err(not_approved_cartridge(contact_id)),
        })??;
        info!(contact_id = %contact_id, "cartridge holstered");
        Ok(())
    }
}

fn not_approved_cartridge(contact_id: &str) -> CartridgeError {
    CartridgeError::NotApproved {
        contact_id: contact_id.to_string(),
    }
}

fn not_approved(contact_id: &str) -> GatekeeperError {
    not_approved_cartridge(contact_id).into()
}
