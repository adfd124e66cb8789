//! Outreach cartridge: one contact's bounded attempt cycle.
//!
//! A cartridge is capped at [`MAX_ATTEMPTS`] sends per cycle. Silence between
//! attempts is a wait, a reply interrupts the cycle, and STOP ends it for good.
//!
//! ```text
//!            record_attempt()           attempt == 5
//!  pending ──────────────────▶ active ─────────────────▶ holstered
//!     ▲                          │
//!     │ enter live stage         │ handle_reply()
//!     └──────────────────── interrupted
//!
//!  any ── opt_out() ──▶ completed (stage opted_out, absorbing)
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::stage::OutreachStage;
use super::tone::{tone_for_attempt, ToneType};

/// Hard ceiling on attempts per cartridge cycle.
pub const MAX_ATTEMPTS: u32 = 5;

/// Default spacing between attempts.
pub const DEFAULT_MIN_GAP_HOURS: i64 = 24;

/// Errors raised by cartridge operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartridgeError {
    #[error("Invalid stage transition: {from} → {to}")]
    InvalidTransition {
        from: OutreachStage,
        to: OutreachStage,
    },

    /// Sending past the ceiling is a caller bug, not a retry condition.
    #[error("Attempt {attempt} exceeds the 5-attempt ceiling")]
    AttemptCeiling { attempt: u32 },

    #[error("No outreach can be sent in stage {stage}")]
    NotSendable { stage: OutreachStage },

    #[error("Contact {contact_id} has no outreach cartridge (not approved)")]
    NotApproved { contact_id: String },
}

/// Execution status of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartridgeStatus {
    /// Not yet started
    Pending,
    /// Attempts in flight
    Active,
    /// Waiting on an external event
    Paused,
    /// Finished; used for opt-out
    Completed,
    /// Stopped after the final attempt
    Holstered,
    /// A reply arrived
    Interrupted,
}

impl std::fmt::Display for CartridgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Holstered => write!(f, "holstered"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Who caused a stage change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    /// Cadence logic (attempt ceiling, reactivation)
    System,
    /// Classified inbound reply
    Inbound,
    /// Operator action
    Human,
    /// Compliance override (opt-out, re-approval)
    Compliance,
}

/// A single recorded stage change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: OutreachStage,
    pub to: OutreachStage,
    pub trigger: TransitionTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Created,
    Attempt,
    Reply,
    Holster,
    OptOut,
    Transition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event: AuditEvent,
    pub stage: OutreachStage,
    pub attempt: u32,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// What the cadence wants to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CartridgeAction {
    Send { attempt: u32, tone: ToneType },
    Wait { until: DateTime<Utc> },
    Holster,
}

/// Per-contact outreach state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutreachCartridge {
    stage: OutreachStage,
    attempt: u32,
    status: CartridgeStatus,
    /// 1-based count of cycles started on this contact
    cycle: u32,
    last_attempt_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    transitions: Vec<StageTransition>,
    audit: Vec<AuditEntry>,
}

impl OutreachCartridge {
    /// Fresh cartridge at `initial`, attempt 0.
    pub fn new(now: DateTime<Utc>) -> Self {
        let mut cartridge = Self {
            stage: OutreachStage::Initial,
            attempt: 0,
            status: CartridgeStatus::Pending,
            cycle: 1,
            last_attempt_at: None,
            created_at: now,
            completed_at: None,
            transitions: Vec::new(),
            audit: Vec::new(),
        };
        cartridge.log(AuditEvent::Created, "cartridge initialized", now);
        cartridge
    }

    pub fn stage(&self) -> OutreachStage {
        self.stage
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn status(&self) -> CartridgeStatus {
        self.status
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn transitions(&self) -> &[StageTransition] {
        &self.transitions
    }

    pub fn audit(&self) -> &[AuditEntry] {
        &self.audit
    }

    /// All attempts of the current cycle have been sent.
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= MAX_ATTEMPTS
    }

    /// Move to `to` if the table allows it; the stage is unchanged otherwise.
    pub fn transition(
        &mut self,
        to: OutreachStage,
        trigger: TransitionTrigger,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), CartridgeError> {
        if !self.stage.can_transition_to(to) {
            return Err(CartridgeError::InvalidTransition {
                from: self.stage,
                to,
            });
        }
        self.enter(to, trigger, reason, now);
        Ok(())
    }

    /// Decide the next cadence step at `now`.
    pub fn next_action(
        &self,
        now: DateTime<Utc>,
        min_gap: Duration,
    ) -> Result<CartridgeAction, CartridgeError> {
        if !self.stage.is_live() {
            return Err(CartridgeError::NotSendable { stage: self.stage });
        }
        if self.is_exhausted() {
            return Ok(CartridgeAction::Holster);
        }
        if let Some(last) = self.last_attempt_at {
            let until = last + min_gap;
            if now < until {
                return Ok(CartridgeAction::Wait { until });
            }
        }
        let attempt = self.attempt + 1;
        Ok(CartridgeAction::Send {
            attempt,
            tone: tone_for_attempt(attempt),
        })
    }

    /// Count a sent attempt and return the tone it carried.
    pub fn record_attempt(&mut self, now: DateTime<Utc>) -> Result<ToneType, CartridgeError> {
        if !self.stage.is_live() {
            return Err(CartridgeError::NotSendable { stage: self.stage });
        }
        if self.is_exhausted() {
            return Err(CartridgeError::AttemptCeiling {
                attempt: self.attempt + 1,
            });
        }

        self.attempt += 1;
        self.status = CartridgeStatus::Active;
        self.last_attempt_at = Some(now);
        let tone = tone_for_attempt(self.attempt);
        self.log(
            AuditEvent::Attempt,
            format!("attempt {}/{} ({tone})", self.attempt, MAX_ATTEMPTS),
            now,
        );
        Ok(tone)
    }

    /// Route a classified reply to `target`.
    ///
    /// A reply that maps to the current stage interrupts the cycle without a
    /// stage change; any other target must be in the transition table.
    pub fn handle_reply(
        &mut self,
        target: OutreachStage,
        now: DateTime<Utc>,
    ) -> Result<(), CartridgeError> {
        if target != self.stage && !self.stage.can_transition_to(target) {
            return Err(CartridgeError::InvalidTransition {
                from: self.stage,
                to: target,
            });
        }

        self.log(AuditEvent::Reply, format!("reply routed to {target}"), now);
        if target != self.stage {
            self.enter(target, TransitionTrigger::Inbound, Some("inbound reply"), now);
        }
        if self.stage.is_live() {
            self.status = CartridgeStatus::Interrupted;
        }
        Ok(())
    }

    /// Force `opted_out` from any stage. Returns `false` if already opted out.
    pub fn opt_out(&mut self, now: DateTime<Utc>) -> bool {
        if self.stage == OutreachStage::OptedOut {
            return false;
        }
        self.enter(
            OutreachStage::OptedOut,
            TransitionTrigger::Compliance,
            Some("STOP received"),
            now,
        );
        true
    }

    /// Start a fresh cycle at `initial` after the contact is approved again.
    ///
    /// Bypasses the transition table; only `opted_out` cannot be restarted.
    pub fn restart(&mut self, now: DateTime<Utc>) -> Result<(), CartridgeError> {
        if self.stage == OutreachStage::OptedOut {
            return Err(CartridgeError::InvalidTransition {
                from: self.stage,
                to: OutreachStage::Initial,
            });
        }
        self.enter(
            OutreachStage::Initial,
            TransitionTrigger::Compliance,
            Some("re-approved"),
            now,
        );
        Ok(())
    }

    /// Stop the cadence after the final attempt.
    pub fn holster(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), CartridgeError> {
        self.transition(
            OutreachStage::Holster,
            TransitionTrigger::System,
            Some(reason),
            now,
        )
    }

    fn enter(
        &mut self,
        to: OutreachStage,
        trigger: TransitionTrigger,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let from = self.stage;
        self.transitions.push(StageTransition {
            from,
            to,
            trigger,
            reason: reason.map(String::from),
            at: now,
        });
        self.stage = to;

        match to {
            OutreachStage::Holster => {
                self.status = CartridgeStatus::Holstered;
                self.completed_at = Some(now);
                self.log(AuditEvent::Holster, format!("holstered from {from}"), now);
            }
            OutreachStage::OptedOut => {
                self.status = CartridgeStatus::Completed;
                self.completed_at = Some(now);
                self.log(AuditEvent::OptOut, format!("opted out from {from}"), now);
            }
            _ => {
                // Each live stage runs its own cycle
                self.attempt = 0;
                self.status = CartridgeStatus::Pending;
                self.cycle += 1;
                self.last_attempt_at = None;
                self.completed_at = None;
                self.log(AuditEvent::Transition, format!("{from} → {to}"), now);
            }
        }

        debug!(from = %from, to = %to, trigger = ?trigger, "cartridge stage transition");
    }

    fn log(&mut self, event: AuditEvent, detail: impl Into<String>, now: DateTime<Utc>) {
        self.audit.push(AuditEntry {
            event,
            stage: self.stage,
            attempt: self.attempt,
            detail: detail.into(),
            at: now,
        });
    }
}
