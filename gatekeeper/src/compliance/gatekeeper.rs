//! LUCI compliance gatekeeper
//!
//! The single authority that turns raw, traced and verified contact data into
//! an outreach decision. `approve` is the only code path that writes
//! `CAMPAIGN_READY` and initializes a cartridge.
//!
//! ```text
//!  RAW ──trace──▶ PENDING_TRACE ──results──▶ TRACED ──verify──▶ VERIFIED
//!   │                                           ▲                 │
//!   └──(require_trace = false)──────────────────┘          approve│
//!                                                                 ▼
//!      provider error ──▶ FAILED              SUPPRESSED ◀── CAMPAIGN_READY
//! ```
//!
//! Compliance refusals are values ([`RefusalReason`]), not errors. Provider
//! calls go through the circuit breaker exactly once per call; an open
//! circuit or a timeout surfaces as `PROVIDER_UNAVAILABLE` and leaves the
//! contact's status as it was.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Serialize, Serializer};
use tracing::{error, info, warn};

use super::policy::CompliancePolicy;
use crate::cartridge::{CartridgeError, OutreachCartridge, OutreachStage};
use crate::clock::SharedClock;
use crate::contact::{
    normalize_phone, ContactRecord, LuciStatus, PhoneVerification, SharedContactStore,
    TraceSummary,
};
use crate::error::{ErrorCode, GatekeeperError, GatekeeperResult};
use crate::providers::{
    SharedTraceProvider, SharedVerificationProvider, TraceQueued, TraceRequest,
    VerificationResult,
};
use crate::resilience::SharedCircuitBreaker;
use crate::scoring::{
    contactability_score, priority_tier, recommend_channel, ChannelRecommendation, ContactGrade,
    LineType, ScoreBand,
};
use crate::suppression::{SharedSuppressionRegistry, SuppressionEntry, SuppressionReason};

/// Why a contact may not be approved or messaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefusalReason {
    /// An active suppression entry blocks the contact
    Suppressed(SuppressionReason),
    /// Score above manual review but below campaign-ready
    ScoreBelowThreshold { score: u8 },
    /// Score at or below the manual review threshold; a compliance hold was placed
    ManualReview { score: u8 },
    /// Skip-trace has not finished
    TracePending,
    /// No verification result yet
    VerificationPending,
    /// No phone on file
    NoPhone,
    /// Contact has not been approved
    NotCampaignReady,
    /// Cartridge exhausted
    Holstered,
    OutsideCallingHours,
}

impl RefusalReason {
    /// Wire reason string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Suppressed(reason) => reason.code(),
            Self::ScoreBelowThreshold { .. } => "score_below_threshold",
            Self::ManualReview { .. } => "manual_review",
            Self::TracePending => "trace_pending",
            Self::VerificationPending => "verification_pending",
            Self::NoPhone => "no_phone",
            Self::NotCampaignReady => "not_campaign_ready",
            Self::Holstered => "holstered",
            Self::OutsideCallingHours => "outside_calling_hours",
        }
    }

    /// Permanent refusals never change, whatever the caller does.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Suppressed(reason) if reason.is_permanent())
    }
}

impl std::fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suppressed(reason) => write!(f, "suppressed: {reason}"),
            Self::ScoreBelowThreshold { score } => write!(f, "score {score} below threshold"),
            Self::ManualReview { score } => write!(f, "score {score} requires manual review"),
            other => f.write_str(other.code()),
        }
    }
}

impl Serialize for RefusalReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// Result of [`ComplianceGatekeeper::approve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalOutcome {
    pub contact_id: String,
    pub success: bool,
    pub status: LuciStatus,
    pub can_contact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RefusalReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
}

impl ApprovalOutcome {
    fn refused(record: &ContactRecord, reason: RefusalReason) -> Self {
        Self {
            contact_id: record.id.clone(),
            success: false,
            status: record.status,
            can_contact: false,
            reason: Some(reason),
            score: record.score,
        }
    }
}

/// Result of [`ComplianceGatekeeper::can_contact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContactDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RefusalReason>,
}

impl ContactDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: RefusalReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Result of [`ComplianceGatekeeper::recheck`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecheckOutcome {
    pub contact_id: String,
    pub previous_score: Option<u8>,
    pub score: Option<u8>,
    pub status: LuciStatus,
    pub added: Vec<SuppressionReason>,
    pub cleared: Vec<SuppressionReason>,
    pub active: Vec<SuppressionReason>,
}

/// Result of [`ComplianceGatekeeper::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub contact_id: String,
    pub status: LuciStatus,
    pub score: Option<u8>,
    pub grade: Option<ContactGrade>,
    pub priority_tier: Option<u8>,
    pub channel: ChannelRecommendation,
    pub auto_approved: bool,
}

/// Result of [`ComplianceGatekeeper::collect_trace`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceCollection {
    pub queue_id: String,
    pub complete: bool,
    pub traced: Vec<String>,
    /// Submitted contacts the finished batch had no result for; back to `RAW`
    pub omitted: Vec<String>,
}

/// One contact the qualify sweep could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualifyFailure {
    pub contact_id: String,
    pub code: ErrorCode,
    pub message: String,
}

/// Tally of a team-wide qualify sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualifySummary {
    pub team_id: String,
    pub considered: usize,
    pub ready: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Rejections by reason code
    pub rejections: BTreeMap<String, usize>,
    pub errors: Vec<QualifyFailure>,
}

/// Outcome of bringing a contact's enrichment up to date.
enum Enrichment {
    Ready(ContactRecord),
    Pending(ContactRecord, RefusalReason),
}

/// Verification output for a contact before it is written back.
struct Lookup {
    verification: PhoneVerification,
    score: u8,
    flags: Vec<SuppressionReason>,
}

/// Shared reference to ComplianceGatekeeper
pub type SharedGatekeeper = Arc<ComplianceGatekeeper>;

/// LUCI: decides whether and when each contact may be messaged.
pub struct ComplianceGatekeeper {
    store: SharedContactStore,
    suppressions: SharedSuppressionRegistry,
    breaker: SharedCircuitBreaker,
    tracer: SharedTraceProvider,
    verifier: SharedVerificationProvider,
    clock: SharedClock,
    policy: CompliancePolicy,
}

impl ComplianceGatekeeper {
    pub fn new(
        store: SharedContactStore,
        suppressions: SharedSuppressionRegistry,
        breaker: SharedCircuitBreaker,
        tracer: SharedTraceProvider,
        verifier: SharedVerificationProvider,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            suppressions,
            breaker,
            tracer,
            verifier,
            clock,
            policy: CompliancePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CompliancePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Create a shared reference to this gatekeeper
    pub fn shared(self) -> SharedGatekeeper {
        Arc::new(self)
    }

    pub fn policy(&self) -> &CompliancePolicy {
        &self.policy
    }

    pub fn store(&self) -> &SharedContactStore {
        &self.store
    }

    pub fn suppressions(&self) -> &SharedSuppressionRegistry {
        &self.suppressions
    }

    pub fn breaker(&self) -> &SharedCircuitBreaker {
        &self.breaker
    }

    // ── Public operations ────────────────────────────────────────────────

    /// Approve a contact for outreach.
    ///
    /// Advances enrichment as far as it can, then either refuses with a
    /// reason or moves the contact to `CAMPAIGN_READY` with a fresh cartridge.
    /// Approving an already campaign-ready contact is a no-op success.
    pub async fn approve(
        &self,
        contact_id: &str,
        team_id: &str,
    ) -> GatekeeperResult<ApprovalOutcome> {
        require_id("contactId", contact_id)?;
        require_id("teamId", team_id)?;

        let _lease = self.store.lock_contact(contact_id).await?;
        let record = self.store.get_for_team(contact_id, team_id)?;
        let outcome = self.approve_locked(record).await?;

        match &outcome.reason {
            None => info!(contact_id = %contact_id, team_id = %team_id, "contact approved"),
            Some(reason) => info!(
                contact_id = %contact_id,
                team_id = %team_id,
                reason = reason.code(),
                status = %outcome.status,
                "approval refused"
            ),
        }
        Ok(outcome)
    }

    /// Whether a contact may be messaged right now. Never mutates anything.
    pub fn can_contact(&self, contact_id: &str, team_id: &str) -> GatekeeperResult<ContactDecision> {
        require_id("contactId", contact_id)?;
        require_id("teamId", team_id)?;
        let record = self.store.get_for_team(contact_id, team_id)?;
        self.evaluate(&record, self.clock.now())
    }

    /// Evaluate a record snapshot at `now`.
    ///
    /// Order: opt-out, permanent suppression, reviewable suppression,
    /// approval status, holster, calling hours.
    pub fn evaluate(
        &self,
        record: &ContactRecord,
        now: DateTime<Utc>,
    ) -> GatekeeperResult<ContactDecision> {
        let active = self.suppressions.active(&record.id)?;

        if record.stage() == Some(OutreachStage::OptedOut)
            || active.iter().any(|e| e.reason == SuppressionReason::OptOut)
        {
            return Ok(ContactDecision::deny(RefusalReason::Suppressed(
                SuppressionReason::OptOut,
            )));
        }
        if let Some(reason) = pick_reason(&active) {
            return Ok(ContactDecision::deny(RefusalReason::Suppressed(reason)));
        }
        if record.status != LuciStatus::CampaignReady {
            return Ok(ContactDecision::deny(RefusalReason::NotCampaignReady));
        }
        if record.stage() == Some(OutreachStage::Holster) {
            return Ok(ContactDecision::deny(RefusalReason::Holstered));
        }
        if !self
            .policy
            .calling_window
            .contains(now, record.utc_offset_minutes)
        {
            return Ok(ContactDecision::deny(RefusalReason::OutsideCallingHours));
        }
        Ok(ContactDecision::allow())
    }

    /// Re-run verification and suppression lookup after external data changed.
    ///
    /// New flags are recorded; reviewable suppressions the lookup no longer
    /// supports are cleared. Permanent suppressions are never touched.
    pub async fn recheck(&self, contact_id: &str) -> GatekeeperResult<RecheckOutcome> {
        require_id("contactId", contact_id)?;
        let _lease = self.store.lock_contact(contact_id).await?;
        let record = self.store.get(contact_id)?;
        let before: Vec<SuppressionReason> = self
            .suppressions
            .active(contact_id)?
            .into_iter()
            .map(|e| e.reason)
            .collect();

        if record.phones.is_empty() {
            return Ok(RecheckOutcome {
                contact_id: record.id.clone(),
                previous_score: record.score,
                score: record.score,
                status: record.status,
                added: Vec::new(),
                cleared: Vec::new(),
                active: before,
            });
        }

        let lookup = self.lookup(&record).await?;
        let now = self.clock.now();

        let mut flagged = lookup.flags.clone();
        if self.policy.thresholds.band(lookup.score) == ScoreBand::ManualReview {
            flagged.push(SuppressionReason::ComplianceHold);
        }

        let mut added = Vec::new();
        for reason in &flagged {
            if !before.contains(reason) {
                self.suppressions.suppress(contact_id, *reason, now)?;
                added.push(*reason);
            }
        }

        let mut cleared = Vec::new();
        for reason in before
            .iter()
            .filter(|r| !r.is_permanent() && !flagged.contains(r))
        {
            if self.suppressions.clear_reviewable(contact_id, *reason, now)? {
                cleared.push(*reason);
            }
        }

        let active = self.suppressions.active(contact_id)?;
        let eligible = self.policy.thresholds.is_eligible(lookup.score);
        let reason = pick_reason(&active);
        let previous_score = record.score;
        let record = self.store.update(contact_id, |r| {
            r.verification = Some(lookup.verification);
            r.score = Some(lookup.score);
            r.suppression_reason = reason;
            r.status = match (reason, r.status) {
                (Some(_), _) => LuciStatus::Suppressed,
                (None, LuciStatus::CampaignReady) if eligible => LuciStatus::CampaignReady,
                (None, LuciStatus::Raw | LuciStatus::PendingTrace) => r.status,
                (None, _) => LuciStatus::Verified,
            };
            r.clone()
        })?;

        info!(
            contact_id = %contact_id,
            score = lookup.score,
            added = added.len(),
            cleared = cleared.len(),
            status = %record.status,
            "recheck complete"
        );
        Ok(RecheckOutcome {
            contact_id: record.id,
            previous_score,
            score: record.score,
            status: record.status,
            added,
            cleared,
            active: active.into_iter().map(|e| e.reason).collect(),
        })
    }

    /// Batch sweep: run `approve` over every team contact not yet decided.
    ///
    /// Always returns a tally; per-contact errors are collected, not raised.
    pub async fn qualify(&self, team_id: &str) -> GatekeeperResult<QualifySummary> {
        require_id("teamId", team_id)?;

        if self.policy.require_trace {
            if let Err(e) = self.start_trace(team_id).await {
                warn!(team_id = %team_id, error = %e, "batch trace not started; contacts will trace individually");
            }
        }

        let candidates: Vec<ContactRecord> = self
            .store
            .list_team(team_id, None)?
            .into_iter()
            .filter(|r| !matches!(r.status, LuciStatus::CampaignReady | LuciStatus::Suppressed))
            .collect();

        let results = join_all(
            candidates
                .iter()
                .map(|record| self.approve(&record.id, team_id)),
        )
        .await;

        let mut summary = QualifySummary {
            team_id: team_id.to_string(),
            considered: candidates.len(),
            ..Default::default()
        };
        for (record, result) in candidates.iter().zip(results) {
            match result {
                Ok(outcome) if outcome.success => summary.ready += 1,
                Ok(outcome) => {
                    summary.rejected += 1;
                    let code = outcome.reason.map(|r| r.code()).unwrap_or("unknown");
                    *summary.rejections.entry(code.to_string()).or_default() += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    summary.errors.push(QualifyFailure {
                        contact_id: record.id.clone(),
                        code: e.code(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            team_id = %team_id,
            considered = summary.considered,
            ready = summary.ready,
            rejected = summary.rejected,
            failed = summary.failed,
            "qualify sweep complete"
        );
        Ok(summary)
    }

    /// Queue every `RAW` team contact for skip-trace in one batch.
    ///
    /// Returns `None` when there was nothing to trace.
    pub async fn start_trace(&self, team_id: &str) -> GatekeeperResult<Option<TraceQueued>> {
        require_id("teamId", team_id)?;
        let raw = self.store.list_team(team_id, Some(LuciStatus::Raw))?;
        self.submit_trace(raw).await
    }

    /// Poll a trace batch and merge finished results into their contacts.
    pub async fn collect_trace(&self, queue_id: &str) -> GatekeeperResult<TraceCollection> {
        require_id("queueId", queue_id)?;
        let service = self.tracer.id().to_string();
        let results = self
            .breaker
            .execute(&service, || self.tracer.get_results(queue_id))
            .await?;

        let Some(results) = results else {
            return Ok(TraceCollection {
                queue_id: queue_id.to_string(),
                complete: false,
                traced: Vec::new(),
                omitted: Vec::new(),
            });
        };

        let now = self.clock.now();
        let mut traced = Vec::new();
        for result in results {
            let merged = self.store.update(&result.contact_id, |r| {
                let on_queue = r
                    .trace
                    .as_ref()
                    .is_some_and(|t| t.queue_id == queue_id && !t.is_complete());
                if r.status != LuciStatus::PendingTrace || !on_queue {
                    return false;
                }
                for phone in result.phones.iter().filter_map(|p| normalize_phone(p)) {
                    if !r.phones.contains(&phone) {
                        r.phones.push(phone);
                    }
                }
                for email in &result.emails {
                    let email = email.trim().to_lowercase();
                    if !email.is_empty() && !r.emails.contains(&email) {
                        r.emails.push(email);
                    }
                }
                if let Some(trace) = r.trace.as_mut() {
                    trace.completed_at = Some(now);
                    trace.confidence = result.confidence;
                }
                r.status = LuciStatus::Traced;
                true
            });
            match merged {
                Ok(true) => traced.push(result.contact_id),
                Ok(false) => {}
                Err(e) => warn!(contact_id = %result.contact_id, error = %e, "trace result not merged"),
            }
        }

        let mut omitted = Vec::new();
        for contact_id in self.store.pending_on_queue(queue_id)? {
            let reset = self.store.update(&contact_id, |r| {
                let on_queue = r
                    .trace
                    .as_ref()
                    .is_some_and(|t| t.queue_id == queue_id && !t.is_complete());
                if r.status != LuciStatus::PendingTrace || !on_queue {
                    return false;
                }
                r.status = LuciStatus::Raw;
                r.trace = None;
                true
            })?;
            if reset {
                warn!(contact_id = %contact_id, queue_id = %queue_id, "trace batch returned no result; contact reset to RAW");
                omitted.push(contact_id);
            }
        }

        info!(
            queue_id = %queue_id,
            traced = traced.len(),
            omitted = omitted.len(),
            "trace results collected"
        );
        Ok(TraceCollection {
            queue_id: queue_id.to_string(),
            complete: true,
            traced,
            omitted,
        })
    }

    /// Verify a contact's phones and score it.
    ///
    /// With `auto_approve_high_confidence`, a high-confidence score is
    /// approved on the spot.
    pub async fn verify(
        &self,
        contact_id: &str,
        team_id: &str,
    ) -> GatekeeperResult<VerificationOutcome> {
        require_id("contactId", contact_id)?;
        require_id("teamId", team_id)?;
        let _lease = self.store.lock_contact(contact_id).await?;
        let record = self.store.get_for_team(contact_id, team_id)?;

        let record = if self.suppressions.permanent(contact_id)?.is_some() {
            record
        } else {
            self.verify_locked(record).await?
        };

        let mut auto_approved = false;
        let high_confidence = record
            .score
            .is_some_and(|s| self.policy.thresholds.band(s) == ScoreBand::HighConfidence);
        if self.policy.auto_approve_high_confidence
            && record.status == LuciStatus::Verified
            && high_confidence
        {
            let outcome = self.decide(record).await?;
            auto_approved = outcome.success;
            if auto_approved {
                info!(contact_id = %contact_id, "high-confidence contact auto-approved");
            }
        }

        let record = self.store.get(contact_id)?;
        let line_type = record
            .verification
            .as_ref()
            .map(|v| v.line_type)
            .unwrap_or(LineType::Unknown);
        let valid = record.verification.as_ref().is_some_and(|v| v.valid);
        Ok(VerificationOutcome {
            contact_id: record.id.clone(),
            status: record.status,
            score: record.score,
            grade: record.score.map(ContactGrade::from_score),
            priority_tier: record.score.map(priority_tier),
            channel: record.score.map_or(ChannelRecommendation::Skip, |s| {
                recommend_channel(line_type, valid, s, &self.policy.thresholds)
            }),
            auto_approved,
        })
    }

    // ── Internals (contact lock held) ────────────────────────────────────

    async fn approve_locked(&self, record: ContactRecord) -> GatekeeperResult<ApprovalOutcome> {
        if let Some(refused) = self.suppression_refusal(&record)? {
            return Ok(refused);
        }

        if record.status == LuciStatus::CampaignReady {
            let decision = self.evaluate(&record, self.clock.now())?;
            return Ok(ApprovalOutcome {
                contact_id: record.id.clone(),
                success: true,
                status: record.status,
                can_contact: decision.allowed,
                reason: None,
                score: record.score,
            });
        }

        match self.enrich(record).await? {
            Enrichment::Ready(record) => self.decide(record).await,
            Enrichment::Pending(record, reason) => Ok(ApprovalOutcome::refused(&record, reason)),
        }
    }

    /// Final approval decision over an enriched record.
    async fn decide(&self, record: ContactRecord) -> GatekeeperResult<ApprovalOutcome> {
        if let Some(refused) = self.suppression_refusal(&record)? {
            return Ok(refused);
        }

        let Some(score) = record.score else {
            return Ok(ApprovalOutcome::refused(
                &record,
                RefusalReason::VerificationPending,
            ));
        };

        let now = self.clock.now();
        match self.policy.thresholds.band(score) {
            ScoreBand::ManualReview => {
                self.suppressions
                    .suppress(&record.id, SuppressionReason::ComplianceHold, now)?;
                let record = self.mark_suppressed(&record.id, SuppressionReason::ComplianceHold)?;
                Ok(ApprovalOutcome::refused(
                    &record,
                    RefusalReason::ManualReview { score },
                ))
            }
            ScoreBand::BelowThreshold => Ok(ApprovalOutcome::refused(
                &record,
                RefusalReason::ScoreBelowThreshold { score },
            )),
            ScoreBand::Eligible | ScoreBand::HighConfidence => {
                if record.best_phone().is_none() {
                    return Ok(ApprovalOutcome::refused(&record, RefusalReason::NoPhone));
                }
                if record.stage() == Some(OutreachStage::OptedOut) {
                    let record = self.mark_suppressed(&record.id, SuppressionReason::OptOut)?;
                    return Ok(ApprovalOutcome::refused(
                        &record,
                        RefusalReason::Suppressed(SuppressionReason::OptOut),
                    ));
                }
                // Entering CAMPAIGN_READY always starts outreach at `initial`
                let record = self.store.update(&record.id, |r| -> Result<_, CartridgeError> {
                    match r.cartridge.as_mut() {
                        None => r.cartridge = Some(OutreachCartridge::new(now)),
                        Some(c) if r.status != LuciStatus::CampaignReady => c.restart(now)?,
                        Some(_) => {}
                    }
                    r.status = LuciStatus::CampaignReady;
                    r.suppression_reason = None;
                    Ok(r.clone())
                })??;
                let decision = self.evaluate(&record, now)?;
                Ok(ApprovalOutcome {
                    contact_id: record.id.clone(),
                    success: true,
                    status: record.status,
                    can_contact: decision.allowed,
                    reason: None,
                    score: Some(score),
                })
            }
        }
    }

    /// Refusal for an active suppression, marking the record `SUPPRESSED`.
    fn suppression_refusal(
        &self,
        record: &ContactRecord,
    ) -> GatekeeperResult<Option<ApprovalOutcome>> {
        let active = self.suppressions.active(&record.id)?;
        let Some(reason) = pick_reason(&active) else {
            return Ok(None);
        };
        let record = self.mark_suppressed(&record.id, reason)?;
        Ok(Some(ApprovalOutcome::refused(
            &record,
            RefusalReason::Suppressed(reason),
        )))
    }

    async fn enrich(&self, mut record: ContactRecord) -> GatekeeperResult<Enrichment> {
        loop {
            match record.status {
                LuciStatus::Raw | LuciStatus::Failed
                    if self.policy.require_trace && !record.is_traced() =>
                {
                    let previous = record.status;
                    self.submit_trace(vec![record.clone()]).await?;
                    record = self.store.get(&record.id)?;
                    if record.status == previous {
                        return Ok(Enrichment::Pending(record, RefusalReason::TracePending));
                    }
                }
                LuciStatus::PendingTrace => {
                    let Some(queue_id) = record.trace.as_ref().map(|t| t.queue_id.clone()) else {
                        return Ok(Enrichment::Pending(record, RefusalReason::TracePending));
                    };
                    if let Err(e) = self.collect_trace(&queue_id).await {
                        self.settle_after_error(&record.id, None, &e);
                        return Err(e);
                    }
                    record = self.store.get(&record.id)?;
                    // RAW here means the batch came back without this contact
                    if matches!(record.status, LuciStatus::PendingTrace | LuciStatus::Raw) {
                        return Ok(Enrichment::Pending(record, RefusalReason::TracePending));
                    }
                }
                LuciStatus::Raw
                | LuciStatus::Failed
                | LuciStatus::Traced
                | LuciStatus::PendingVerify => {
                    return Ok(Enrichment::Ready(self.verify_locked(record).await?));
                }
                LuciStatus::Verified | LuciStatus::Suppressed | LuciStatus::CampaignReady => {
                    return Ok(Enrichment::Ready(record));
                }
            }
        }
    }

    async fn submit_trace(
        &self,
        records: Vec<ContactRecord>,
    ) -> GatekeeperResult<Option<TraceQueued>> {
        if records.is_empty() {
            return Ok(None);
        }
        let requests: Vec<TraceRequest> = records
            .iter()
            .map(|r| TraceRequest {
                contact_id: r.id.clone(),
                phones: r.phones.clone(),
                emails: r.emails.clone(),
            })
            .collect();

        let service = self.tracer.id().to_string();
        let queued = match self
            .breaker
            .execute(&service, || self.tracer.trace(&requests))
            .await
        {
            Ok(queued) => queued,
            Err(e) => {
                let e = GatekeeperError::from(e);
                for record in &records {
                    self.settle_after_error(&record.id, None, &e);
                }
                return Err(e);
            }
        };

        let now = self.clock.now();
        for record in &records {
            let expected = record.status;
            let result = self.store.update(&record.id, |r| {
                if r.status == expected {
                    r.status = LuciStatus::PendingTrace;
                    r.trace = Some(TraceSummary {
                        queue_id: queued.queue_id.clone(),
                        requested_at: now,
                        completed_at: None,
                        confidence: None,
                    });
                }
            });
            if let Err(e) = result {
                warn!(contact_id = %record.id, error = %e, "could not mark contact pending trace");
            }
        }

        info!(
            queue_id = %queued.queue_id,
            records = records.len(),
            credits = queued.credits_per_record * records.len() as f64,
            "trace batch queued"
        );
        Ok(Some(queued))
    }

    async fn verify_locked(&self, record: ContactRecord) -> GatekeeperResult<ContactRecord> {
        let now = self.clock.now();
        if record.phones.is_empty() {
            self.suppressions
                .suppress(&record.id, SuppressionReason::InvalidPhone, now)?;
            return self.mark_suppressed(&record.id, SuppressionReason::InvalidPhone);
        }

        let previous = record.status;
        self.store
            .update(&record.id, |r| r.status = LuciStatus::PendingVerify)?;

        let lookup = match self.lookup(&record).await {
            Ok(lookup) => lookup,
            Err(e) => {
                self.settle_after_error(&record.id, Some(previous), &e);
                return Err(e);
            }
        };

        for reason in &lookup.flags {
            self.suppressions.suppress(&record.id, *reason, now)?;
        }
        let active = self.suppressions.active(&record.id)?;
        let reason = pick_reason(&active);
        let score = lookup.score;
        let record = self.store.update(&record.id, |r| {
            r.verification = Some(lookup.verification);
            r.score = Some(lookup.score);
            r.suppression_reason = reason;
            r.status = if reason.is_some() {
                LuciStatus::Suppressed
            } else {
                LuciStatus::Verified
            };
            r.clone()
        })?;

        info!(
            contact_id = %record.id,
            score,
            grade = ?ContactGrade::from_score(score),
            status = %record.status,
            "contact verified"
        );
        Ok(record)
    }

    /// Verify up to `max_phones_per_contact` phones and score the best one.
    async fn lookup(&self, record: &ContactRecord) -> GatekeeperResult<Lookup> {
        let service = self.verifier.id().to_string();
        let mut results: Vec<(String, VerificationResult)> = Vec::new();
        for phone in record.phones.iter().take(self.policy.max_phones_per_contact) {
            let result = self
                .breaker
                .execute(&service, || self.verifier.verify_phone(phone))
                .await?;
            results.push((phone.clone(), result));
        }

        // Valid mobiles first, then valid lines, then by activity
        let (phone, best) = results
            .iter()
            .enumerate()
            .max_by_key(|(i, (_, r))| {
                (
                    r.valid,
                    r.line_type == LineType::Mobile,
                    r.activity_confidence.unwrap_or(0),
                    Reverse(*i),
                )
            })
            .map(|(_, pair)| pair.clone())
            .ok_or_else(|| {
                GatekeeperError::validation(format!("contact {} has no phone to verify", record.id))
            })?;

        let activity = best
            .activity_confidence
            .or_else(|| record.trace.as_ref().and_then(|t| t.confidence));
        let score = contactability_score(best.line_type, best.valid, activity);

        let mut flags: Vec<SuppressionReason> = Vec::new();
        for reason in results.iter().flat_map(|(_, r)| r.flags.iter()) {
            if !flags.contains(reason) {
                flags.push(*reason);
            }
        }
        if !best.valid && !flags.contains(&SuppressionReason::InvalidPhone) {
            flags.push(SuppressionReason::InvalidPhone);
        }

        Ok(Lookup {
            verification: PhoneVerification {
                phone,
                line_type: best.line_type,
                activity_confidence: activity,
                valid: best.valid,
                verified_at: self.clock.now(),
            },
            score,
            flags,
        })
    }

    fn mark_suppressed(
        &self,
        contact_id: &str,
        reason: SuppressionReason,
    ) -> GatekeeperResult<ContactRecord> {
        Ok(self.store.update(contact_id, |r| {
            r.status = LuciStatus::Suppressed;
            r.suppression_reason = Some(reason);
            r.clone()
        })?)
    }

    /// Status bookkeeping after a failed provider call.
    ///
    /// An operation error marks the contact `FAILED`; breaker rejections and
    /// timeouts restore `restore` if given. Best-effort: a store failure here
    /// is logged and does not mask the provider error.
    fn settle_after_error(
        &self,
        contact_id: &str,
        restore: Option<LuciStatus>,
        err: &GatekeeperError,
    ) {
        let target = match err {
            GatekeeperError::Provider(e) => {
                error!(contact_id = %contact_id, provider = e.provider(), error = %e, "provider call failed");
                Some(LuciStatus::Failed)
            }
            _ => {
                warn!(contact_id = %contact_id, error = %err, "provider unavailable; status left unchanged");
                restore
            }
        };
        if let Some(status) = target {
            if let Err(e) = self.store.update(contact_id, |r| r.status = status) {
                warn!(contact_id = %contact_id, error = %e, "status update after provider error failed");
            }
        }
    }
}

/// Reason to report for a set of active entries: permanent ones win.
fn pick_reason(active: &[SuppressionEntry]) -> Option<SuppressionReason> {
    active
        .iter()
        .find(|e| e.is_permanent)
        .or_else(|| active.first())
        .map(|e| e.reason)
}

fn require_id(field: &str, value: &str) -> GatekeeperResult<()> {
    if value.trim().is_empty() {
        return Err(GatekeeperError::validation(format!("{field} is required")));
    }
    Ok(())
}
