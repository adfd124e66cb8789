//! Lifecycle tests: a contact from ingestion through approval, the full
//! five-attempt cartridge, holster and STOP.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use futures::future::join_all;

use gatekeeper::cartridge::{
    AttemptOutcome, AttemptSender, OutboundAttempt, OutreachStage, OutreachStateMachine,
    ReplyIntent, ToneType,
};
use gatekeeper::clock::{Clock, ManualClock};
use gatekeeper::compliance::{ComplianceGatekeeper, RefusalReason};
use gatekeeper::contact::{ContactStore, LuciStatus, NewContact};
use gatekeeper::error::{ErrorCode, GatekeeperResult};
use gatekeeper::providers::{
    SendReceipt, StaticTraceProvider, StaticVerificationProvider, TraceResult, VerificationResult,
};
use gatekeeper::resilience::{BreakerConfig, CircuitBreaker};
use gatekeeper::scoring::LineType;
use gatekeeper::suppression::{SuppressionError, SuppressionReason, SuppressionRegistry};

// ── Fixtures ────────────────────────────────────────────────────────────

const PHONE: &str = "4155550123";

struct Harness {
    clock: Arc<ManualClock>,
    verifier: Arc<StaticVerificationProvider>,
    gatekeeper: Arc<ComplianceGatekeeper>,
    machine: OutreachStateMachine,
}

fn mobile(confidence: u8) -> VerificationResult {
    VerificationResult {
        line_type: LineType::Mobile,
        activity_confidence: Some(confidence),
        valid: true,
        flags: vec![],
    }
}

fn harness(verification: VerificationResult) -> Harness {
    // Monday 15:00 UTC: inside calling hours
    let clock = ManualClock::shared(Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap());
    let store = ContactStore::new(clock.clone()).shared();
    let suppressions = SuppressionRegistry::new().shared();
    let breaker = CircuitBreaker::new(BreakerConfig::default(), clock.clone()).shared();
    let tracer = StaticTraceProvider::new("tracerfy").with_result(TraceResult {
        contact_id: "c-1".into(),
        phones: vec![PHONE.into()],
        emails: vec!["Owner@Example.com".into()],
        confidence: Some(70),
    });
    let verifier = Arc::new(StaticVerificationProvider::new("trestle").with_result(PHONE, verification));

    let gatekeeper = ComplianceGatekeeper::new(
        store.clone(),
        suppressions.clone(),
        breaker,
        Arc::new(tracer),
        verifier.clone(),
        clock.clone(),
    )
    .shared();
    let machine = OutreachStateMachine::new(store, suppressions, clock.clone());

    gatekeeper
        .store()
        .ingest(NewContact {
            id: Some("c-1".into()),
            team_id: "team-a".into(),
            phones: vec![PHONE.into()],
            ..Default::default()
        })
        .unwrap();

    Harness {
        clock,
        verifier,
        gatekeeper,
        machine,
    }
}

/// Records every attempt handed to it.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<OutboundAttempt>>,
}

#[async_trait]
impl AttemptSender for RecordingSender {
    async fn send_attempt(&self, attempt: &OutboundAttempt) -> GatekeeperResult<SendReceipt> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(attempt.clone());
        Ok(SendReceipt {
            message_id: format!("msg-{}", sent.len()),
            status: "queued".into(),
        })
    }
}

// ── Full lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn lifecycle_approve_five_attempts_holster_then_stop() {
    let h = harness(mobile(75));

    let outcome = h.gatekeeper.approve("c-1", "team-a").await.unwrap();
    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.status, LuciStatus::CampaignReady);
    assert_eq!(outcome.score, Some(95));
    assert!(outcome.can_contact);

    let record = h.gatekeeper.store().get("c-1").unwrap();
    assert_eq!(record.stage(), Some(OutreachStage::Initial));
    assert_eq!(record.attempt_count(), 0);
    assert!(record.is_traced());
    assert_eq!(record.emails, vec!["owner@example.com".to_string()]);

    let sender = RecordingSender::default();
    let expected_tones = [
        ToneType::Authority,
        ToneType::Curiosity,
        ToneType::Direct,
        ToneType::Humor,
        ToneType::Final,
    ];
    for (i, expected) in expected_tones.iter().enumerate() {
        let result = h.machine.send_next("c-1", "team-a", &sender).await.unwrap();
        match result {
            AttemptOutcome::Sent {
                attempt,
                tone,
                holstered,
                ..
            } => {
                assert_eq!(attempt, i as u32 + 1);
                assert_eq!(tone, *expected);
                assert_eq!(holstered, i == 4);
            }
            other => panic!("attempt {} did not send: {other:?}", i + 1),
        }
        h.clock.advance(Duration::hours(24));
    }

    let record = h.gatekeeper.store().get("c-1").unwrap();
    assert_eq!(record.stage(), Some(OutreachStage::Holster));
    assert_eq!(record.attempt_count(), 5);
    assert_eq!(sender.sent.lock().unwrap().len(), 5);

    // No sixth attempt
    let err = h.machine.send_next("c-1", "team-a", &sender).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidTransition);
    assert_eq!(sender.sent.lock().unwrap().len(), 5);

    let decision = h.gatekeeper.can_contact("c-1", "team-a").unwrap();
    assert_eq!(decision.reason, Some(RefusalReason::Holstered));

    // STOP from holster
    let reply = h
        .machine
        .handle_reply("c-1", "team-a", ReplyIntent::OptOut)
        .await
        .unwrap();
    assert_eq!(reply.stage, Some(OutreachStage::OptedOut));

    let decision = h.gatekeeper.can_contact("c-1", "team-a").unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason.map(|r| r.code()), Some("opted_out"));

    let again = h.gatekeeper.approve("c-1", "team-a").await.unwrap();
    assert!(!again.success);
    assert_eq!(
        again.reason,
        Some(RefusalReason::Suppressed(SuppressionReason::OptOut))
    );
}

#[tokio::test]
async fn lifecycle_interested_reply_interrupts_cadence() {
    let h = harness(mobile(75));
    h.gatekeeper.approve("c-1", "team-a").await.unwrap();
    let sender = RecordingSender::default();
    h.machine.send_next("c-1", "team-a", &sender).await.unwrap();

    let reply = h
        .machine
        .handle_reply("c-1", "team-a", ReplyIntent::Interested)
        .await
        .unwrap();
    assert_eq!(reply.stage, Some(OutreachStage::FollowUp));

    let record = h.gatekeeper.store().get("c-1").unwrap();
    assert_eq!(record.attempt_count(), 0);
    assert!(h.gatekeeper.can_contact("c-1", "team-a").unwrap().allowed);
}

// ── Approval idempotence ────────────────────────────────────────────────

#[tokio::test]
async fn approve_twice_keeps_cartridge() {
    let h = harness(mobile(75));
    h.gatekeeper.approve("c-1", "team-a").await.unwrap();

    let sender = RecordingSender::default();
    h.machine.send_next("c-1", "team-a", &sender).await.unwrap();
    let before = h.gatekeeper.store().get("c-1").unwrap();

    let second = h.gatekeeper.approve("c-1", "team-a").await.unwrap();
    assert!(second.success);
    assert_eq!(second.status, LuciStatus::CampaignReady);

    let after = h.gatekeeper.store().get("c-1").unwrap();
    assert_eq!(after.attempt_count(), 1);
    assert_eq!(
        after.cartridge.as_ref().map(|c| c.created_at()),
        before.cartridge.as_ref().map(|c| c.created_at())
    );
    assert_eq!(h.verifier.calls(), 1);
}

#[tokio::test]
async fn concurrent_approvals_verify_once() {
    let h = harness(mobile(75));

    let results = join_all((0..8).map(|_| h.gatekeeper.approve("c-1", "team-a"))).await;
    for result in results {
        let outcome = result.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.status, LuciStatus::CampaignReady);
    }

    assert_eq!(h.verifier.calls(), 1);
    let record = h.gatekeeper.store().get("c-1").unwrap();
    assert_eq!(record.stage(), Some(OutreachStage::Initial));
    assert_eq!(record.cartridge.as_ref().map(|c| c.cycle()), Some(1));
}

// ── Permanent suppression ───────────────────────────────────────────────

#[tokio::test]
async fn permanent_suppression_survives_recheck() {
    let h = harness(mobile(75));
    let now = h.clock.now();
    h.gatekeeper
        .suppressions()
        .suppress("c-1", SuppressionReason::Dnc, now)
        .unwrap();

    let outcome = h.gatekeeper.approve("c-1", "team-a").await.unwrap();
    assert!(!outcome.success);
    assert_eq!(
        outcome.reason,
        Some(RefusalReason::Suppressed(SuppressionReason::Dnc))
    );
    assert_eq!(outcome.status, LuciStatus::Suppressed);
    assert_eq!(h.verifier.calls(), 0);

    // Clean verification data does not lift it
    let recheck = h.gatekeeper.recheck("c-1").await.unwrap();
    assert_eq!(recheck.score, Some(95));
    assert!(recheck.cleared.is_empty());
    assert!(recheck.active.contains(&SuppressionReason::Dnc));
    assert_eq!(recheck.status, LuciStatus::Suppressed);

    let err = h
        .gatekeeper
        .suppressions()
        .clear_reviewable("c-1", SuppressionReason::Dnc, now)
        .unwrap_err();
    assert!(matches!(err, SuppressionError::Permanent { .. }));

    let decision = h.gatekeeper.can_contact("c-1", "team-a").unwrap();
    assert_eq!(decision.reason.map(|r| r.code()), Some("dnc"));
}

#[tokio::test]
async fn wrong_number_cleared_by_recheck_then_reapproved() {
    let h = harness(mobile(75));
    h.gatekeeper.approve("c-1", "team-a").await.unwrap();

    let reply = h
        .machine
        .handle_reply("c-1", "team-a", ReplyIntent::WrongNumber)
        .await
        .unwrap();
    assert_eq!(reply.status, LuciStatus::Suppressed);
    assert_eq!(reply.stage, Some(OutreachStage::Holster));

    let recheck = h.gatekeeper.recheck("c-1").await.unwrap();
    assert_eq!(recheck.cleared, vec![SuppressionReason::WrongNumber]);
    assert_eq!(recheck.status, LuciStatus::Verified);

    let outcome = h.gatekeeper.approve("c-1", "team-a").await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.status, LuciStatus::CampaignReady);
    assert!(outcome.can_contact);

    // Re-approval restarts outreach from the top
    let record = h.gatekeeper.store().get("c-1").unwrap();
    assert_eq!(record.stage(), Some(OutreachStage::Initial));
    assert_eq!(record.attempt_count(), 0);
    assert_eq!(record.cartridge.as_ref().map(|c| c.cycle()), Some(2));
    assert!(h.gatekeeper.can_contact("c-1", "team-a").unwrap().allowed);

    let sender = RecordingSender::default();
    let sent = h.machine.send_next("c-1", "team-a", &sender).await.unwrap();
    assert!(matches!(
        sent,
        AttemptOutcome::Sent {
            attempt: 1,
            tone: ToneType::Authority,
            ..
        }
    ));
}

#[tokio::test]
async fn opted_out_contact_is_never_reapproved() {
    let h = harness(mobile(75));
    h.gatekeeper.approve("c-1", "team-a").await.unwrap();
    h.machine
        .handle_reply("c-1", "team-a", ReplyIntent::OptOut)
        .await
        .unwrap();

    let outcome = h.gatekeeper.approve("c-1", "team-a").await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.status, LuciStatus::Suppressed);
    assert_eq!(
        outcome.reason,
        Some(RefusalReason::Suppressed(SuppressionReason::OptOut))
    );
    let record = h.gatekeeper.store().get("c-1").unwrap();
    assert_eq!(record.stage(), Some(OutreachStage::OptedOut));
}

// ── Batch trace ─────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_trace_moves_raw_contacts_to_traced() {
    let h = harness(mobile(75));
    h.gatekeeper
        .store()
        .ingest(NewContact {
            id: Some("c-2".into()),
            team_id: "team-a".into(),
            ..Default::default()
        })
        .unwrap();

    let queued = h
        .gatekeeper
        .start_trace("team-a")
        .await
        .unwrap()
        .expect("raw contacts were queued");
    for id in ["c-1", "c-2"] {
        assert_eq!(
            h.gatekeeper.store().get(id).unwrap().status,
            LuciStatus::PendingTrace
        );
    }
    assert!(h.gatekeeper.start_trace("team-a").await.unwrap().is_none());

    let collected = h.gatekeeper.collect_trace(&queued.queue_id).await.unwrap();
    assert!(collected.complete);
    assert_eq!(collected.traced.len(), 2);
    assert_eq!(
        h.gatekeeper.store().get("c-2").unwrap().status,
        LuciStatus::Traced
    );

    // c-2 has no phone: verification suppresses it
    let outcome = h.gatekeeper.approve("c-2", "team-a").await.unwrap();
    assert_eq!(
        outcome.reason,
        Some(RefusalReason::Suppressed(SuppressionReason::InvalidPhone))
    );
}
