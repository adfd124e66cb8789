//! Dispatcher tests over scenario-seeded runtimes.

use std::io::Write;

use gatekeeper::cartridge::{OutreachStage, ReplyIntent};
use gatekeeper::config::GatekeeperConfig;
use gatekeeper::contact::LuciStatus;
use gatekeeper::error::ErrorCode;
use gatekeeper::suppression::SuppressionReason;
use outreach_agents::worker::OPT_OUT_FOOTER;
use outreach_agents::{keyword_intent, OutreachConfig, Runtime, Scenario};

// ── Fixtures ────────────────────────────────────────────────────────────

// Monday 15:00 UTC; c-3 lives at UTC-8 where it is 07:00
const SCENARIO: &str = r#"{
    "now": "2026-03-02T15:00:00Z",
    "contacts": [
        { "id": "c-1", "teamId": "team-a", "phones": ["4155550123"] },
        { "id": "c-2", "teamId": "team-a", "phones": ["4155550124"] },
        { "id": "c-3", "teamId": "team-a", "phones": ["4155550125"], "utcOffsetMinutes": -480 },
        { "id": "c-9", "teamId": "team-b", "phones": ["4155550199"] }
    ],
    "verifications": {
        "4155550123": { "line_type": "mobile", "activity_confidence": 75 },
        "4155550124": { "line_type": "mobile", "activity_confidence": 75 },
        "4155550125": { "line_type": "mobile", "activity_confidence": 75 },
        "4155550199": { "line_type": "mobile", "activity_confidence": 75 }
    },
    "traces": [
        { "contact_id": "c-1", "confidence": 70 },
        { "contact_id": "c-2", "confidence": 70 },
        { "contact_id": "c-3", "confidence": 70 },
        { "contact_id": "c-9", "confidence": 70 }
    ],
    "suppressions": [{ "contactId": "c-2", "reason": "LITIGATOR" }]
}"#;

fn outreach() -> OutreachConfig {
    OutreachConfig::default()
        .with_from_number("4155550000")
        .unwrap()
}

fn runtime(outreach: OutreachConfig) -> Runtime {
    Scenario::from_json(SCENARIO)
        .unwrap()
        .build(&GatekeeperConfig::default(), outreach)
        .unwrap()
}

async fn qualified(outreach: OutreachConfig) -> Runtime {
    let rt = runtime(outreach);
    let summary = rt.gatekeeper.qualify("team-a").await.unwrap();
    assert_eq!(summary.ready, 2, "{summary:?}");
    rt
}

// ── Ticks ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn tick_sends_to_ready_contacts_and_blocks_the_rest() {
    let rt = qualified(outreach()).await;

    let report = rt.dispatcher.tick("team-a").await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.blocked, 1);
    assert_eq!(report.blocked_reasons.get("outside_calling_hours"), Some(&1));
    assert_eq!(report.failed, 0);

    let sent = rt.messenger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "+14155550123");
    assert_eq!(sent[0].from, "+14155550000");
    assert!(sent[0].body.ends_with(OPT_OUT_FOOTER));

    // Other teams are untouched
    let other = rt.gatekeeper.store().get("c-9").unwrap();
    assert_eq!(other.status, LuciStatus::Raw);
}

#[tokio::test]
async fn tick_waits_out_the_attempt_gap() {
    let rt = qualified(outreach()).await;
    rt.dispatcher.tick("team-a").await.unwrap();

    let report = rt.dispatcher.tick("team-a").await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(report.waited, 1);
    assert_eq!(rt.messenger.sent().len(), 1);
}

#[tokio::test]
async fn five_rounds_holster_the_contact() {
    let rt = qualified(outreach()).await;
    let gap = rt.dispatcher.config().min_gap();

    let mut holstered = 0;
    for _ in 0..5 {
        let report = rt.dispatcher.tick("team-a").await.unwrap();
        holstered += report.holstered;
        rt.clock.advance(gap);
    }
    assert_eq!(holstered, 1);
    assert_eq!(rt.messenger.sent().len(), 5);

    let record = rt.gatekeeper.store().get("c-1").unwrap();
    assert_eq!(record.stage(), Some(OutreachStage::Holster));
    assert_eq!(record.attempt_count(), 5);

    let report = rt.dispatcher.tick("team-a").await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(report.blocked_reasons.get("holstered"), Some(&1));
    assert_eq!(rt.messenger.sent().len(), 5);
}

#[tokio::test]
async fn failed_send_is_reported_and_not_counted() {
    let rt = qualified(outreach()).await;
    rt.messenger.set_failing(true);

    let report = rt.dispatcher.tick("team-a").await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors[0].contact_id, "c-1");
    assert_eq!(report.errors[0].code, ErrorCode::Internal);
    assert_eq!(rt.gatekeeper.store().get("c-1").unwrap().attempt_count(), 0);

    rt.messenger.set_failing(false);
    let report = rt.dispatcher.tick("team-a").await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(rt.gatekeeper.store().get("c-1").unwrap().attempt_count(), 1);
}

#[tokio::test]
async fn missing_sending_number_fails_the_contact() {
    let rt = qualified(OutreachConfig::default()).await;

    let report = rt.dispatcher.tick("team-a").await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors[0].code, ErrorCode::ValidationError);
    assert!(rt.messenger.sent().is_empty());
}

#[tokio::test]
async fn tick_requires_team() {
    let rt = runtime(outreach());
    let err = rt.dispatcher.tick("  ").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

// ── Worker lanes ────────────────────────────────────────────────────────

#[tokio::test]
async fn stage_worker_sends_from_its_lane() {
    let config = OutreachConfig::from_lookup(|var| match var {
        "OUTREACH_FROM_NUMBER" => Some("4155550000".into()),
        "GIANNA_PHONE_NUMBER" => Some("4155550001".into()),
        "SABRINA_PHONE_NUMBER" => Some("4155550003".into()),
        _ => None,
    })
    .unwrap();
    let rt = qualified(config).await;

    rt.dispatcher.tick("team-a").await.unwrap();
    let reply = rt
        .dispatcher
        .handle_inbound("c-1", "team-a", ReplyIntent::Interested)
        .await
        .unwrap();
    assert_eq!(reply.stage, Some(OutreachStage::FollowUp));

    rt.clock.advance(rt.dispatcher.config().min_gap());
    rt.dispatcher.tick("team-a").await.unwrap();

    let from: Vec<_> = rt.messenger.sent().into_iter().map(|m| m.from).collect();
    assert_eq!(from, vec!["+14155550001", "+14155550003"]);
}

// ── Inbound ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn inbound_stop_ends_outreach() {
    let rt = qualified(outreach()).await;
    rt.dispatcher.tick("team-a").await.unwrap();

    let intent = keyword_intent("Stop").unwrap();
    let reply = rt
        .dispatcher
        .handle_inbound("c-1", "team-a", intent)
        .await
        .unwrap();
    assert_eq!(reply.stage, Some(OutreachStage::OptedOut));
    assert_eq!(reply.status, LuciStatus::Suppressed);
    assert_eq!(reply.suppression, Some(SuppressionReason::OptOut));

    rt.clock.advance(rt.dispatcher.config().min_gap());
    let report = rt.dispatcher.tick("team-a").await.unwrap();
    assert_eq!(report.sent, 0);
    assert_eq!(rt.messenger.sent().len(), 1);
}

#[tokio::test]
async fn scenario_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SCENARIO.as_bytes()).unwrap();

    let scenario = Scenario::load(file.path()).unwrap();
    assert_eq!(scenario.contacts.len(), 4);
    assert_eq!(scenario.suppressions[0].reason, SuppressionReason::Litigator);
}
