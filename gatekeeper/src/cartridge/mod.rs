//! Outreach cartridge state machine
//!
//! Stages, tone escalation, the per-contact cartridge and the service that
//! applies cartridge operations to stored contacts.

pub mod machine;
pub mod service;
pub mod stage;
pub mod tone;

pub use machine::{
    AuditEntry, AuditEvent, CartridgeAction, CartridgeError, CartridgeStatus, OutreachCartridge,
    StageTransition, TransitionTrigger, DEFAULT_MIN_GAP_HOURS, MAX_ATTEMPTS,
};
pub use service::{
    AttemptOutcome, AttemptSender, OutboundAttempt, OutreachStateMachine, ReplyIntent,
    ReplyOutcome,
};
pub use stage::{lead_status_after, stage_for_lead_status, LeadStatus, OutreachStage};
pub use tone::{tone_for_attempt, ToneType, TONE_SEQUENCE};
