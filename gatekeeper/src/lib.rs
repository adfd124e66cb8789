//! LUCI Compliance Gatekeeper Library
//!
//! This library provides:
//! - The compliance gatekeeper that decides whether a contact may be messaged
//! - The outreach cartridge state machine bounding every contact to five attempts
//! - Contactability scoring and the suppression registry
//! - A per-service circuit breaker around every external provider call
//!
//! # Components
//!
//! ## Gatekeeper
//! - `approve`: enrich, score and either refuse or move a contact to `CAMPAIGN_READY`
//! - `can_contact`: read-only eligibility check, calling hours included
//! - `recheck`: re-run verification after external data changed
//! - `qualify`: team-wide batch sweep
//!
//! ## Outreach
//! - `OutreachCartridge`: stage, attempt counter, tone escalation, audit trail
//! - `OutreachStateMachine`: applies cartridge operations to stored contacts
//!
//! ## Resilience
//! - `CircuitBreaker`: `closed → open → half_open → closed` per provider id
//!
//! # Data flow
//!
//! ```text
//!  NewContact ──ingest──▶ ContactStore ◀──────────────────────────┐
//!                              │                                  │
//!                        ComplianceGatekeeper ──▶ CircuitBreaker ──▶ trace / verify
//!                              │ CAMPAIGN_READY + cartridge
//!                        OutreachStateMachine ──▶ AttemptSender ──▶ messaging
//! ```

pub mod api;
pub mod cartridge;
pub mod clock;
pub mod compliance;
pub mod config;
pub mod contact;
pub mod error;
pub mod providers;
pub mod resilience;
pub mod scoring;
pub mod suppression;

pub use cartridge::{
    CartridgeAction, CartridgeError, OutreachCartridge, OutreachStage, OutreachStateMachine,
    ReplyIntent, ToneType,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use compliance::{
    ApprovalOutcome, ComplianceGatekeeper, CompliancePolicy, ContactDecision, RefusalReason,
    SharedGatekeeper,
};
pub use config::{ConfigError, GatekeeperConfig};
pub use contact::{ContactRecord, ContactStore, LuciStatus, NewContact, SharedContactStore};
pub use error::{ErrorCode, GatekeeperError, GatekeeperResult, StructuredError};
pub use resilience::{CircuitBreaker, CircuitState, SharedCircuitBreaker};
pub use scoring::{contactability_score, LineType, ScoreThresholds};
pub use suppression::{SuppressionReason, SuppressionRegistry};
