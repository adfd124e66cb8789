//! LUCI compliance gatekeeper and its policy.

pub mod gatekeeper;
pub mod policy;

pub use gatekeeper::{
    ApprovalOutcome, ComplianceGatekeeper, ContactDecision, QualifyFailure, QualifySummary,
    RecheckOutcome, RefusalReason, SharedGatekeeper, TraceCollection, VerificationOutcome,
};
pub use policy::{CallingWindow, CompliancePolicy};
