//! Contact records and their store
//!
//! A [`ContactRecord`] is created on ingestion as `RAW` and afterwards only
//! mutated by the compliance gatekeeper (status, score, suppression) and the
//! outreach state machine (stage, attempt counter). Records are never
//! deleted.

pub mod store;
pub mod types;

pub use store::{ContactStore, SharedContactStore, StoreError, StoreResult};
pub use types::{
    normalize_phone, ContactId, ContactRecord, LuciStatus, NewContact, PhoneVerification,
    TeamId, TraceSummary,
};
