//! Suppression registry: permanent and reviewable do-not-contact reasons
//!
//! Entries are append-only. Clearing a reviewable entry stamps `cleared_at`
//! and keeps the row; permanent entries (`DNC`, `LITIGATOR`, `OPT_OUT`) can
//! never be cleared by anything.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::contact::ContactId;

/// Why a contact may not be messaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuppressionReason {
    /// National / internal do-not-call list
    Dnc,
    /// Known TCPA litigator
    Litigator,
    /// Contact replied STOP or equivalent
    OptOut,
    /// Number reached someone else
    WrongNumber,
    /// Number failed verification
    InvalidPhone,
    /// Held for manual compliance review
    ComplianceHold,
}

impl SuppressionReason {
    pub const ALL: [SuppressionReason; 6] = [
        Self::Dnc,
        Self::Litigator,
        Self::OptOut,
        Self::WrongNumber,
        Self::InvalidPhone,
        Self::ComplianceHold,
    ];

    /// Permanent reasons are never reversible.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Dnc | Self::Litigator | Self::OptOut)
    }

    /// Wire code used in refusal reasons.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Dnc => "dnc",
            Self::Litigator => "litigator",
            Self::OptOut => "opted_out",
            Self::WrongNumber => "wrong_number",
            Self::InvalidPhone => "invalid_phone",
            Self::ComplianceHold => "compliance_hold",
        }
    }
}

impl std::fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// One row of the suppression table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub contact_id: ContactId,
    pub reason: SuppressionReason,
    pub is_permanent: bool,
    pub created_at: DateTime<Utc>,
    /// Set when a reviewable entry is lifted; always `None` for permanent ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<DateTime<Utc>>,
}

impl SuppressionEntry {
    pub fn is_active(&self) -> bool {
        self.cleared_at.is_none()
    }
}

/// Error type for suppression operations
#[derive(Debug, thiserror::Error)]
pub enum SuppressionError {
    #[error("suppression {reason} on contact {contact_id} is permanent")]
    Permanent {
        contact_id: ContactId,
        reason: SuppressionReason,
    },

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Shared reference to SuppressionRegistry
pub type SharedSuppressionRegistry = Arc<SuppressionRegistry>;

/// Append-only suppression table keyed by contact id.
#[derive(Debug, Default)]
pub struct SuppressionRegistry {
    entries: RwLock<HashMap<ContactId, Vec<SuppressionEntry>>>,
}

impl SuppressionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this registry
    pub fn shared(self) -> SharedSuppressionRegistry {
        Arc::new(self)
    }

    /// Record `reason` against a contact.
    ///
    /// Idempotent: an already-active entry with the same reason is returned
    /// as-is instead of adding a duplicate row.
    pub fn suppress(
        &self,
        contact_id: &str,
        reason: SuppressionReason,
        now: DateTime<Utc>,
    ) -> Result<SuppressionEntry, SuppressionError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SuppressionError::LockPoisoned)?;
        let rows = entries.entry(contact_id.to_string()).or_default();

        if let Some(existing) = rows.iter().find(|e| e.reason == reason && e.is_active()) {
            return Ok(existing.clone());
        }

        let entry = SuppressionEntry {
            contact_id: contact_id.to_string(),
            reason,
            is_permanent: reason.is_permanent(),
            created_at: now,
            cleared_at: None,
        };
        rows.push(entry.clone());
        info!(contact_id = %contact_id, reason = %reason, permanent = entry.is_permanent, "suppression recorded");
        Ok(entry)
    }

    /// Lift an active reviewable entry.
    ///
    /// Returns `Ok(false)` when no active entry with that reason exists and
    /// `Err(Permanent)` when `reason` is permanent.
    pub fn clear_reviewable(
        &self,
        contact_id: &str,
        reason: SuppressionReason,
        now: DateTime<Utc>,
    ) -> Result<bool, SuppressionError> {
        if reason.is_permanent() {
            warn!(contact_id = %contact_id, reason = %reason, "refusing to clear permanent suppression");
            return Err(SuppressionError::Permanent {
                contact_id: contact_id.to_string(),
                reason,
            });
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| SuppressionError::LockPoisoned)?;
        let Some(rows) = entries.get_mut(contact_id) else {
            return Ok(false);
        };

        let mut cleared = false;
        for entry in rows
            .iter_mut()
            .filter(|e| e.reason == reason && e.is_active())
        {
            entry.cleared_at = Some(now);
            cleared = true;
        }
        if cleared {
            info!(contact_id = %contact_id, reason = %reason, "reviewable suppression cleared");
        }
        Ok(cleared)
    }

    /// Entries currently in force for a contact.
    pub fn active(&self, contact_id: &str) -> Result<Vec<SuppressionEntry>, SuppressionError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| SuppressionError::LockPoisoned)?;
        Ok(entries
            .get(contact_id)
            .map(|rows| rows.iter().filter(|e| e.is_active()).cloned().collect())
            .unwrap_or_default())
    }

    /// First permanent entry for a contact, if any.
    pub fn permanent(&self, contact_id: &str) -> Result<Option<SuppressionEntry>, SuppressionError> {
        Ok(self
            .active(contact_id)?
            .into_iter()
            .find(|e| e.is_permanent))
    }

    /// Whether any entry is in force.
    pub fn is_suppressed(&self, contact_id: &str) -> Result<bool, SuppressionError> {
        Ok(!self.active(contact_id)?.is_empty())
    }

    /// Every row ever written for a contact, cleared ones included.
    pub fn history(&self, contact_id: &str) -> Result<Vec<SuppressionEntry>, SuppressionError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| SuppressionError::LockPoisoned)?;
        Ok(entries.get(contact_id).cloned().unwrap_or_default())
    }
}
