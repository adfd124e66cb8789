//! Core contact types

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cartridge::{OutreachCartridge, OutreachStage};
use crate::scoring::LineType;
use crate::suppression::SuppressionReason;

/// Unique identifier for contacts
pub type ContactId = String;

/// Tenant identifier scoping all contact and compliance data
pub type TeamId = String;

static E164_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9]\d{9,14}$").expect("E164_PATTERN regex should compile"));

/// Normalize a raw phone string to `+<digits>`.
///
/// Ten-digit numbers are taken as NANP and get a `+1` prefix. Returns `None`
/// for anything that does not look like a dialable number.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let has_plus = raw.trim_start().starts_with('+');
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let candidate = match (has_plus, digits.len()) {
        (false, 10) => format!("+1{digits}"),
        (false, 11) if digits.starts_with('1') => format!("+{digits}"),
        (true, _) => format!("+{digits}"),
        _ => return None,
    };
    E164_PATTERN.is_match(&candidate).then_some(candidate)
}

/// Compliance lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LuciStatus {
    Raw,
    PendingTrace,
    Traced,
    PendingVerify,
    Verified,
    CampaignReady,
    Suppressed,
    Failed,
}

impl std::fmt::Display for LuciStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Raw => "RAW",
            Self::PendingTrace => "PENDING_TRACE",
            Self::Traced => "TRACED",
            Self::PendingVerify => "PENDING_VERIFY",
            Self::Verified => "VERIFIED",
            Self::CampaignReady => "CAMPAIGN_READY",
            Self::Suppressed => "SUPPRESSED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Input for [`crate::contact::ContactStore::ingest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    /// Caller-supplied id; a UUID is assigned when absent.
    #[serde(default)]
    pub id: Option<ContactId>,
    pub team_id: TeamId,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    /// Contact's local offset from UTC, used for calling hours.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

/// Skip-trace bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub queue_id: String,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub confidence: Option<u8>,
}

impl TraceSummary {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Outcome of verifying the contact's chosen phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneVerification {
    pub phone: String,
    pub line_type: LineType,
    pub activity_confidence: Option<u8>,
    pub valid: bool,
    pub verified_at: DateTime<Utc>,
}

/// One outreach target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id: ContactId,
    pub team_id: TeamId,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub utc_offset_minutes: Option<i32>,
    pub status: LuciStatus,
    pub trace: Option<TraceSummary>,
    pub verification: Option<PhoneVerification>,
    /// Contactability score, 0–100
    pub score: Option<u8>,
    pub suppression_reason: Option<SuppressionReason>,
    /// Present once the contact has been approved
    pub cartridge: Option<OutreachCartridge>,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContactRecord {
    pub(crate) fn new(
        id: ContactId,
        team_id: TeamId,
        phones: Vec<String>,
        emails: Vec<String>,
        utc_offset_minutes: Option<i32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            team_id,
            phones,
            emails,
            utc_offset_minutes,
            status: LuciStatus::Raw,
            trace: None,
            verification: None,
            score: None,
            suppression_reason: None,
            cartridge: None,
            last_contacted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current outreach stage, once approved.
    pub fn stage(&self) -> Option<OutreachStage> {
        self.cartridge.as_ref().map(|c| c.stage())
    }

    /// Attempts sent in the current cartridge cycle.
    pub fn attempt_count(&self) -> u32 {
        self.cartridge.as_ref().map(|c| c.attempt()).unwrap_or(0)
    }

    /// Phone to message: the verified one if known, else the first on file.
    pub fn best_phone(&self) -> Option<&str> {
        self.verification
            .as_ref()
            .map(|v| v.phone.as_str())
            .or_else(|| self.phones.first().map(String::as_str))
    }

    pub fn is_traced(&self) -> bool {
        self.trace.as_ref().is_some_and(TraceSummary::is_complete)
    }

    pub fn is_verified(&self) -> bool {
        self.verification.is_some() && self.score.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(
            normalize_phone("(415) 555-0123").as_deref(),
            Some("+14155550123")
        );
        assert_eq!(
            normalize_phone("1-415-555-0123").as_deref(),
            Some("+14155550123")
        );
        assert_eq!(
            normalize_phone("+44 20 7946 0958").as_deref(),
            Some("+442079460958")
        );
        assert_eq!(normalize_phone("555-0123"), None);
        assert_eq!(normalize_phone("not a phone"), None);
    }

    #[test]
    fn test_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&LuciStatus::CampaignReady).unwrap();
        assert_eq!(json, "\"CAMPAIGN_READY\"");
        assert_eq!(LuciStatus::PendingTrace.to_string(), "PENDING_TRACE");
    }
}
