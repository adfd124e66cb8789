//! Compliance policy knobs.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::ScoreThresholds;

/// Local-time window in which contacts may be messaged (`start_hour` inclusive,
/// `end_hour` exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallingWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    /// Used when the contact has no known offset
    pub default_utc_offset_minutes: i32,
}

impl Default for CallingWindow {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 21,
            default_utc_offset_minutes: 0,
        }
    }
}

impl CallingWindow {
    /// Whether `now` falls inside the window for a contact at `utc_offset_minutes`.
    pub fn contains(&self, now: DateTime<Utc>, utc_offset_minutes: Option<i32>) -> bool {
        let offset = utc_offset_minutes.unwrap_or(self.default_utc_offset_minutes);
        let local = now + Duration::minutes(i64::from(offset));
        let hour = local.hour();
        hour >= self.start_hour && hour < self.end_hour
    }
}

/// Everything the gatekeeper needs to decide on a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompliancePolicy {
    pub thresholds: ScoreThresholds,
    /// Skip-trace must complete before verification
    pub require_trace: bool,
    /// Approve right after verification when the score is high-confidence
    pub auto_approve_high_confidence: bool,
    /// Upper bound on phones verified per contact
    pub max_phones_per_contact: usize,
    pub calling_window: CallingWindow,
}

impl Default for CompliancePolicy {
    fn default() -> Self {
        Self {
            thresholds: ScoreThresholds::default(),
            require_trace: true,
            auto_approve_high_confidence: true,
            max_phones_per_contact: 3,
            calling_window: CallingWindow::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_bounds() {
        let w = CallingWindow::default();
        let at = |h| Utc.with_ymd_and_hms(2026, 3, 2, h, 0, 0).unwrap();
        assert!(!w.contains(at(7), None));
        assert!(w.contains(at(8), None));
        assert!(w.contains(at(20), None));
        assert!(!w.contains(at(21), None));
    }

    #[test]
    fn test_window_uses_contact_offset() {
        let w = CallingWindow::default();
        // 15:00 UTC is 07:00 in UTC-8
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        assert!(w.contains(now, None));
        assert!(!w.contains(now, Some(-480)));
        // 02:00 UTC is 21:00 the previous day in UTC-5
        let late = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap();
        assert!(!w.contains(late, Some(-300)));
        assert!(w.contains(late - Duration::hours(1), Some(-300)));
    }
}
