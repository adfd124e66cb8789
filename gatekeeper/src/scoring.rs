//! Contactability scoring
//!
//! Turns phone line type, verification outcome and activity confidence into a
//! 0–100 score. Everything here is a pure function of its inputs, so a
//! recheck over unchanged provider data always lands on the same score.

use serde::{Deserialize, Serialize};

/// Minimum score for `CAMPAIGN_READY`.
pub const CAMPAIGN_READY_MIN_SCORE: u8 = 60;
/// Scores at or above this take the auto-approve path.
pub const HIGH_CONFIDENCE_SCORE: u8 = 80;
/// Scores at or below this go to manual review.
pub const MANUAL_REVIEW_MAX_SCORE: u8 = 40;

const DEFAULT_BASE_SCORE: i32 = 50;
const VERIFIED_MOBILE_BONUS: i32 = 20;
const LANDLINE_PENALTY: i32 = 30;
const VOIP_PENALTY: i32 = 10;

/// Phone line classification reported by the verification provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    Mobile,
    Landline,
    Voip,
    Unknown,
}

impl LineType {
    /// Lenient parse of vendor line-type strings ("Wireless", "Non-Fixed VoIP", ...).
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        if lower.contains("voip") {
            Self::Voip
        } else if lower.contains("mobile") || lower.contains("wireless") || lower.contains("cell")
        {
            Self::Mobile
        } else if lower.contains("landline") || lower.contains("fixed") {
            Self::Landline
        } else {
            Self::Unknown
        }
    }

    /// Whether SMS can be delivered on this line.
    pub fn supports_sms(&self) -> bool {
        matches!(self, Self::Mobile | Self::Voip)
    }
}

impl std::fmt::Display for LineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mobile => write!(f, "mobile"),
            Self::Landline => write!(f, "landline"),
            Self::Voip => write!(f, "voip"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Compute the contactability score.
///
/// Base is the activity confidence (50 when absent); verified mobiles gain
/// 20, landlines lose 30, VoIP loses 10; the result is clamped to 0–100.
pub fn contactability_score(
    line_type: LineType,
    verified: bool,
    activity_confidence: Option<u8>,
) -> u8 {
    let mut score = activity_confidence
        .map(|c| i32::from(c.min(100)))
        .unwrap_or(DEFAULT_BASE_SCORE);

    match line_type {
        LineType::Mobile if verified => score += VERIFIED_MOBILE_BONUS,
        LineType::Landline => score -= LANDLINE_PENALTY,
        LineType::Voip => score -= VOIP_PENALTY,
        LineType::Mobile | LineType::Unknown => {}
    }

    score.clamp(0, 100) as u8
}

/// How a score is treated by the gatekeeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    /// ≥ high-confidence threshold: eligible for auto-approval
    HighConfidence,
    /// ≥ campaign-ready threshold
    Eligible,
    /// Above manual review but below campaign-ready
    BelowThreshold,
    /// ≤ manual review threshold
    ManualReview,
}

/// Score thresholds, configurable per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreThresholds {
    pub campaign_ready_min: u8,
    pub high_confidence: u8,
    pub manual_review_max: u8,
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            campaign_ready_min: CAMPAIGN_READY_MIN_SCORE,
            high_confidence: HIGH_CONFIDENCE_SCORE,
            manual_review_max: MANUAL_REVIEW_MAX_SCORE,
        }
    }
}

impl ScoreThresholds {
    pub fn band(&self, score: u8) -> ScoreBand {
        if score <= self.manual_review_max {
            ScoreBand::ManualReview
        } else if score >= self.high_confidence {
            ScoreBand::HighConfidence
        } else if score >= self.campaign_ready_min {
            ScoreBand::Eligible
        } else {
            ScoreBand::BelowThreshold
        }
    }

    pub fn is_eligible(&self, score: u8) -> bool {
        matches!(
            self.band(score),
            ScoreBand::HighConfidence | ScoreBand::Eligible
        )
    }
}

/// Letter grade shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContactGrade {
    A,
    B,
    C,
    D,
    F,
}

impl ContactGrade {
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => Self::A,
            60..=79 => Self::B,
            50..=59 => Self::C,
            40..=49 => Self::D,
            _ => Self::F,
        }
    }
}

/// Work-queue priority, 1 (call first) to 6.
pub fn priority_tier(score: u8) -> u8 {
    match (ContactGrade::from_score(score), score) {
        (ContactGrade::A, s) if s >= 90 => 1,
        (ContactGrade::A, _) => 2,
        (ContactGrade::B, s) if s >= 70 => 3,
        (ContactGrade::B, _) => 5,
        _ => 6,
    }
}

/// Which channel to use for a scored contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRecommendation {
    Sms,
    Call,
    Skip,
}

pub fn recommend_channel(
    line_type: LineType,
    verified: bool,
    score: u8,
    thresholds: &ScoreThresholds,
) -> ChannelRecommendation {
    if !verified || !thresholds.is_eligible(score) {
        return ChannelRecommendation::Skip;
    }
    match line_type {
        LineType::Mobile => ChannelRecommendation::Sms,
        LineType::Landline | LineType::Voip | LineType::Unknown => ChannelRecommendation::Call,
    }
}
