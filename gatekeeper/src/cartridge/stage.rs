//! Outreach stages and the fixed transition table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outreach context a contact is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachStage {
    /// First contact
    Initial,
    /// Re-engagement after silence
    Retarget,
    /// Low-pressure follow-up
    Nudge,
    /// Positive signal received
    FollowUp,
    /// Calendar booking
    BookAppointment,
    /// Long-term relationship
    Nurture,
    /// Stopped after exhausting attempts; can be reactivated
    Holster,
    /// STOP received; absorbing
    OptedOut,
}

impl OutreachStage {
    pub const ALL: [OutreachStage; 8] = [
        Self::Initial,
        Self::Retarget,
        Self::Nudge,
        Self::FollowUp,
        Self::BookAppointment,
        Self::Nurture,
        Self::Holster,
        Self::OptedOut,
    ];

    /// Stages reachable from this one.
    ///
    /// ```text
    /// initial          → follow_up | retarget | holster | opted_out
    /// retarget         → follow_up | nudge | holster | opted_out
    /// nudge            → follow_up | nurture | holster | opted_out
    /// follow_up        → book_appointment | nurture | holster | opted_out
    /// book_appointment → nurture | holster | opted_out
    /// nurture          → initial | holster | opted_out
    /// holster          → initial | opted_out
    /// opted_out        → (none)
    /// ```
    pub fn allowed_transitions(self) -> &'static [OutreachStage] {
        use OutreachStage::*;
        match self {
            Initial => &[FollowUp, Retarget, Holster, OptedOut],
            Retarget => &[FollowUp, Nudge, Holster, OptedOut],
            Nudge => &[FollowUp, Nurture, Holster, OptedOut],
            FollowUp => &[BookAppointment, Nurture, Holster, OptedOut],
            BookAppointment => &[Nurture, Holster, OptedOut],
            Nurture => &[Initial, Holster, OptedOut],
            Holster => &[Initial, OptedOut],
            OptedOut => &[],
        }
    }

    pub fn can_transition_to(self, to: OutreachStage) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Only `opted_out` is absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::OptedOut)
    }

    /// Whether outreach attempts may be sent in this stage.
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Holster | Self::OptedOut)
    }
}

impl fmt::Display for OutreachStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Retarget => write!(f, "retarget"),
            Self::Nudge => write!(f, "nudge"),
            Self::FollowUp => write!(f, "follow_up"),
            Self::BookAppointment => write!(f, "book_appointment"),
            Self::Nurture => write!(f, "nurture"),
            Self::Holster => write!(f, "holster"),
            Self::OptedOut => write!(f, "opted_out"),
        }
    }
}

/// Sales-funnel status kept by the CRM side, complementary to the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Enriching,
    Ready,
    Contacted,
    Responded,
    Qualified,
    Converted,
    Dead,
}

/// Silence longer than this sends a contacted lead to holster.
const HOLSTER_AFTER_SILENCE_DAYS: u32 = 14;
/// Silence longer than this retargets a contacted lead.
const RETARGET_AFTER_SILENCE_DAYS: u32 = 7;

/// Outreach stage for a funnel status, or `None` when the lead should not be
/// messaged at all. An opt-out always wins.
pub fn stage_for_lead_status(
    status: LeadStatus,
    silence_days: Option<u32>,
    has_opted_out: bool,
) -> Option<OutreachStage> {
    if has_opted_out {
        return Some(OutreachStage::OptedOut);
    }

    match status {
        LeadStatus::New | LeadStatus::Enriching | LeadStatus::Converted => None,
        LeadStatus::Ready => Some(OutreachStage::Initial),
        LeadStatus::Contacted => match silence_days.unwrap_or(0) {
            d if d > HOLSTER_AFTER_SILENCE_DAYS => Some(OutreachStage::Holster),
            d if d > RETARGET_AFTER_SILENCE_DAYS => Some(OutreachStage::Retarget),
            _ => Some(OutreachStage::Nudge),
        },
        LeadStatus::Responded => Some(OutreachStage::FollowUp),
        LeadStatus::Qualified => Some(OutreachStage::BookAppointment),
        LeadStatus::Dead => Some(OutreachStage::Holster),
    }
}

/// Funnel status to record after entering `to`, if it changes anything.
pub fn lead_status_after(to: OutreachStage) -> Option<LeadStatus> {
    match to {
        OutreachStage::FollowUp => Some(LeadStatus::Responded),
        OutreachStage::BookAppointment => Some(LeadStatus::Qualified),
        OutreachStage::Holster | OutreachStage::OptedOut => Some(LeadStatus::Dead),
        _ => None,
    }
}
