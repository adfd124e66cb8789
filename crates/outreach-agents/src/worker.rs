//! Outreach workers
//!
//! Each worker owns a slice of the cartridge and its own sending lane:
//!
//! ```text
//! GIANNA  (Opener)  initial, retarget          first touch
//! CATHY   (Nudger)  nudge, nurture             ghost revival
//! SABRINA (Closer)  follow_up, book_appointment booking
//! ```
//!
//! `holster` and `opted_out` have no worker: nothing is sent from them.

use std::fmt;

use gatekeeper::cartridge::{OutreachStage, ToneType};
use serde::{Deserialize, Serialize};

/// Appended to every outbound message.
pub const OPT_OUT_FOOTER: &str = "Reply STOP to opt out.";

/// Worker role. One variant per sending persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Worker {
    Opener,
    Nudger,
    Closer,
}

impl Worker {
    pub const ALL: [Worker; 3] = [Worker::Opener, Worker::Nudger, Worker::Closer];

    /// Worker responsible for attempts sent from `stage`.
    pub fn for_stage(stage: OutreachStage) -> Option<Self> {
        match stage {
            OutreachStage::Initial | OutreachStage::Retarget => Some(Self::Opener),
            OutreachStage::Nudge | OutreachStage::Nurture => Some(Self::Nudger),
            OutreachStage::FollowUp | OutreachStage::BookAppointment => Some(Self::Closer),
            OutreachStage::Holster | OutreachStage::OptedOut => None,
        }
    }

    /// Persona name shown to contacts and operators.
    pub fn persona(self) -> &'static str {
        match self {
            Self::Opener => "GIANNA",
            Self::Nudger => "CATHY",
            Self::Closer => "SABRINA",
        }
    }

    /// Environment variable holding this worker's dedicated sending number.
    pub fn lane_env_var(self) -> &'static str {
        match self {
            Self::Opener => "GIANNA_PHONE_NUMBER",
            Self::Nudger => "CATHY_PHONE_NUMBER",
            Self::Closer => "SABRINA_PHONE_NUMBER",
        }
    }

    /// Render the message body for an attempt carrying `tone`.
    pub fn compose(self, tone: ToneType, first_name: Option<&str>) -> String {
        let name = first_name.map(str::trim).filter(|n| !n.is_empty());
        let greeting = match name {
            Some(n) => format!("Hi {n}, "),
            None => "Hi, ".to_string(),
        };
        let line = match (self, tone) {
            (Self::Opener, ToneType::Authority) => {
                "this is Gianna. We work with owners in your market on exit planning and I'd value 10 minutes of your time."
            }
            (Self::Opener, ToneType::Curiosity) => {
                "quick question: have you ever looked at what your business would be worth today?"
            }
            (Self::Opener, ToneType::Direct) => "are you open to a short call this week?",
            (Self::Opener, ToneType::Humor) => {
                "I promise I'm more persistent than a parking ticket, and far friendlier."
            }
            (Self::Opener, ToneType::Final) => {
                "last note from me. If the timing is ever right, just reply here."
            }
            (Self::Nudger, ToneType::Authority) => {
                "Cathy here, following up on Gianna's note. Owners like you usually want the numbers first."
            }
            (Self::Nudger, ToneType::Curiosity) => {
                "just out of curiosity, what would need to change for this to make sense?"
            }
            (Self::Nudger, ToneType::Direct) => "should I keep you on my list or close the loop?",
            (Self::Nudger, ToneType::Humor) => {
                "my inbox misses you. A one-word reply would make its day."
            }
            (Self::Nudger, ToneType::Final) => {
                "I'll stop here. The door stays open whenever you want it."
            }
            (Self::Closer, ToneType::Authority) => {
                "Sabrina here. I have two openings with our advisor this week and held one for you."
            }
            (Self::Closer, ToneType::Curiosity) => {
                "would mornings or afternoons work better for a 15-minute call?"
            }
            (Self::Closer, ToneType::Direct) => "can I book you for tomorrow at 10?",
            (Self::Closer, ToneType::Humor) => {
                "I've reshuffled my calendar twice for you. Third time's the charm?"
            }
            (Self::Closer, ToneType::Final) => {
                "final reminder: your spot is released at end of day unless you confirm."
            }
        };
        format!("{greeting}{line} {OPT_OUT_FOOTER}")
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.persona())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper::cartridge::TONE_SEQUENCE;

    #[test]
    fn test_every_live_stage_has_one_worker() {
        for stage in OutreachStage::ALL {
            assert_eq!(Worker::for_stage(stage).is_some(), stage.is_live(), "{stage}");
        }
        assert_eq!(Worker::for_stage(OutreachStage::Retarget), Some(Worker::Opener));
        assert_eq!(Worker::for_stage(OutreachStage::Nurture), Some(Worker::Nudger));
        assert_eq!(
            Worker::for_stage(OutreachStage::BookAppointment),
            Some(Worker::Closer)
        );
    }

    #[test]
    fn test_every_message_carries_opt_out_footer() {
        for worker in Worker::ALL {
            for tone in TONE_SEQUENCE {
                let body = worker.compose(tone, Some("Dana"));
                assert!(body.starts_with("Hi Dana, "));
                assert!(body.ends_with(OPT_OUT_FOOTER), "{worker} {tone}");
            }
        }
    }

    #[test]
    fn test_blank_name_falls_back() {
        let body = Worker::Opener.compose(ToneType::Direct, Some("  "));
        assert!(body.starts_with("Hi, are you open"));
    }

    #[test]
    fn test_tones_render_distinct_messages() {
        let bodies: std::collections::HashSet<String> = TONE_SEQUENCE
            .iter()
            .map(|t| Worker::Nudger.compose(*t, None))
            .collect();
        assert_eq!(bodies.len(), TONE_SEQUENCE.len());
    }
}
