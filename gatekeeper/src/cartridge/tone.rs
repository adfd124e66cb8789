use serde::{Deserialize, Serialize};

/// Message tone, escalating across the five attempts of a cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneType {
    Authority,
    Curiosity,
    Direct,
    Humor,
    Final,
}

pub const TONE_SEQUENCE: [ToneType; 5] = [
    ToneType::Authority,
    ToneType::Curiosity,
    ToneType::Direct,
    ToneType::Humor,
    ToneType::Final,
];

/// Tone for a 1-based attempt number, clamped to the sequence.
pub fn tone_for_attempt(attempt: u32) -> ToneType {
    let idx = attempt.clamp(1, TONE_SEQUENCE.len() as u32) as usize - 1;
    TONE_SEQUENCE[idx]
}

impl std::fmt::Display for ToneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authority => write!(f, "authority"),
            Self::Curiosity => write!(f, "curiosity"),
            Self::Direct => write!(f, "direct"),
            Self::Humor => write!(f, "humor"),
            Self::Final => write!(f, "final"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_mapping() {
        let tones: Vec<_> = (1..=5).map(tone_for_attempt).collect();
        assert_eq!(tones, TONE_SEQUENCE.to_vec());
    }

    #[test]
    fn test_tone_ceiling_and_floor() {
        assert_eq!(tone_for_attempt(6), ToneType::Final);
        assert_eq!(tone_for_attempt(u32::MAX), ToneType::Final);
        assert_eq!(tone_for_attempt(0), ToneType::Authority);
    }
}
