//! Process-wide emotion state.
//!
//! A single atomic cell biasing the tone of planner prompts. Last writer
//! wins; the value is purely cosmetic and never affects gating, planning
//! structure, or safety.

use std::sync::atomic::{AtomicU8, Ordering};

/// Tone bias applied to prompt composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmotionState {
    /// Default, even register.
    Neutral,
    /// Upbeat phrasing.
    Cheerful,
    /// Short, focused phrasing.
    Focused,
    /// Soft, low-energy phrasing.
    Tired,
}

impl EmotionState {
    /// A short tone directive inserted into the system prompt.
    pub fn prompt_hint(self) -> &'static str {
        match self {
            Self::Neutral => "Keep a balanced, helpful tone.",
            Self::Cheerful => "Keep an upbeat, friendly tone.",
            Self::Focused => "Keep replies short and to the point.",
            Self::Tired => "Keep a soft, unhurried tone.",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Neutral => 0,
            Self::Cheerful => 1,
            Self::Focused => 2,
            Self::Tired => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Cheerful,
            2 => Self::Focused,
            3 => Self::Tired,
            _ => Self::Neutral,
        }
    }
}

static CURRENT: AtomicU8 = AtomicU8::new(0);

/// Set the process-wide emotion state.
pub fn set_emotion(state: EmotionState) {
    CURRENT.store(state.to_u8(), Ordering::Relaxed);
}

/// Read the current process-wide emotion state.
pub fn current_emotion() -> EmotionState {
    EmotionState::from_u8(CURRENT.load(Ordering::Relaxed))
}
