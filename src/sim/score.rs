//! Scoring, rank derivation and judgment events

use serde::{Deserialize, Serialize};

use crate::consts::SCORE_PER_GOOD;

/// Letter rank derived from accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Rank {
    S,
    A,
    B,
    C,
    #[default]
    D,
}

impl Rank {
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy >= 0.95 {
            Rank::S
        } else if accuracy >= 0.85 {
            Rank::A
        } else if accuracy >= 0.70 {
            Rank::B
        } else if accuracy >= 0.50 {
            Rank::C
        } else {
            Rank::D
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::S => "S",
            Rank::A => "A",
            Rank::B => "B",
            Rank::C => "C",
            Rank::D => "D",
        }
    }
}

/// Running score for the loaded song
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Score {
    pub total_notes: u32,
    pub good_count: u32,
    pub miss_count: u32,
    pub combo: u32,
    pub max_combo: u32,
    /// good / (good + miss), 0 before the first judgment
    pub accuracy: f64,
    pub score: u64,
    pub rank: Rank,
}

impl Score {
    pub fn new(total_notes: u32) -> Self {
        Self {
            total_notes,
            ..Default::default()
        }
    }

    /// Notes judged so far
    pub fn judged(&self) -> u32 {
        self.good_count + self.miss_count
    }

    pub fn record_good(&mut self) {
        self.good_count += 1;
        self.combo += 1;
        self.max_combo = self.max_combo.max(self.combo);
        self.score += SCORE_PER_GOOD;
        self.refresh();
    }

    pub fn record_miss(&mut self) {
        self.miss_count += 1;
        self.combo = 0;
        self.refresh();
    }

    fn refresh(&mut self) {
        let judged = self.judged();
        self.accuracy = if judged > 0 {
            self.good_count as f64 / judged as f64
        } else {
            0.0
        };
        self.rank = Rank::from_accuracy(self.accuracy);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentKind {
    Good,
    Miss,
}

/// A judgment applied to one note
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgmentEvent {
    pub kind: JudgmentKind,
    /// Signed ms relative to the note's display time (positive = late)
    pub timing_error_ms: f64,
    pub note_id: u32,
    /// Logical time of the judgment
    pub timestamp: f64,
}

/// Practice-guide hint: the key to press now
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuideHighlight {
    /// Pitch as drawn on the keyboard (transpose applied)
    pub pitch: u8,
    pub note_id: u32,
    pub timestamp: f64,
}
