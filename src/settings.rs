//! Engine settings
//!
//! Hot-swappable at runtime; loaded from JSON by the driver binary.
//! Out-of-range values are clamped, never rejected.

use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What happens when a note crosses the hit line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PracticeGuide {
    /// No guide
    #[default]
    Off,
    /// Highlight the key to play
    Key,
    /// Highlight the key and judge the note automatically
    KeyAuto,
}

impl PracticeGuide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PracticeGuide::Off => "off",
            PracticeGuide::Key => "key",
            PracticeGuide::KeyAuto => "key_auto",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Some(PracticeGuide::Off),
            "key" => Some(PracticeGuide::Key),
            "key_auto" | "key-auto" | "auto" => Some(PracticeGuide::KeyAuto),
            _ => None,
        }
    }

    /// Whether crossings emit a highlight event
    pub fn highlights(&self) -> bool {
        !matches!(self, PracticeGuide::Off)
    }

    /// Whether crossings apply a judgment on the player's behalf
    pub fn auto_judges(&self) -> bool {
        matches!(self, PracticeGuide::KeyAuto)
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // === Playback ===
    /// Playback speed multiplier (0.1 - 4.0)
    pub playback_speed: f64,
    /// Shift applied to every note's scheduled time, in milliseconds
    pub timing_adjustment_ms: f64,

    // === Geometry ===
    /// Viewport width in pixels
    pub viewport_width: f32,
    /// Viewport height in pixels
    pub viewport_height: f32,
    /// Height of the keyboard strip at the bottom of the viewport
    pub piano_height: f32,
    /// Lowest pitch drawn on the keyboard
    pub lowest_pitch: u8,
    /// Highest pitch drawn on the keyboard
    pub highest_pitch: u8,
    /// Visual fall speed multiplier (does not change timing)
    pub note_speed: f64,

    // === Input matching ===
    /// Semitones added to every note's pitch
    pub transpose: i32,
    /// Octaves added to every played pitch
    pub input_octave_shift: i32,
    /// Match on pitch class only
    pub octave_agnostic: bool,

    // === Practice ===
    pub practice_guide: PracticeGuide,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            playback_speed: 1.0,
            timing_adjustment_ms: 0.0,

            viewport_width: 1280.0,
            viewport_height: 720.0,
            piano_height: 120.0,
            lowest_pitch: 21,
            highest_pitch: 108,
            note_speed: 1.0,

            transpose: 0,
            input_octave_shift: 0,
            octave_agnostic: false,

            practice_guide: PracticeGuide::Off,
        }
    }
}

/// Clamp into `min..=max`, falling back to `default` for NaN
fn clamp_or<T: PartialOrd + Copy>(value: T, min: T, max: T, default: T) -> T {
    match (value.partial_cmp(&min), value.partial_cmp(&max)) {
        (None, _) | (_, None) => default,
        (Some(Ordering::Less), _) => min,
        (_, Some(Ordering::Greater)) => max,
        _ => value,
    }
}

impl Settings {
    pub const MAX_TIMING_ADJUSTMENT_MS: f64 = 500.0;
    pub const MAX_TRANSPOSE: i32 = 24;
    pub const MAX_OCTAVE_SHIFT: i32 = 4;

    /// Copy with every field forced into its valid range
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let viewport_height =
            clamp_or(self.viewport_height, 1.0, 16_384.0, defaults.viewport_height);
        let (lowest_pitch, highest_pitch) = if self.lowest_pitch <= self.highest_pitch {
            (self.lowest_pitch.min(127), self.highest_pitch.min(127))
        } else {
            (self.highest_pitch.min(127), self.lowest_pitch.min(127))
        };

        Self {
            playback_speed: crate::clamp_speed(self.playback_speed),
            timing_adjustment_ms: clamp_or(
                self.timing_adjustment_ms,
                -Self::MAX_TIMING_ADJUSTMENT_MS,
                Self::MAX_TIMING_ADJUSTMENT_MS,
                0.0,
            ),
            viewport_width: clamp_or(self.viewport_width, 1.0, 16_384.0, defaults.viewport_width),
            viewport_height,
            piano_height: clamp_or(
                self.piano_height,
                0.0,
                viewport_height,
                defaults.piano_height.min(viewport_height),
            ),
            lowest_pitch,
            highest_pitch,
            note_speed: clamp_or(self.note_speed, 0.1, 5.0, 1.0),
            transpose: self.transpose.clamp(-Self::MAX_TRANSPOSE, Self::MAX_TRANSPOSE),
            input_octave_shift: self
                .input_octave_shift
                .clamp(-Self::MAX_OCTAVE_SHIFT, Self::MAX_OCTAVE_SHIFT),
            octave_agnostic: self.octave_agnostic,
            practice_guide: self.practice_guide,
        }
    }

    /// Effective playback speed
    pub fn speed(&self) -> f64 {
        crate::clamp_speed(self.playback_speed)
    }

    /// Timing adjustment in seconds
    pub fn timing_adjustment_secs(&self) -> f64 {
        self.timing_adjustment_ms / 1000.0
    }

    /// Y coordinate of the hit line (top edge of the keyboard)
    pub fn hit_line_y(&self) -> f32 {
        self.viewport_height - self.piano_height
    }

    /// Seconds a note is visible before its display time
    pub fn lookahead(&self) -> f64 {
        crate::lookahead_for(self.playback_speed)
    }

    /// Parse settings from JSON (missing fields take defaults)
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        Ok(settings.sanitized())
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let settings = Self::from_json(&json)?;
        log::info!("Loaded settings from {}", path.as_ref().display());
        Ok(settings)
    }

    /// Save settings as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        log::info!("Settings saved to {}", path.as_ref().display());
        Ok(())
    }
}
