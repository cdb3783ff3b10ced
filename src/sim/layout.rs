//! Screen geometry for falling notes
//!
//! Notes fall from just above the viewport to the hit line (the top edge of
//! the keyboard). Y grows downward:
//! - y = -NOTE_HEIGHT when a note appears
//! - y = hit_line_y exactly at its display time
//! - x = centre of the note's key lane

use glam::Vec2;

use crate::Settings;
use crate::consts::NOTE_HEIGHT;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteLayout {
    pub hit_line_y: f32,
    /// Fall speed in pixels per logical second
    pub px_per_sec: f64,
    pub min_y: f32,
    pub max_y: f32,
    pub lowest_pitch: u8,
    pub highest_pitch: u8,
    pub key_width: f32,
}

impl NoteLayout {
    pub fn from_settings(settings: &Settings) -> Self {
        let hit_line_y = settings.hit_line_y();
        let travel = (hit_line_y + NOTE_HEIGHT) as f64;
        let px_per_sec = travel / settings.lookahead() * settings.note_speed;
        let keys = (settings.highest_pitch as f32 - settings.lowest_pitch as f32 + 1.0).max(1.0);

        Self {
            hit_line_y,
            px_per_sec,
            min_y: -2.0 * settings.viewport_height,
            max_y: 2.0 * settings.viewport_height,
            lowest_pitch: settings.lowest_pitch,
            highest_pitch: settings.highest_pitch,
            key_width: settings.viewport_width / keys,
        }
    }

    /// Vertical position for a note `time_to_hit` logical seconds away
    #[inline]
    pub fn y_at(&self, time_to_hit: f64) -> f32 {
        let y = self.hit_line_y as f64 - time_to_hit * self.px_per_sec;
        (y as f32).clamp(self.min_y, self.max_y)
    }

    /// Centre x of a pitch's key lane (pitches outside the range pin to the edges)
    #[inline]
    pub fn lane_x(&self, pitch: i32) -> f32 {
        let pitch = pitch.clamp(self.lowest_pitch as i32, self.highest_pitch as i32);
        (pitch - self.lowest_pitch as i32) as f32 * self.key_width + self.key_width / 2.0
    }

    #[inline]
    pub fn position(&self, pitch: i32, time_to_hit: f64) -> Vec2 {
        Vec2::new(self.lane_x(pitch), self.y_at(time_to_hit))
    }
}
