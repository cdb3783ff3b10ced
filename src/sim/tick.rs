//! Per-frame simulation step
//!
//! One `sync` call = advance logical time, spawn, move, judge misses,
//! detect hit-line crossings, clean up, snapshot.

use super::judge::{apply_good, apply_miss};
use super::note::{ActiveNote, NoteState};
use super::score::GuideHighlight;
use super::state::{Engine, FrameSnapshot};
use crate::consts::*;

impl Engine {
    /// Advance the simulation to `audio_time` and return the frame snapshot.
    ///
    /// The only per-tick entry point. Never fails; a non-finite audio time
    /// reuses the previous reading.
    pub fn sync(&mut self, audio_time: f64) -> FrameSnapshot {
        let audio_time = if audio_time.is_finite() {
            audio_time
        } else {
            log::warn!("Non-finite audio time, reusing {:.3}", self.last_audio_time);
            self.last_audio_time
        };
        self.last_audio_time = audio_time;
        if self.playing {
            self.current_time = (audio_time - self.anchor) * self.settings.speed();
        }

        let now = self.current_time;
        self.spawn_due(now);
        self.update_active(now);
        self.cleanup(now);

        self.frame_id += 1;
        let (judgments, highlights) = self.drain_events();
        FrameSnapshot {
            frame_id: self.frame_id,
            current_time: now,
            playing: self.playing,
            active_notes: self.active.clone(),
            score: self.score.clone(),
            judgments,
            highlights,
        }
    }

    /// Spawn every note whose appear time has been reached
    fn spawn_due(&mut self, now: f64) {
        let adjustment = self.settings.timing_adjustment_secs();
        while let Some(internal) = self.notes.get(self.cursor) {
            if internal.appear_time > now {
                break;
            }
            let index = self.cursor;
            self.cursor += 1;

            if internal.processed || self.active_ids.contains(&internal.note.id) {
                continue;
            }

            let display_time = internal.note.time + adjustment;
            let mut active = ActiveNote::new(index, internal, display_time);
            let pitch = internal.note.pitch as i32 + self.settings.transpose;
            active.place(
                self.layout.position(pitch, display_time - now),
                self.layout.hit_line_y,
            );
            self.active_ids.insert(internal.note.id);
            self.active.push(active);
        }
    }

    /// Move notes, report crossings, turn overdue notes into misses
    fn update_active(&mut self, now: f64) {
        let hit_line_y = self.layout.hit_line_y;
        let guide = self.settings.practice_guide;

        for note in &mut self.active {
            let pitch = note.note.pitch as i32 + self.settings.transpose;
            note.prev_position = note.position;
            note.position = self.layout.position(pitch, note.display_time - now);

            // Downward crossing; unlatched notes start at or above the line
            if !note.crossing_logged && note.position.y >= hit_line_y {
                note.crossing_logged = true;
                if guide.highlights() {
                    self.pending_highlights.push(GuideHighlight {
                        pitch: pitch.clamp(0, 127) as u8,
                        note_id: note.note.id,
                        timestamp: now,
                    });
                }
                if guide.auto_judges() && note.state == NoteState::Visible {
                    let event = apply_good(&mut self.score, note, now, 0.0, None);
                    self.pending_judgments.push(event);
                }
            }

            if note.state == NoteState::Visible
                && now > note.display_time + MISS_GRACE
                && now - note.spawned_at > MIN_MISS_AGE
            {
                let event = apply_miss(&mut self.score, note, now);
                self.pending_judgments.push(event);
            }
        }
    }

    /// Drop judged notes whose linger window has passed.
    ///
    /// Visible notes are never dropped here; they become Missed first.
    fn cleanup(&mut self, now: f64) {
        let speed = self.settings.speed();
        let missed_linger = MISSED_CLEANUP_BASE / speed;
        let hit_linger = CLEANUP_BASE / speed;

        let notes = &mut self.notes;
        let active_ids = &mut self.active_ids;
        self.active.retain(|note| {
            let expired = match note.state {
                NoteState::Visible => false,
                NoteState::Hit => now - note.display_time > hit_linger,
                NoteState::Missed => {
                    let missed_at = note.missed_at.unwrap_or(note.display_time + MISS_GRACE);
                    now - missed_at > missed_linger
                }
            };
            if expired {
                notes[note.note_index].processed = true;
                active_ids.remove(&note.note.id);
            }
            !expired
        });
    }
}
