//! Input judgment
//!
//! A played pitch is matched against Visible notes only. The closest note in
//! time wins; ties go to the earliest display time, then the lowest id.

use std::cmp::Ordering;

use super::note::{ActiveNote, NoteState};
use super::score::{JudgmentEvent, JudgmentKind, Score};
use super::state::Engine;
use crate::Settings;
use crate::consts::JUDGMENT_WINDOW_MS;

/// Whether a played pitch answers a note's pitch under the current settings
pub fn pitch_matches(settings: &Settings, note_pitch: u8, played_pitch: u8) -> bool {
    let target = note_pitch as i32 + settings.transpose;
    let played = played_pitch as i32 + 12 * settings.input_octave_shift;
    if settings.octave_agnostic {
        target.rem_euclid(12) == played.rem_euclid(12)
    } else {
        target == played
    }
}

/// Mark a note hit and score it
pub(crate) fn apply_good(
    score: &mut Score,
    note: &mut ActiveNote,
    now: f64,
    timing_error_ms: f64,
    velocity: Option<u8>,
) -> JudgmentEvent {
    note.state = NoteState::Hit;
    note.hit_time = Some(now);
    note.timing_error_ms = Some(timing_error_ms);
    note.velocity = velocity;
    score.record_good();
    JudgmentEvent {
        kind: JudgmentKind::Good,
        timing_error_ms,
        note_id: note.note.id,
        timestamp: now,
    }
}

/// Mark a note missed and score it
pub(crate) fn apply_miss(score: &mut Score, note: &mut ActiveNote, now: f64) -> JudgmentEvent {
    let timing_error_ms = (now - note.display_time) * 1000.0;
    note.state = NoteState::Missed;
    note.missed_at = Some(now);
    note.timing_error_ms = Some(timing_error_ms);
    score.record_miss();
    JudgmentEvent {
        kind: JudgmentKind::Miss,
        timing_error_ms,
        note_id: note.note.id,
        timestamp: now,
    }
}

fn candidate_order(a: &(f64, &ActiveNote), b: &(f64, &ActiveNote)) -> Ordering {
    a.0.abs()
        .total_cmp(&b.0.abs())
        .then(a.1.display_time.total_cmp(&b.1.display_time))
        .then(a.1.note.id.cmp(&b.1.note.id))
}

impl Engine {
    /// Judge a played pitch at `audio_time` (when the key physically went down).
    ///
    /// Returns the judgment, or `None` when no Visible note of that pitch is
    /// inside the window. A `None` leaves all state untouched.
    pub fn note_on(
        &mut self,
        pitch: u8,
        audio_time: f64,
        velocity: Option<u8>,
    ) -> Option<JudgmentEvent> {
        if !audio_time.is_finite() {
            log::warn!("Ignoring note-on {pitch} with non-finite audio time");
            return None;
        }
        let now = self.logical_time_at(audio_time);

        let best = self
            .active
            .iter()
            .filter(|n| n.state == NoteState::Visible)
            .filter(|n| pitch_matches(&self.settings, n.note.pitch, pitch))
            .map(|n| ((now - n.display_time) * 1000.0, n))
            .min_by(candidate_order)
            .map(|(error, n)| (error, n.note.id));

        let (timing_error_ms, note_id) = best?;
        if timing_error_ms.abs() > JUDGMENT_WINDOW_MS {
            log::trace!("Note-on {pitch}: nearest note {note_id} off by {timing_error_ms:.1}ms");
            return None;
        }

        let note = self.active.iter_mut().find(|n| n.note.id == note_id)?;
        let event = apply_good(&mut self.score, note, now, timing_error_ms, velocity);
        self.pending_judgments.push(event);
        Some(event)
    }

    /// Key release. Accepted for protocol completeness; has no effect.
    pub fn note_off(&mut self, pitch: u8, _audio_time: f64) {
        log::trace!("Note-off {pitch}");
    }
}
