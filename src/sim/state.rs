//! Engine state and playback control
//!
//! All per-song state lives in [`Engine`]. Logical time is derived from the
//! audio clock: `logical = (audio_time - anchor) * speed` while playing, and
//! frozen while paused.

use std::collections::HashSet;

use serde::Serialize;

use super::layout::NoteLayout;
use super::note::{ActiveNote, InternalNote, Note};
use super::score::{GuideHighlight, JudgmentEvent, Score};
use crate::Settings;
use crate::consts::SEEK_LOOKBACK;

/// Output of one [`Engine::sync`] call. Consumers must not keep it across ticks.
#[derive(Debug, Clone, Serialize)]
pub struct FrameSnapshot {
    pub frame_id: u64,
    /// Logical time in seconds
    pub current_time: f64,
    pub playing: bool,
    pub active_notes: Vec<ActiveNote>,
    pub score: Score,
    pub judgments: Vec<JudgmentEvent>,
    pub highlights: Vec<GuideHighlight>,
}

/// Simulation core: one loaded song, its active notes and score
#[derive(Debug, Clone)]
pub struct Engine {
    pub(crate) settings: Settings,
    pub(crate) layout: NoteLayout,
    /// Sorted by (time, id)
    pub(crate) notes: Vec<InternalNote>,
    /// Insertion (spawn) order
    pub(crate) active: Vec<ActiveNote>,
    pub(crate) active_ids: HashSet<u32>,
    /// Next note to consider for spawning
    pub(crate) cursor: usize,
    pub(crate) score: Score,
    pub(crate) playing: bool,
    /// Audio time at which logical time was zero
    pub(crate) anchor: f64,
    pub(crate) current_time: f64,
    pub(crate) last_audio_time: f64,
    pub(crate) frame_id: u64,
    pub(crate) pending_judgments: Vec<JudgmentEvent>,
    pub(crate) pending_highlights: Vec<GuideHighlight>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Engine {
    pub fn new(settings: Settings) -> Self {
        let settings = settings.sanitized();
        Self {
            layout: NoteLayout::from_settings(&settings),
            settings,
            notes: Vec::new(),
            active: Vec::new(),
            active_ids: HashSet::new(),
            cursor: 0,
            score: Score::default(),
            playing: false,
            anchor: 0.0,
            current_time: 0.0,
            last_audio_time: 0.0,
            frame_id: 0,
            pending_judgments: Vec::new(),
            pending_highlights: Vec::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn layout(&self) -> &NoteLayout {
        &self.layout
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    pub fn active_notes(&self) -> &[ActiveNote] {
        &self.active
    }

    /// Logical time as of the last sync or control call
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    /// Logical time corresponding to an audio-clock reading
    pub fn logical_time_at(&self, audio_time: f64) -> f64 {
        if self.playing {
            (audio_time - self.anchor) * self.settings.speed()
        } else {
            self.current_time
        }
    }

    /// Replace the song; resets score, active notes and playback position
    pub fn load_song(&mut self, notes: Vec<Note>) {
        let adjustment = self.settings.timing_adjustment_secs();
        let lookahead = self.settings.lookahead();

        let mut notes: Vec<Note> = notes
            .into_iter()
            .filter(|n| {
                let ok = n.time.is_finite();
                if !ok {
                    log::warn!("Dropping note {} with non-finite time", n.id);
                }
                ok
            })
            .collect();
        notes.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.id.cmp(&b.id)));

        self.notes = notes
            .into_iter()
            .map(|n| InternalNote::new(n, adjustment, lookahead))
            .collect();
        self.active.clear();
        self.active_ids.clear();
        self.cursor = 0;
        self.score = Score::new(self.notes.len() as u32);
        self.playing = false;
        self.anchor = 0.0;
        self.current_time = 0.0;
        self.pending_judgments.clear();
        self.pending_highlights.clear();

        log::info!("Loaded song with {} notes", self.notes.len());
    }

    /// Swap settings without losing progress
    pub fn update_settings(&mut self, settings: Settings) {
        let settings = settings.sanitized();
        if self.playing {
            self.current_time = self.logical_time_at(self.last_audio_time);
        }

        self.settings = settings;
        self.layout = NoteLayout::from_settings(&self.settings);

        if self.playing {
            self.anchor = self.last_audio_time - self.current_time / self.settings.speed();
        }

        let adjustment = self.settings.timing_adjustment_secs();
        let lookahead = self.settings.lookahead();
        for internal in &mut self.notes {
            internal.appear_time = internal.note.time + adjustment - lookahead;
        }
        for active in &mut self.active {
            let internal = &self.notes[active.note_index];
            active.display_time = internal.note.time + adjustment;
            active.appear_time = internal.appear_time;
        }

        log::debug!(
            "Settings updated: speed={} adjustment={}ms guide={}",
            self.settings.speed(),
            self.settings.timing_adjustment_ms,
            self.settings.practice_guide.as_str()
        );
    }

    /// Begin (or resume) playback so that `audio_time` maps to `start_at`
    pub fn start(&mut self, audio_time: f64, start_at: f64) {
        if !audio_time.is_finite() || !start_at.is_finite() {
            log::warn!("Ignoring start with non-finite time ({audio_time}, {start_at})");
            return;
        }
        if (start_at - self.current_time).abs() > 1e-3 {
            self.reposition(start_at);
        }
        self.current_time = start_at;
        self.anchor = audio_time - start_at / self.settings.speed();
        self.last_audio_time = audio_time;
        self.playing = true;
        log::info!("Playback started at {start_at:.3}s");
    }

    /// Freeze logical time at its value for `audio_time`
    pub fn pause(&mut self, audio_time: f64) {
        if !self.playing {
            return;
        }
        if audio_time.is_finite() {
            self.current_time = self.logical_time_at(audio_time);
            self.last_audio_time = audio_time;
        }
        self.playing = false;
        log::info!("Playback paused at {:.3}s", self.current_time);
    }

    /// Stop playback, clear the screen and rewind to the start
    pub fn stop(&mut self) {
        self.playing = false;
        self.current_time = 0.0;
        self.active.clear();
        self.active_ids.clear();
        self.cursor = 0;
        for internal in &mut self.notes {
            internal.processed = false;
        }
        log::info!("Playback stopped");
    }

    /// Jump to logical `time`; playback state is kept
    pub fn seek(&mut self, time: f64, audio_time: f64) {
        if !time.is_finite() {
            log::warn!("Ignoring seek to non-finite time");
            return;
        }
        self.reposition(time);
        if audio_time.is_finite() {
            self.last_audio_time = audio_time;
            if self.playing {
                self.anchor = audio_time - time / self.settings.speed();
            }
        }
        log::debug!(
            "Seek to {time:.3}s: {} notes restored, cursor at {}",
            self.active.len(),
            self.cursor
        );
    }

    /// Rebuild the active set and cursor around `time`.
    ///
    /// Notes more than [`SEEK_LOOKBACK`] behind are consumed, notes inside the
    /// lookback margin are recreated, later notes are left to the cursor.
    fn reposition(&mut self, time: f64) {
        self.current_time = time;
        self.active.clear();
        self.active_ids.clear();

        let adjustment = self.settings.timing_adjustment_secs();
        let earliest = time - SEEK_LOOKBACK;
        for (index, internal) in self.notes.iter_mut().enumerate() {
            let display_time = internal.note.time + adjustment;
            if display_time < earliest {
                internal.processed = true;
            } else if display_time <= time {
                internal.processed = false;
                let mut active = ActiveNote::new(index, internal, display_time);
                active.spawned_at = time;
                let pitch = internal.note.pitch as i32 + self.settings.transpose;
                active.place(
                    self.layout.position(pitch, display_time - time),
                    self.layout.hit_line_y,
                );
                self.active_ids.insert(internal.note.id);
                self.active.push(active);
            } else {
                internal.processed = false;
            }
        }

        self.cursor = self
            .notes
            .partition_point(|n| n.note.time + adjustment <= time);
    }

    /// Take queued judgment and highlight events
    pub fn drain_events(&mut self) -> (Vec<JudgmentEvent>, Vec<GuideHighlight>) {
        (
            std::mem::take(&mut self.pending_judgments),
            std::mem::take(&mut self.pending_highlights),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::NoteState;

    fn notes_at(times: &[f64]) -> Vec<Note> {
        times
            .iter()
            .enumerate()
            .map(|(i, &time)| Note {
                id: i as u32 + 1,
                pitch: 60,
                time,
            })
            .collect()
    }

    #[test]
    fn test_load_sorts_and_resets() {
        let mut engine = Engine::default();
        engine.load_song(notes_at(&[3.0, 1.0, 2.0]));
        let times: Vec<f64> = engine.notes.iter().map(|n| n.note.time).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0]);
        assert_eq!(engine.score().total_notes, 3);
        assert!(!engine.is_playing());

        engine.load_song(Vec::new());
        assert_eq!(engine.note_count(), 0);
        assert_eq!(engine.score().total_notes, 0);
    }

    #[test]
    fn test_start_pause_anchor() {
        let mut engine = Engine::new(Settings {
            playback_speed: 2.0,
            ..Default::default()
        });
        engine.load_song(notes_at(&[10.0]));
        engine.start(100.0, 0.0);
        assert!((engine.logical_time_at(101.0) - 2.0).abs() < 1e-12);

        engine.pause(101.5);
        assert!((engine.current_time() - 3.0).abs() < 1e-12);
        assert_eq!(engine.logical_time_at(500.0), engine.current_time());

        engine.start(200.0, engine.current_time());
        assert!((engine.logical_time_at(201.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_speed_change_keeps_position() {
        let mut engine = Engine::default();
        engine.load_song(notes_at(&[10.0]));
        engine.start(0.0, 0.0);
        engine.sync(4.0);

        engine.update_settings(Settings {
            playback_speed: 0.5,
            ..Default::default()
        });
        assert!((engine.logical_time_at(4.0) - 4.0).abs() < 1e-9);
        assert!((engine.logical_time_at(6.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_timing_adjustment_updates_active() {
        let mut engine = Engine::default();
        engine.load_song(notes_at(&[2.0]));
        engine.start(0.0, 0.0);
        engine.sync(0.0);
        assert_eq!(engine.active_notes()[0].display_time, 2.0);

        engine.update_settings(Settings {
            timing_adjustment_ms: 100.0,
            ..Default::default()
        });
        assert!((engine.active_notes()[0].display_time - 2.1).abs() < 1e-12);
        assert!((engine.notes[0].appear_time - -2.9).abs() < 1e-12);
    }

    #[test]
    fn test_stop_rewinds() {
        let mut engine = Engine::default();
        engine.load_song(notes_at(&[1.0, 2.0]));
        engine.start(0.0, 0.0);
        engine.sync(0.5);
        assert_eq!(engine.active_notes().len(), 2);

        engine.stop();
        assert!(engine.active_notes().is_empty());
        assert_eq!(engine.cursor, 0);
        assert_eq!(engine.current_time(), 0.0);
        assert!(engine.notes.iter().all(|n| !n.processed));
    }

    #[test]
    fn test_seek_lookback_window() {
        let mut engine = Engine::default();
        engine.load_song(notes_at(&[1.0, 5.0, 9.0, 9.5, 15.0]));
        engine.start(0.0, 0.0);
        engine.sync(0.0);

        engine.seek(10.0, 0.0);
        let mut times: Vec<f64> = engine.active_notes().iter().map(|n| n.note.time).collect();
        times.sort_by(f64::total_cmp);
        assert_eq!(times, vec![9.0, 9.5]);
        assert!(engine.active_notes().iter().all(|n| n.state == NoteState::Visible));
        assert_eq!(engine.notes[engine.cursor].note.time, 15.0);
        assert!(engine.notes[0].processed && engine.notes[1].processed);

        // Cursor resumes forward: the t=15 note appears at t=10
        let frame = engine.sync(0.0);
        assert!(frame.active_notes.iter().any(|n| n.note.time == 15.0));
    }

    #[test]
    fn test_seek_backwards_rearms() {
        let mut engine = Engine::default();
        engine.load_song(notes_at(&[1.0, 5.0]));
        engine.seek(20.0, 0.0);
        assert!(engine.notes.iter().all(|n| n.processed));

        engine.seek(0.0, 0.0);
        assert!(engine.notes.iter().all(|n| !n.processed));
        assert_eq!(engine.cursor, 0);
    }

    #[test]
    fn test_non_finite_controls_ignored() {
        let mut engine = Engine::default();
        engine.load_song(notes_at(&[1.0]));
        engine.start(f64::NAN, 0.0);
        assert!(!engine.is_playing());
        engine.seek(f64::INFINITY, 0.0);
        assert_eq!(engine.current_time(), 0.0);
    }
}
