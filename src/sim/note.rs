//! Note types: loaded song notes and their on-screen runtime records

use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A scheduled note as loaded from a song
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: u32,
    /// MIDI pitch (semitone number)
    pub pitch: u8,
    /// Seconds from song start
    pub time: f64,
}

/// Engine-owned copy of a note with derived timing
#[derive(Debug, Clone)]
pub struct InternalNote {
    pub note: Note,
    /// Logical time at which the note becomes visible
    pub appear_time: f64,
    /// Consumed: spawned and cleaned up, or skipped by a seek
    pub processed: bool,
}

impl InternalNote {
    pub fn new(note: Note, timing_adjustment: f64, lookahead: f64) -> Self {
        Self {
            note,
            appear_time: note.time + timing_adjustment - lookahead,
            processed: false,
        }
    }
}

/// Lifecycle of an on-screen note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteState {
    Visible,
    Hit,
    Missed,
}

impl NoteState {
    /// Numeric code used in the shared notes table
    pub fn code(&self) -> u32 {
        match self {
            NoteState::Visible => 0,
            NoteState::Hit => 1,
            NoteState::Missed => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(NoteState::Visible),
            1 => Some(NoteState::Hit),
            2 => Some(NoteState::Missed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, NoteState::Visible)
    }
}

/// Runtime record for a note while it is on screen
#[derive(Debug, Clone, Serialize)]
pub struct ActiveNote {
    pub note: Note,
    pub state: NoteState,
    /// x = key lane centre, y = vertical position (grows downward)
    pub position: Vec2,
    pub prev_position: Vec2,
    /// Logical time of the hit
    pub hit_time: Option<f64>,
    /// Logical time the note was marked missed
    pub missed_at: Option<f64>,
    /// Signed timing error in ms (positive = late)
    pub timing_error_ms: Option<f64>,
    pub velocity: Option<u8>,
    /// Hit-line crossing already reported
    pub crossing_logged: bool,
    /// Scheduled time shifted by the timing adjustment
    pub display_time: f64,
    pub appear_time: f64,
    /// Logical time the note went on screen; the miss age counts from here
    pub spawned_at: f64,
    /// Index into the engine's note list
    #[serde(skip)]
    pub(crate) note_index: usize,
}

impl ActiveNote {
    pub(crate) fn new(note_index: usize, internal: &InternalNote, display_time: f64) -> Self {
        Self {
            note: internal.note,
            state: NoteState::Visible,
            position: Vec2::ZERO,
            prev_position: Vec2::ZERO,
            hit_time: None,
            missed_at: None,
            timing_error_ms: None,
            velocity: None,
            crossing_logged: false,
            display_time,
            appear_time: internal.appear_time,
            spawned_at: internal.appear_time,
            note_index,
        }
    }

    /// Place a new note. Notes already below the hit line start latched; a
    /// note exactly on the line crosses on its first update.
    pub(crate) fn place(&mut self, position: Vec2, hit_line_y: f32) {
        self.position = position;
        self.prev_position = position;
        self.crossing_logged = position.y > hit_line_y;
    }
}

/// Parse a song from a JSON array of notes
pub fn parse_song(json: &str) -> Result<Vec<Note>> {
    let notes: Vec<Note> = serde_json::from_str(json)?;
    Ok(notes)
}

/// Load a song JSON file
pub fn load_song_file(path: impl AsRef<Path>) -> Result<Vec<Note>> {
    let json = std::fs::read_to_string(path.as_ref())?;
    let notes = parse_song(&json)?;
    log::info!("Read {} notes from {}", notes.len(), path.as_ref().display());
    Ok(notes)
}
