//! Lock-free shared layout for publishing simulation frames
//!
//! Three fixed regions, sized once at construction:
//! - Control: `i32` counters (frame id, active note count, flags)
//! - Notes: `capacity` records of 8 `f32` fields
//! - Clock: `i64` nanoseconds (audio time, logical time, output latency)
//!
//! Single-writer discipline, no locks: the simulation worker writes Control,
//! Notes and the logical clock; the audio clock bridge writes the audio clock
//! and latency. Readers never write. A publish in progress is flagged and the
//! frame id is bumped when it completes, so readers can detect torn frames.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering, fence};

use atomic_float::AtomicF32;
use bytemuck::{Pod, Zeroable};

use crate::consts::{DEFAULT_NOTE_CAPACITY, MAX_NOTE_CAPACITY};
use crate::error::{EngineError, Result};
use crate::sim::{ActiveNote, FrameSnapshot, NoteState};
use crate::{nanos_to_secs, secs_to_nanos};

/// Control slot indices
pub mod control {
    pub const FRAME_ID: usize = 0;
    pub const ACTIVE_COUNT: usize = 1;
    pub const FLAGS: usize = 2;
    pub const LEN: usize = 3;
}

/// Bits of the control flags word
pub mod flags {
    pub const PLAYING: i32 = 1 << 0;
    pub const PUBLISHING: i32 = 1 << 1;
}

/// Clock slot indices
pub mod clock {
    pub const AUDIO_TIME: usize = 0;
    pub const LOGICAL_TIME: usize = 1;
    pub const LATENCY: usize = 2;
    pub const LEN: usize = 3;
}

/// Fields per note record
pub const NOTE_FIELDS: usize = 8;

/// One row of the notes table
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct NoteRecord {
    pub id: f32,
    pub pitch: f32,
    pub time: f32,
    pub display_time: f32,
    pub y: f32,
    /// [`NoteState::code`]
    pub state: f32,
    /// Timing error in ms once judged, otherwise input velocity (0 if none)
    pub timing: f32,
    pub spare: f32,
}

impl NoteRecord {
    pub fn from_active(note: &ActiveNote) -> Self {
        let timing = note
            .timing_error_ms
            .map(|e| e as f32)
            .or(note.velocity.map(f32::from))
            .unwrap_or(0.0);
        Self {
            id: note.note.id as f32,
            pitch: note.note.pitch as f32,
            time: note.note.time as f32,
            display_time: note.display_time as f32,
            y: note.position.y,
            state: note.state.code() as f32,
            timing,
            spare: 0.0,
        }
    }

    pub fn state(&self) -> Option<NoteState> {
        NoteState::from_code(self.state as u32)
    }

    /// View records as raw bytes (e.g. for a GPU instance buffer upload)
    pub fn as_bytes(records: &[NoteRecord]) -> &[u8] {
        bytemuck::cast_slice(records)
    }
}

/// A consistent copy of one published frame
#[derive(Debug, Clone, PartialEq)]
pub struct SharedFrame {
    pub frame_id: i32,
    pub playing: bool,
    pub logical_time: f64,
    pub notes: Vec<NoteRecord>,
}

pub struct SharedLayout {
    control: [AtomicI32; control::LEN],
    notes: Box<[AtomicF32]>,
    clock: [AtomicI64; clock::LEN],
    capacity: usize,
    /// Writer-side: an overflow warning was already logged
    overflowing: AtomicBool,
}

impl std::fmt::Debug for SharedLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLayout")
            .field("capacity", &self.capacity)
            .field("frame_id", &self.frame_id())
            .field("active_count", &self.active_count())
            .field("flags", &self.flags())
            .finish()
    }
}

impl SharedLayout {
    /// Allocate a layout for `capacity` concurrent notes
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_NOTE_CAPACITY {
            return Err(EngineError::LayoutCapacity {
                requested: capacity,
                max: MAX_NOTE_CAPACITY,
            });
        }
        Ok(Self::allocate(capacity))
    }

    pub fn with_default_capacity() -> Self {
        Self::allocate(DEFAULT_NOTE_CAPACITY)
    }

    fn allocate(capacity: usize) -> Self {
        Self {
            control: std::array::from_fn(|_| AtomicI32::new(0)),
            notes: (0..capacity * NOTE_FIELDS)
                .map(|_| AtomicF32::new(0.0))
                .collect(),
            clock: std::array::from_fn(|_| AtomicI64::new(0)),
            capacity,
            overflowing: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the equivalent packed binary layout in bytes
    pub fn byte_len(&self) -> usize {
        control::LEN * 4 + self.capacity * NOTE_FIELDS * 4 + clock::LEN * 8
    }

    // === Control ===

    pub fn frame_id(&self) -> i32 {
        self.control[control::FRAME_ID].load(Ordering::Acquire)
    }

    pub fn active_count(&self) -> usize {
        self.control[control::ACTIVE_COUNT].load(Ordering::Acquire).max(0) as usize
    }

    pub fn flags(&self) -> i32 {
        self.control[control::FLAGS].load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.flags() & flags::PLAYING != 0
    }

    // === Clock ===

    pub fn store_audio_time(&self, secs: f64) {
        self.clock[clock::AUDIO_TIME].store(secs_to_nanos(secs), Ordering::Release);
    }

    pub fn audio_time(&self) -> f64 {
        nanos_to_secs(self.clock[clock::AUDIO_TIME].load(Ordering::Acquire))
    }

    pub fn store_logical_time(&self, secs: f64) {
        self.clock[clock::LOGICAL_TIME].store(secs_to_nanos(secs), Ordering::Release);
    }

    pub fn logical_time(&self) -> f64 {
        nanos_to_secs(self.clock[clock::LOGICAL_TIME].load(Ordering::Acquire))
    }

    pub fn store_latency(&self, secs: f64) {
        self.clock[clock::LATENCY].store(secs_to_nanos(secs), Ordering::Release);
    }

    pub fn latency(&self) -> f64 {
        nanos_to_secs(self.clock[clock::LATENCY].load(Ordering::Acquire))
    }

    // === Notes ===

    /// Write a frame into the table. Simulation worker only.
    ///
    /// Notes beyond capacity are dropped from the table (the snapshot itself
    /// is unaffected).
    pub fn publish(&self, frame: &FrameSnapshot) {
        let total = frame.active_notes.len();
        let count = total.min(self.capacity);
        if total > self.capacity {
            if !self.overflowing.swap(true, Ordering::Relaxed) {
                log::warn!(
                    "{} active notes exceed shared capacity {}; truncating",
                    total,
                    self.capacity
                );
            }
        } else {
            self.overflowing.store(false, Ordering::Relaxed);
        }

        let slot = &self.control[control::FLAGS];
        slot.store(slot.load(Ordering::Relaxed) | flags::PUBLISHING, Ordering::Relaxed);
        fence(Ordering::Release);

        for (i, note) in frame.active_notes.iter().take(count).enumerate() {
            let cells: [f32; NOTE_FIELDS] = bytemuck::cast(NoteRecord::from_active(note));
            let base = i * NOTE_FIELDS;
            for (j, value) in cells.iter().enumerate() {
                self.notes[base + j].store(*value, Ordering::Relaxed);
            }
        }
        self.control[control::ACTIVE_COUNT].store(count as i32, Ordering::Relaxed);
        self.store_logical_time(frame.current_time);

        self.control[control::FRAME_ID].fetch_add(1, Ordering::Release);
        let playing = if frame.playing { flags::PLAYING } else { 0 };
        slot.store(playing, Ordering::Release);
    }

    /// Copy the latest complete frame, or `None` if a publish overlapped the read
    pub fn read_frame(&self) -> Option<SharedFrame> {
        let flags_before = self.control[control::FLAGS].load(Ordering::Acquire);
        if flags_before & flags::PUBLISHING != 0 {
            return None;
        }
        let frame_id = self.control[control::FRAME_ID].load(Ordering::Acquire);
        let count = (self.control[control::ACTIVE_COUNT].load(Ordering::Relaxed).max(0) as usize)
            .min(self.capacity);
        let logical_time = nanos_to_secs(self.clock[clock::LOGICAL_TIME].load(Ordering::Relaxed));

        let mut notes = Vec::with_capacity(count);
        for i in 0..count {
            let base = i * NOTE_FIELDS;
            let cells: [f32; NOTE_FIELDS] =
                std::array::from_fn(|j| self.notes[base + j].load(Ordering::Relaxed));
            notes.push(bytemuck::cast::<[f32; NOTE_FIELDS], NoteRecord>(cells));
        }

        fence(Ordering::Acquire);
        let flags_after = self.control[control::FLAGS].load(Ordering::Relaxed);
        let frame_id_after = self.control[control::FRAME_ID].load(Ordering::Relaxed);
        if flags_after & flags::PUBLISHING != 0 || frame_id_after != frame_id {
            return None;
        }

        Some(SharedFrame {
            frame_id,
            playing: flags_before & flags::PLAYING != 0,
            logical_time,
            notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Settings;
    use crate::sim::{Engine, Note};
    use std::sync::Arc;

    fn frame_with_notes(count: usize) -> FrameSnapshot {
        frame_with_adjustment(count, 0.0)
    }

    fn frame_with_adjustment(count: usize, timing_adjustment_ms: f64) -> FrameSnapshot {
        let mut engine = Engine::new(Settings {
            timing_adjustment_ms,
            ..Default::default()
        });
        engine.load_song(
            (0..count)
                .map(|i| Note {
                    id: i as u32 + 1,
                    pitch: 60 + (i % 12) as u8,
                    time: 1.0 + i as f64 * 0.01,
                })
                .collect(),
        );
        engine.start(0.0, 0.0);
        engine.sync(0.5)
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(SharedLayout::new(0).is_err());
        assert!(SharedLayout::new(MAX_NOTE_CAPACITY + 1).is_err());
        let layout = SharedLayout::new(4).unwrap();
        assert_eq!(layout.capacity(), 4);
        assert_eq!(layout.byte_len(), 12 + 4 * 32 + 24);
        assert_eq!(SharedLayout::with_default_capacity().capacity(), DEFAULT_NOTE_CAPACITY);
    }

    #[test]
    fn test_record_is_eight_f32() {
        assert_eq!(std::mem::size_of::<NoteRecord>(), NOTE_FIELDS * 4);
        let records = [NoteRecord::default(); 3];
        assert_eq!(NoteRecord::as_bytes(&records).len(), 3 * 32);
    }

    #[test]
    fn test_publish_and_read() {
        let layout = SharedLayout::new(16).unwrap();
        assert_eq!(layout.read_frame().unwrap().notes.len(), 0);

        let frame = frame_with_notes(3);
        layout.publish(&frame);

        let shared = layout.read_frame().expect("consistent frame");
        assert_eq!(shared.frame_id, 1);
        assert!(shared.playing);
        assert_eq!(shared.notes.len(), 3);
        assert!((shared.logical_time - 0.5).abs() < 1e-9);
        assert_eq!(shared.notes[0].id, 1.0);
        assert_eq!(shared.notes[2].pitch, 62.0);
        assert_eq!(shared.notes[0].state(), Some(NoteState::Visible));
        assert_eq!(shared.notes[0].y, frame.active_notes[0].position.y);
        assert_eq!(layout.active_count(), 3);
        assert!(layout.is_playing());
        assert_eq!(layout.flags() & flags::PUBLISHING, 0);
    }

    #[test]
    fn test_notes_table_round_trips_records() {
        let layout = SharedLayout::new(8).unwrap();
        let frame = frame_with_adjustment(4, -37.5);
        layout.publish(&frame);

        let expected: Vec<NoteRecord> = frame
            .active_notes
            .iter()
            .map(NoteRecord::from_active)
            .collect();
        let shared = layout.read_frame().unwrap();
        assert_eq!(shared.notes, expected);
    }

    #[test]
    fn test_publish_truncates_to_capacity() {
        let layout = SharedLayout::new(2).unwrap();
        layout.publish(&frame_with_notes(5));
        assert_eq!(layout.active_count(), 2);
        assert_eq!(layout.read_frame().unwrap().notes.len(), 2);
    }

    #[test]
    fn test_in_progress_publish_is_rejected() {
        let layout = SharedLayout::new(2).unwrap();
        layout.control[control::FLAGS].store(flags::PUBLISHING, Ordering::Relaxed);
        assert!(layout.read_frame().is_none());
    }

    #[test]
    fn test_timing_field_prefers_error_over_velocity() {
        let mut engine = Engine::new(Settings::default());
        engine.load_song(vec![Note { id: 7, pitch: 60, time: 1.0 }]);
        engine.start(0.0, 0.0);
        engine.sync(0.0);
        engine.note_on(60, 1.05, Some(90)).unwrap();
        let record = NoteRecord::from_active(&engine.active_notes()[0]);
        assert!((record.timing - 50.0).abs() < 1e-3);
        assert_eq!(record.state(), Some(NoteState::Hit));
    }

    #[test]
    fn test_clock_slots() {
        let layout = SharedLayout::new(1).unwrap();
        layout.store_audio_time(12.345_678_9);
        layout.store_latency(0.02);
        assert!((layout.audio_time() - 12.345_678_9).abs() < 1e-9);
        assert!((layout.latency() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_reader_never_sees_torn_frame() {
        // Each frame size gets its own timing adjustment, so a torn frame
        // would mix display offsets or disagree with its note count.
        let variants: [(usize, f64); 4] = [(8, 0.0), (32, 100.0), (1, 200.0), (64, 300.0)];
        let layout = Arc::new(SharedLayout::new(64).unwrap());
        let frames: Vec<FrameSnapshot> = variants
            .iter()
            .map(|&(n, adjustment)| frame_with_adjustment(n, adjustment))
            .collect();

        let reader = {
            let layout = Arc::clone(&layout);
            std::thread::spawn(move || {
                let mut seen = 0;
                for _ in 0..20_000 {
                    let Some(frame) = layout.read_frame() else { continue };
                    if frame.notes.is_empty() {
                        continue;
                    }
                    let (_, adjustment) = variants
                        .iter()
                        .find(|(n, _)| *n == frame.notes.len())
                        .copied()
                        .expect("note count of a published frame");
                    for (i, record) in frame.notes.iter().enumerate() {
                        assert_eq!(record.id, (i + 1) as f32);
                        let offset_ms = (record.display_time - record.time) as f64 * 1000.0;
                        assert!((offset_ms - adjustment).abs() < 0.5);
                    }
                    seen += 1;
                }
                seen
            })
        };

        for i in 0..5_000 {
            layout.publish(&frames[i % frames.len()]);
        }
        reader.join().expect("reader thread");
        assert!(layout.read_frame().is_some());
    }
}
