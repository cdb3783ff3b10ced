//! Pure simulation module
//!
//! All timing and judgment logic lives here. This module must stay free of
//! threads and shared memory:
//! - Time only enters through explicit audio-time arguments
//! - Stable iteration order (spawn order, notes sorted by time then id)
//! - No rendering or platform dependencies

pub mod judge;
pub mod layout;
pub mod note;
pub mod score;
pub mod state;
pub mod tick;

pub use judge::pitch_matches;
pub use layout::NoteLayout;
pub use note::{ActiveNote, InternalNote, Note, NoteState, load_song_file, parse_song};
pub use score::{GuideHighlight, JudgmentEvent, JudgmentKind, Rank, Score};
pub use state::{Engine, FrameSnapshot};
