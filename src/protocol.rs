//! Messages between the runtime facade and the simulation worker
//!
//! Both directions are closed enums; every variant must be handled where
//! they are matched. Serialized form is tagged by `type`:
//! `{"type":"NOTE_ON","note":60,"velocity":100,"audio_time":1.25}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Settings;
use crate::shared::SharedLayout;
use crate::sim::{GuideHighlight, JudgmentEvent, JudgmentKind, Note, Score};

/// Caller → simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Bind settings and shared buffers. Must be the first command.
    #[serde(skip)]
    Init {
        settings: Settings,
        layout: Arc<SharedLayout>,
    },
    LoadSong {
        notes: Vec<Note>,
    },
    SetSettings {
        settings: Settings,
    },
    Start {
        audio_time: f64,
        start_at: f64,
    },
    Pause {
        audio_time: f64,
    },
    Stop,
    Seek {
        time: f64,
        audio_time: f64,
    },
    NoteOn {
        note: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        velocity: Option<u8>,
        audio_time: f64,
    },
    NoteOff {
        note: u8,
        audio_time: f64,
    },
    RequestStateSnapshot,
}

impl Command {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init { .. } => "INIT",
            Command::LoadSong { .. } => "LOAD_SONG",
            Command::SetSettings { .. } => "SET_SETTINGS",
            Command::Start { .. } => "START",
            Command::Pause { .. } => "PAUSE",
            Command::Stop => "STOP",
            Command::Seek { .. } => "SEEK",
            Command::NoteOn { .. } => "NOTE_ON",
            Command::NoteOff { .. } => "NOTE_OFF",
            Command::RequestStateSnapshot => "REQUEST_STATE_SNAPSHOT",
        }
    }
}

/// Simulation → caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Ready,
    State {
        current_time: f64,
        score: Score,
        combo: u32,
    },
    Judgment {
        kind: JudgmentKind,
        /// ms, positive = late
        timing_error: f64,
        note_id: u32,
        timestamp: f64,
    },
    GuideHighlight {
        pitch: u8,
        timestamp: f64,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
}

impl Event {
    pub fn error(message: impl Into<String>, context: Option<&str>) -> Self {
        Event::Error {
            message: message.into(),
            context: context.map(str::to_owned),
        }
    }

    pub fn state(current_time: f64, score: &Score) -> Self {
        Event::State {
            current_time,
            score: score.clone(),
            combo: score.combo,
        }
    }
}

impl From<JudgmentEvent> for Event {
    fn from(event: JudgmentEvent) -> Self {
        Event::Judgment {
            kind: event.kind,
            timing_error: event.timing_error_ms,
            note_id: event.note_id,
            timestamp: event.timestamp,
        }
    }
}

impl From<GuideHighlight> for Event {
    fn from(highlight: GuideHighlight) -> Self {
        Event::GuideHighlight {
            pitch: highlight.pitch,
            timestamp: highlight.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_string(&Command::NoteOn {
            note: 60,
            velocity: None,
            audio_time: 1.5,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"NOTE_ON","note":60,"audio_time":1.5}"#);

        let command: Command =
            serde_json::from_str(r#"{"type":"SEEK","time":10.0,"audio_time":3.0}"#).unwrap();
        assert!(matches!(
            command,
            Command::Seek { time, audio_time } if time == 10.0 && audio_time == 3.0
        ));

        let command: Command = serde_json::from_str(r#"{"type":"STOP"}"#).unwrap();
        assert_eq!(command.name(), "STOP");
    }

    #[test]
    fn test_init_is_not_serializable() {
        let init = Command::Init {
            settings: Settings::default(),
            layout: Arc::new(SharedLayout::new(1).unwrap()),
        };
        assert_eq!(init.name(), "INIT");
        assert!(serde_json::to_string(&init).is_err());
        assert!(serde_json::from_str::<Command>(r#"{"type":"INIT"}"#).is_err());
    }

    #[test]
    fn test_event_wire_format() {
        let event = Event::from(JudgmentEvent {
            kind: JudgmentKind::Good,
            timing_error_ms: -12.5,
            note_id: 4,
            timestamp: 2.0,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "JUDGMENT");
        assert_eq!(json["kind"], "good");
        assert_eq!(json["timing_error"], -12.5);

        let error = Event::error("boom", None);
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"type":"ERROR","message":"boom"}"#
        );
        assert_eq!(
            serde_json::from_str::<Event>(r#"{"type":"READY"}"#).unwrap(),
            Event::Ready
        );
    }
}
