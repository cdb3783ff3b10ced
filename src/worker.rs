//! Simulation worker thread
//!
//! Owns the engine for one runtime. Commands arrive over a channel and are
//! applied between ticks; every tick samples the shared audio clock, advances
//! the engine and publishes the frame. Judgments and highlights go out as soon
//! as they happen, state summaries at most every [`STATE_THROTTLE_MS`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::consts::{STATE_THROTTLE_MS, TICK_INTERVAL_MS};
use crate::error::{EngineError, Result};
use crate::protocol::{Command, Event};
use crate::settings::Settings;
use crate::shared::SharedLayout;
use crate::sim::Engine;

const THREAD_NAME: &str = "keyfall-sim";

/// State created by `Init`
struct WorkerContext {
    engine: Engine,
    layout: Arc<SharedLayout>,
}

/// What woke the loop up
enum Wake {
    Command(Command),
    Tick,
}

pub struct SimulationWorker {
    commands: Receiver<Command>,
    events: Sender<Event>,
    context: Option<WorkerContext>,
    last_state: Option<Instant>,
}

/// Join handle for a spawned worker
pub struct WorkerHandle {
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the thread to exit. Drop the command sender first.
    pub fn join(self) {
        if self.thread.join().is_err() {
            log::error!("Simulation worker terminated abnormally");
        }
    }
}

impl SimulationWorker {
    /// Start the worker thread. It runs until `commands` disconnects or a
    /// tick panics.
    pub fn spawn(commands: Receiver<Command>, events: Sender<Event>) -> Result<WorkerHandle> {
        let worker = Self {
            commands,
            events,
            context: None,
            last_state: None,
        };
        let thread = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || worker.run())
            .map_err(|source| EngineError::Spawn {
                name: THREAD_NAME,
                source,
            })?;
        Ok(WorkerHandle { thread })
    }

    fn run(mut self) {
        log::info!("Simulation worker started");
        let ticker = crossbeam_channel::tick(Duration::from_millis(TICK_INTERVAL_MS));

        loop {
            let wake = crossbeam_channel::select! {
                recv(self.commands) -> command => match command {
                    Ok(command) => Wake::Command(command),
                    Err(_) => {
                        log::info!("Command channel closed, simulation worker exiting");
                        break;
                    }
                },
                recv(ticker) -> _ => Wake::Tick,
            };

            let context = match &wake {
                Wake::Command(command) => command.name(),
                Wake::Tick => "tick",
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match wake {
                Wake::Command(command) => self.handle_command(command),
                Wake::Tick => self.tick(),
            }));
            if let Err(payload) = outcome {
                let message = panic_message(payload.as_ref());
                log::error!("Simulation worker panicked: {message}");
                emit(&self.events, Event::error(message, Some(context)));
                break;
            }
        }
    }

    fn init(&mut self, settings: Settings, layout: Arc<SharedLayout>) {
        log::info!("Simulation worker initialized ({} note slots)", layout.capacity());
        self.context = Some(WorkerContext {
            engine: Engine::new(settings),
            layout,
        });
        self.last_state = None;
        emit(&self.events, Event::Ready);
    }

    fn handle_command(&mut self, command: Command) {
        let name = command.name();
        log::debug!("Command {name}");

        if let Command::Init { settings, layout } = command {
            self.init(settings, layout);
            return;
        }

        let Some(ctx) = self.context.as_mut() else {
            log::warn!("{name} received before INIT");
            emit(&self.events, Event::error("engine not initialized", Some(name)));
            return;
        };
        let engine = &mut ctx.engine;

        match command {
            Command::Init { .. } => {}
            Command::LoadSong { notes } => engine.load_song(notes),
            Command::SetSettings { settings } => engine.update_settings(settings),
            Command::Start {
                audio_time,
                start_at,
            } => engine.start(audio_time, start_at),
            Command::Pause { audio_time } => engine.pause(audio_time),
            Command::Stop => engine.stop(),
            Command::Seek { time, audio_time } => engine.seek(time, audio_time),
            Command::NoteOn {
                note,
                velocity,
                audio_time,
            } => {
                engine.note_on(note, audio_time, velocity);
                let (judgments, highlights) = engine.drain_events();
                for judgment in judgments {
                    emit(&self.events, judgment.into());
                }
                for highlight in highlights {
                    emit(&self.events, highlight.into());
                }
            }
            Command::NoteOff { note, audio_time } => engine.note_off(note, audio_time),
            Command::RequestStateSnapshot => {
                emit(&self.events, Event::state(engine.current_time(), engine.score()));
                self.last_state = Some(Instant::now());
            }
        }
    }

    fn tick(&mut self) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        let frame = ctx.engine.sync(ctx.layout.audio_time());
        ctx.layout.publish(&frame);

        for judgment in &frame.judgments {
            emit(&self.events, (*judgment).into());
        }
        for highlight in &frame.highlights {
            emit(&self.events, (*highlight).into());
        }

        let throttle = Duration::from_millis(STATE_THROTTLE_MS);
        if self.last_state.is_none_or(|sent| sent.elapsed() >= throttle) {
            emit(&self.events, Event::state(frame.current_time, &frame.score));
            self.last_state = Some(Instant::now());
        }
    }
}

fn emit(events: &Sender<Event>, event: Event) {
    if events.send(event).is_err() {
        log::trace!("Event receiver gone, dropping event");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{JudgmentKind, Note};

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        commands: Sender<Command>,
        events: Receiver<Event>,
        layout: Arc<SharedLayout>,
        handle: WorkerHandle,
    }

    fn start_worker() -> Harness {
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, events) = crossbeam_channel::unbounded();
        let handle = SimulationWorker::spawn(command_rx, event_tx).unwrap();
        let layout = Arc::new(SharedLayout::new(64).unwrap());
        Harness {
            commands,
            events,
            layout,
            handle,
        }
    }

    fn init(harness: &Harness) {
        harness
            .commands
            .send(Command::Init {
                settings: Settings::default(),
                layout: harness.layout.clone(),
            })
            .unwrap();
        assert_eq!(next_matching(harness, |e| matches!(e, Event::Ready)), Event::Ready);
    }

    fn next_matching(harness: &Harness, pred: impl Fn(&Event) -> bool) -> Event {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = harness
                .events
                .recv_timeout(remaining)
                .expect("event before deadline");
            if pred(&event) {
                return event;
            }
        }
    }

    fn wait_for(pred: impl Fn() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !pred() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_command_before_init_reports_error() {
        let harness = start_worker();
        harness
            .commands
            .send(Command::LoadSong { notes: Vec::new() })
            .unwrap();
        let event = next_matching(&harness, |e| matches!(e, Event::Error { .. }));
        assert_eq!(
            event,
            Event::Error {
                message: "engine not initialized".into(),
                context: Some("LOAD_SONG".into()),
            }
        );
    }

    #[test]
    fn test_hit_through_worker() {
        let harness = start_worker();
        init(&harness);

        let send = |command| harness.commands.send(command).unwrap();
        send(Command::LoadSong {
            notes: vec![Note {
                id: 7,
                pitch: 60,
                time: 2.0,
            }],
        });
        send(Command::Start {
            audio_time: 0.0,
            start_at: 0.0,
        });
        harness.layout.store_audio_time(0.5);
        wait_for(|| harness.layout.active_count() == 1);

        send(Command::NoteOn {
            note: 60,
            velocity: Some(90),
            audio_time: 2.0,
        });
        let event = next_matching(&harness, |e| matches!(e, Event::Judgment { .. }));
        assert_eq!(
            event,
            Event::Judgment {
                kind: JudgmentKind::Good,
                timing_error: 0.0,
                note_id: 7,
                timestamp: 2.0,
            }
        );

        send(Command::RequestStateSnapshot);
        let state = next_matching(&harness, |e| {
            matches!(e, Event::State { score, .. } if score.good_count == 1)
        });
        let Event::State { score, combo, .. } = state else {
            unreachable!()
        };
        assert_eq!(combo, 1);
        assert_eq!(score.score, 1000);
    }

    #[test]
    fn test_miss_emitted_from_tick() {
        let harness = start_worker();
        init(&harness);

        harness
            .commands
            .send(Command::LoadSong {
                notes: vec![Note {
                    id: 1,
                    pitch: 64,
                    time: 1.0,
                }],
            })
            .unwrap();
        harness
            .commands
            .send(Command::Start {
                audio_time: 0.0,
                start_at: 0.0,
            })
            .unwrap();
        harness.layout.store_audio_time(3.0);

        let event = next_matching(&harness, |e| matches!(e, Event::Judgment { .. }));
        let Event::Judgment { kind, note_id, .. } = event else {
            unreachable!()
        };
        assert_eq!(kind, JudgmentKind::Miss);
        assert_eq!(note_id, 1);
        wait_for(|| harness.layout.is_playing());
    }

    #[test]
    fn test_exits_when_commands_disconnect() {
        let harness = start_worker();
        init(&harness);
        let Harness {
            commands, handle, ..
        } = harness;
        drop(commands);
        wait_for(|| handle.is_finished());
        handle.join();
    }

    #[test]
    fn test_state_events_are_throttled() {
        let harness = start_worker();
        init(&harness);
        let started = Instant::now();

        harness
            .commands
            .send(Command::LoadSong {
                notes: (1..=3)
                    .map(|id| Note {
                        id,
                        pitch: 60,
                        time: id as f64 * 0.1,
                    })
                    .collect(),
            })
            .unwrap();
        harness
            .commands
            .send(Command::Start {
                audio_time: 0.0,
                start_at: 0.0,
            })
            .unwrap();
        harness.layout.store_audio_time(3.0);

        thread::sleep(Duration::from_millis(300));
        let elapsed = started.elapsed().as_millis() as usize;
        let events: Vec<Event> = harness.events.try_iter().collect();

        let states = events
            .iter()
            .filter(|e| matches!(e, Event::State { .. }))
            .count();
        assert!(states >= 1);
        assert!(
            states <= elapsed / STATE_THROTTLE_MS as usize + 2,
            "{states} state events in {elapsed}ms"
        );

        // Judgments are never throttled or batched
        let mut missed: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                Event::Judgment { note_id, .. } => Some(*note_id),
                _ => None,
            })
            .collect();
        missed.sort_unstable();
        assert_eq!(missed, vec![1, 2, 3]);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(3_u8);
        assert_eq!(panic_message(payload.as_ref()), "worker panicked");
    }
}
