//! Caller-side facade
//!
//! A [`Runtime`] allocates the shared layout, starts the simulation worker and
//! forwards commands to it. Events come back over a channel and are delivered
//! to [`RuntimeCallbacks`] when the caller pumps [`Runtime::dispatch_events`],
//! so callbacks always run on the caller's thread.
//!
//! An [`AudioClock`] can be bound to feed the shared audio-time slot from a
//! bridge thread. Without one, the caller writes it with
//! [`Runtime::set_audio_time`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::consts::{DEFAULT_NOTE_CAPACITY, TICK_INTERVAL_MS};
use crate::error::{EngineError, Result};
use crate::protocol::{Command, Event};
use crate::settings::Settings;
use crate::shared::SharedLayout;
use crate::sim::{JudgmentEvent, Note, Score};
use crate::worker::{SimulationWorker, WorkerHandle};

const BRIDGE_THREAD_NAME: &str = "keyfall-clock";

/// Source of audio time. Sampled from the bridge thread.
pub trait AudioClock: Send + Sync {
    /// Seconds on the audio transport
    fn current_time(&self) -> f64;

    /// Output latency in seconds
    fn output_latency(&self) -> f64 {
        0.0
    }
}

/// Wall-clock stand-in for an audio transport
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
    latency: f64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::with_latency(0.0)
    }

    pub fn with_latency(latency: f64) -> Self {
        Self {
            origin: Instant::now(),
            latency,
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for MonotonicClock {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn output_latency(&self) -> f64 {
        self.latency
    }
}

/// Event handlers. Unset handlers drop their events.
#[derive(Default)]
pub struct RuntimeCallbacks {
    ready: Option<Box<dyn FnMut() + Send>>,
    state: Option<Box<dyn FnMut(f64, &Score) + Send>>,
    judgment: Option<Box<dyn FnMut(JudgmentEvent) + Send>>,
    guide_highlight: Option<Box<dyn FnMut(u8, f64) + Send>>,
    error: Option<Box<dyn FnMut(&str, Option<&str>) + Send>>,
}

impl RuntimeCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_ready(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.ready = Some(Box::new(f));
        self
    }

    /// `(current_time, score)`, at most ~30 times a second
    pub fn on_state(mut self, f: impl FnMut(f64, &Score) + Send + 'static) -> Self {
        self.state = Some(Box::new(f));
        self
    }

    pub fn on_judgment(mut self, f: impl FnMut(JudgmentEvent) + Send + 'static) -> Self {
        self.judgment = Some(Box::new(f));
        self
    }

    /// `(pitch, timestamp)`
    pub fn on_guide_highlight(mut self, f: impl FnMut(u8, f64) + Send + 'static) -> Self {
        self.guide_highlight = Some(Box::new(f));
        self
    }

    /// `(message, context)`
    pub fn on_error(mut self, f: impl FnMut(&str, Option<&str>) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Ready => {
                if let Some(f) = self.ready.as_mut() {
                    f();
                }
            }
            Event::State {
                current_time,
                score,
                ..
            } => {
                if let Some(f) = self.state.as_mut() {
                    f(current_time, &score);
                }
            }
            Event::Judgment {
                kind,
                timing_error,
                note_id,
                timestamp,
            } => {
                if let Some(f) = self.judgment.as_mut() {
                    f(JudgmentEvent {
                        kind,
                        timing_error_ms: timing_error,
                        note_id,
                        timestamp,
                    });
                }
            }
            Event::GuideHighlight { pitch, timestamp } => {
                if let Some(f) = self.guide_highlight.as_mut() {
                    f(pitch, timestamp);
                }
            }
            Event::Error { message, context } => {
                self.report(&message, context.as_deref());
            }
        }
    }

    fn report(&mut self, message: &str, context: Option<&str>) {
        match self.error.as_mut() {
            Some(f) => f(message, context),
            None => log::error!("{message} ({})", context.unwrap_or("-")),
        }
    }

    /// Surface an initialization failure, then hand it back
    fn fail(&mut self, err: EngineError) -> EngineError {
        self.report(&err.to_string(), Some(err.context()));
        err
    }
}

/// Bridge thread copying an audio clock into the shared clock slots
struct ClockBridge {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ClockBridge {
    fn spawn(clock: Arc<dyn AudioClock>, layout: Arc<SharedLayout>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let period = Duration::from_millis(TICK_INTERVAL_MS);

        let thread = thread::Builder::new()
            .name(BRIDGE_THREAD_NAME.into())
            .spawn(move || {
                log::debug!("Clock bridge started");
                while !flag.load(Ordering::Acquire) {
                    layout.store_audio_time(clock.current_time());
                    layout.store_latency(clock.output_latency());
                    thread::park_timeout(period);
                }
                log::debug!("Clock bridge stopped");
            })
            .map_err(|source| EngineError::Spawn {
                name: BRIDGE_THREAD_NAME,
                source,
            })?;
        Ok(Self { stop, thread })
    }

    fn shutdown(self) {
        self.stop.store(true, Ordering::Release);
        self.thread.thread().unpark();
        if self.thread.join().is_err() {
            log::error!("Clock bridge terminated abnormally");
        }
    }
}

/// Handle to one running engine instance
pub struct Runtime {
    layout: Arc<SharedLayout>,
    /// `None` once disposed
    commands: Option<Sender<Command>>,
    events: Receiver<Event>,
    worker: Option<WorkerHandle>,
    bridge: Option<ClockBridge>,
    callbacks: RuntimeCallbacks,
}

impl Runtime {
    pub fn new(settings: Settings, callbacks: RuntimeCallbacks) -> Result<Self> {
        Self::with_capacity(settings, DEFAULT_NOTE_CAPACITY, callbacks)
    }

    /// Start a runtime whose shared layout holds `capacity` note records.
    ///
    /// Failures are reported through `on_error` and returned.
    pub fn with_capacity(
        settings: Settings,
        capacity: usize,
        mut callbacks: RuntimeCallbacks,
    ) -> Result<Self> {
        let layout = match SharedLayout::new(capacity) {
            Ok(layout) => Arc::new(layout),
            Err(err) => return Err(callbacks.fail(err)),
        };

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let worker = match SimulationWorker::spawn(command_rx, event_tx) {
            Ok(worker) => worker,
            Err(err) => return Err(callbacks.fail(err)),
        };

        let runtime = Self {
            layout: layout.clone(),
            commands: Some(command_tx),
            events: event_rx,
            worker: Some(worker),
            bridge: None,
            callbacks,
        };
        runtime.send(Command::Init { settings, layout })?;
        log::info!("Runtime started ({capacity} note slots)");
        Ok(runtime)
    }

    /// Shared frame buffers for renderers
    pub fn shared(&self) -> Arc<SharedLayout> {
        self.layout.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.commands.is_none()
    }

    /// Feed the shared audio clock from `clock` every tick. Replaces any
    /// previously bound clock.
    pub fn bind_audio_clock(&mut self, clock: Arc<dyn AudioClock>) -> Result<()> {
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }
        self.unbind_audio_clock();
        self.bridge = Some(ClockBridge::spawn(clock, self.layout.clone())?);
        Ok(())
    }

    pub fn unbind_audio_clock(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.shutdown();
        }
    }

    /// Write the audio-time slot directly. A bound clock overwrites it on
    /// its next sample.
    pub fn set_audio_time(&self, secs: f64) {
        self.layout.store_audio_time(secs);
    }

    pub fn audio_time(&self) -> f64 {
        self.layout.audio_time()
    }

    pub fn load_song(&self, notes: Vec<Note>) -> Result<()> {
        self.send(Command::LoadSong { notes })
    }

    pub fn update_settings(&self, settings: Settings) -> Result<()> {
        self.send(Command::SetSettings { settings })
    }

    pub fn start(&self, audio_time: f64, start_at: f64) -> Result<()> {
        self.send(Command::Start {
            audio_time,
            start_at,
        })
    }

    pub fn pause(&self, audio_time: f64) -> Result<()> {
        self.send(Command::Pause { audio_time })
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn seek(&self, time: f64, audio_time: f64) -> Result<()> {
        self.send(Command::Seek { time, audio_time })
    }

    /// `audio_time` is when the key physically went down
    pub fn note_on(&self, note: u8, velocity: Option<u8>, audio_time: f64) -> Result<()> {
        self.send(Command::NoteOn {
            note,
            velocity,
            audio_time,
        })
    }

    pub fn note_off(&self, note: u8, audio_time: f64) -> Result<()> {
        self.send(Command::NoteOff { note, audio_time })
    }

    pub fn request_state_snapshot(&self) -> Result<()> {
        self.send(Command::RequestStateSnapshot)
    }

    /// Deliver every pending event to the callbacks. Returns how many.
    pub fn dispatch_events(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.events.try_recv() {
            self.callbacks.dispatch(event);
            count += 1;
        }
        count
    }

    /// Stop the clock bridge and the worker. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.unbind_audio_clock();
        let Some(commands) = self.commands.take() else {
            return;
        };
        drop(commands);
        if let Some(worker) = self.worker.take() {
            worker.join();
        }
        log::info!("Runtime disposed");
    }

    fn send(&self, command: Command) -> Result<()> {
        let commands = self.commands.as_ref().ok_or(EngineError::Disposed)?;
        commands.send(command).map_err(|_| EngineError::Disposed)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.dispose();
    }
}
