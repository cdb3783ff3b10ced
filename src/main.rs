//! Keyfall headless driver
//!
//! Plays a song against the real-time engine with a simulated player and
//! prints the result. Useful for soak-testing timing without a renderer.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use keyfall::sim::{JudgmentKind, Note, Score, load_song_file};
use keyfall::{AudioClock, MonotonicClock, PracticeGuide, Runtime, RuntimeCallbacks, Settings};

/// Scale used for generated songs (C major, one octave from middle C)
const DEMO_SCALE: [u8; 8] = [60, 62, 64, 65, 67, 69, 71, 72];
/// First note of a generated song (seconds)
const DEMO_LEAD_IN: f64 = 2.0;
/// Time after the last note before the session ends (seconds, 1x speed)
const TAIL: f64 = 3.0;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless keyfall session driver", long_about = None)]
struct Cli {
    /// Song file (JSON array of notes). A seeded demo song is generated when omitted.
    #[arg(short, long)]
    song: Option<PathBuf>,

    /// Settings file (JSON)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Write the effective settings here before playing
    #[arg(long)]
    save_settings: Option<PathBuf>,

    /// Seed for the demo song and the simulated player
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Number of notes in the demo song
    #[arg(long, default_value_t = 32)]
    notes: u32,

    /// Player timing spread either side of the note (ms)
    #[arg(long, default_value_t = 40.0)]
    jitter_ms: f64,

    /// Fraction of notes the player never plays
    #[arg(long, default_value_t = 0.1)]
    skip_rate: f64,

    /// Playback speed override
    #[arg(long)]
    speed: Option<f64>,

    /// Practice guide: off, key or key_auto
    #[arg(long)]
    guide: Option<String>,
}

/// One simulated key press
#[derive(Debug, Clone, Copy)]
struct Press {
    pitch: u8,
    velocity: u8,
    /// Seconds after playback start on the audio clock
    at: f64,
}

fn main() -> keyfall::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(speed) = cli.speed {
        settings.playback_speed = speed;
    }
    if let Some(guide) = cli.guide.as_deref() {
        match PracticeGuide::from_str(guide) {
            Some(guide) => settings.practice_guide = guide,
            None => log::warn!(
                "Unknown practice guide '{guide}', keeping {}",
                settings.practice_guide.as_str()
            ),
        }
    }
    let settings = settings.sanitized();
    if let Some(path) = &cli.save_settings {
        settings.save(path)?;
        log::info!("Settings written to {}", path.display());
    }

    let mut rng = Pcg32::seed_from_u64(cli.seed);
    let notes = match &cli.song {
        Some(path) => load_song_file(path)?,
        None => demo_song(&mut rng, cli.notes),
    };
    log::info!("Song: {} notes, seed {}", notes.len(), cli.seed);

    let presses = plan_presses(&mut rng, &notes, &settings, cli.jitter_ms, cli.skip_rate);
    let last_note = notes.iter().map(|n| n.time).fold(0.0, f64::max);
    let duration = (last_note + settings.timing_adjustment_secs() + TAIL) / settings.speed();

    let score = play(settings, notes, &presses, duration)?;
    print_summary(&score);
    Ok(())
}

fn demo_song(rng: &mut Pcg32, count: u32) -> Vec<Note> {
    let mut time = DEMO_LEAD_IN;
    (0..count)
        .map(|id| {
            let note = Note {
                id,
                pitch: DEMO_SCALE[rng.random_range(0..DEMO_SCALE.len())],
                time,
            };
            time += rng.random_range(0.25..0.6);
            note
        })
        .collect()
}

/// When the simulated player hits each note, relative to playback start
fn plan_presses(
    rng: &mut Pcg32,
    notes: &[Note],
    settings: &Settings,
    jitter_ms: f64,
    skip_rate: f64,
) -> Vec<Press> {
    let jitter = jitter_ms.abs() / 1000.0;
    let skip_rate = skip_rate.clamp(0.0, 1.0);
    let mut presses = Vec::with_capacity(notes.len());
    for note in notes {
        if rng.random_bool(skip_rate) {
            continue;
        }
        let played = note.pitch as i32 + settings.transpose - 12 * settings.input_octave_shift;
        let offset = if jitter > 0.0 {
            rng.random_range(-jitter..=jitter)
        } else {
            0.0
        };
        let display = note.time + settings.timing_adjustment_secs();
        presses.push(Press {
            pitch: played.clamp(0, 127) as u8,
            velocity: rng.random_range(60..=110),
            at: display / settings.speed() + offset,
        });
    }
    presses.sort_by(|a, b| a.at.total_cmp(&b.at));
    presses
}

fn play(
    settings: Settings,
    notes: Vec<Note>,
    presses: &[Press],
    duration: f64,
) -> keyfall::Result<Score> {
    let latest = Arc::new(Mutex::new(Score::default()));
    let callbacks = RuntimeCallbacks::new()
        .on_ready(|| log::info!("Engine ready"))
        .on_state({
            let latest = latest.clone();
            move |_, score: &Score| {
                if let Ok(mut latest) = latest.lock() {
                    *latest = score.clone();
                }
            }
        })
        .on_judgment(|event| match event.kind {
            JudgmentKind::Good => log::info!(
                "Note {} good ({:+.1} ms) at {:.3}s",
                event.note_id,
                event.timing_error_ms,
                event.timestamp
            ),
            JudgmentKind::Miss => {
                log::info!("Note {} missed at {:.3}s", event.note_id, event.timestamp)
            }
        })
        .on_guide_highlight(|pitch, timestamp| {
            log::debug!("Guide: key {pitch} at {timestamp:.3}s")
        })
        .on_error(|message, context| {
            log::error!("Engine error: {message} ({})", context.unwrap_or("-"))
        });

    let mut runtime = Runtime::new(settings, callbacks)?;
    let clock = Arc::new(MonotonicClock::new());
    runtime.bind_audio_clock(clock.clone())?;
    runtime.load_song(notes)?;

    let origin = clock.current_time();
    runtime.start(origin, 0.0)?;

    let mut pending = presses.iter().peekable();
    loop {
        let elapsed = clock.current_time() - origin;
        while let Some(press) = pending.next_if(|p| p.at <= elapsed) {
            runtime.note_on(press.pitch, Some(press.velocity), origin + press.at)?;
            runtime.note_off(press.pitch, origin + press.at + 0.1)?;
        }
        runtime.dispatch_events();
        if elapsed > duration {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }

    runtime.request_state_snapshot()?;
    thread::sleep(Duration::from_millis(50));
    runtime.dispatch_events();
    runtime.dispose();
    runtime.dispatch_events();

    let score = latest.lock().map(|score| score.clone()).unwrap_or_default();
    Ok(score)
}

fn print_summary(score: &Score) {
    println!();
    println!("Notes:     {}", score.total_notes);
    println!("Good:      {}", score.good_count);
    println!("Miss:      {}", score.miss_count);
    println!("Max combo: {}", score.max_combo);
    println!("Accuracy:  {:.1}%", score.accuracy * 100.0);
    println!("Score:     {}", score.score);
    println!("Rank:      {}", score.rank.as_str());
}
