//! Polybeat CLI - The `polybeat` command.
//!
//! A terminal polyrhythm metronome on top of the scheduling engine:
//! one anchor voice, an optional polyrhythmic voice layered against it,
//! clicks rendered through the native cpal backend.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use polybeat_core::{
    ClickBackend, Conductor, Rhythm, RhythmParams, Subdivision, ToneParams,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Interval between scheduling passes. Must stay comfortably below the
/// conductor's look-ahead window.
const TICK_MILLIS: u64 = 25;

/// Polybeat - polyrhythm metronome
#[derive(Parser, Debug)]
#[command(name = "polybeat")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A polyrhythmic metronome", long_about = None)]
struct Args {
    /// Tempo in beats per minute
    #[arg(short, long, default_value_t = 120.0)]
    bpm: f64,

    /// Beats per measure of the anchor voice
    #[arg(short = 'n', long, default_value_t = 4)]
    beats: u32,

    /// Subdivision as a fraction of a beat (e.g. "1", "1/2", "1/3")
    #[arg(short, long, default_value = "1")]
    subdivision: String,

    /// Layer a polyrhythmic voice with this many beats over the measure
    #[arg(short, long)]
    poly: Option<u32>,

    /// Subdivision of the polyrhythmic voice
    #[arg(long, default_value = "1")]
    poly_subdivision: String,

    /// Base click frequency in Hz
    #[arg(long, default_value_t = 750.0)]
    frequency: f64,

    /// Click gain, 0.0 to 1.0
    #[arg(long, default_value_t = 0.5)]
    gain: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    ensure!(args.bpm > 0.0, "bpm must be positive, got {}", args.bpm);
    ensure!(args.beats > 0, "beats per measure must be at least 1");

    let subdivision = Subdivision::parse(&args.subdivision)
        .with_context(|| format!("invalid subdivision '{}'", args.subdivision))?;

    let backend = ClickBackend::open().context("failed to open audio output")?;
    let mut conductor = Conductor::new(Box::new(backend.clock()), args.bpm);

    let anchor_tone = ToneParams {
        frequency: args.frequency,
        gain: args.gain.clamp(0.0, 1.0),
        ..ToneParams::default()
    };
    let anchor = Rhythm::new(
        RhythmParams {
            beats: args.beats,
            poly: None,
            subdivision,
            pattern: Vec::new(),
        },
        Box::new(backend.emitter(anchor_tone)),
    );
    conductor.add_rhythm(anchor);

    if let Some(poly) = args.poly {
        let poly_subdivision = Subdivision::parse(&args.poly_subdivision)
            .with_context(|| format!("invalid subdivision '{}'", args.poly_subdivision))?;
        // Lower-pitched click so the two voices are distinguishable.
        let poly_tone = ToneParams {
            frequency: args.frequency - 200.0,
            gain: args.gain.clamp(0.0, 1.0),
            ..ToneParams::default()
        };
        let rhythm = Rhythm::new(
            RhythmParams {
                beats: args.beats,
                poly: Some(poly),
                subdivision: poly_subdivision,
                pattern: Vec::new(),
            },
            Box::new(backend.emitter(poly_tone)),
        );
        conductor.add_rhythm(rhythm);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, interrupted.clone())
        .context("failed to install signal handler")?;

    conductor.start();
    match args.poly {
        Some(poly) => println!(
            "Playing {} over {} at {} bpm. Ctrl-C to stop.",
            poly, args.beats, args.bpm
        ),
        None => println!(
            "Playing {} beats at {} bpm. Ctrl-C to stop.",
            args.beats, args.bpm
        ),
    }

    while !interrupted.load(Ordering::Relaxed) {
        conductor.tick();
        thread::sleep(Duration::from_millis(TICK_MILLIS));
    }

    conductor.stop();
    log::info!("interrupted, shutting down");
    Ok(())
}
