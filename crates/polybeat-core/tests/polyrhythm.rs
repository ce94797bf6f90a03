//! End-to-end scheduling tests against a manual clock.
//!
//! These drive a full [`Conductor`] the way the timer loop would, with a
//! recording emitter standing in for the audio backend, and verify the
//! engine's audible timing properties: polyrhythm phase alignment, live
//! tempo changes, mute behavior, and the stop invariant.

use polybeat_core::{
    Conductor, ManualClock, Rhythm, RhythmParams, SoundEmitter, SoundHandle, Subdivision,
    ToneParams,
};
use std::sync::{Arc, Mutex};

/// One recorded trigger: (target_time, is_first_beat, is_subdivided).
type PlayCall = (f64, bool, bool);

#[derive(Clone, Default)]
struct Recording {
    calls: Arc<Mutex<Vec<PlayCall>>>,
    handles: Arc<Mutex<Vec<SoundHandle>>>,
}

impl Recording {
    fn times(&self) -> Vec<f64> {
        self.calls.lock().unwrap().iter().map(|c| c.0).collect()
    }
}

struct RecordingEmitter {
    recording: Recording,
}

impl SoundEmitter for RecordingEmitter {
    fn play(&mut self, target_time: f64, is_first_beat: bool, is_subdivided: bool) -> SoundHandle {
        self.recording
            .calls
            .lock()
            .unwrap()
            .push((target_time, is_first_beat, is_subdivided));
        let handle = SoundHandle::new();
        self.recording.handles.lock().unwrap().push(handle.clone());
        handle
    }

    fn update_frequency(&mut self, _frequency: f64) {}

    fn update_tone(&mut self, _params: ToneParams) {}
}

fn recorded_rhythm(params: RhythmParams) -> (Rhythm, Recording) {
    let _ = env_logger::builder().is_test(true).try_init();
    let recording = Recording::default();
    let emitter = RecordingEmitter {
        recording: recording.clone(),
    };
    (Rhythm::new(params, Box::new(emitter)), recording)
}

fn poly_params(beats: u32, poly: u32) -> RhythmParams {
    RhythmParams {
        beats,
        poly: Some(poly),
        subdivision: Subdivision::QUARTER,
        pattern: Vec::new(),
    }
}

/// Run the clock from its current time to `until` in small steps, ticking
/// the conductor the way the timer loop would.
fn run_until(conductor: &mut Conductor, clock: &ManualClock, until: f64) {
    const STEP: f64 = 0.025;
    while conductor.current_time() < until {
        clock.advance(STEP.min(until - conductor.current_time()));
        conductor.tick();
    }
}

fn assert_times(actual: &[f64], expected: &[f64]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "expected {expected:?}, got {actual:?}"
    );
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-6, "expected {expected:?}, got {actual:?}");
    }
}

#[test]
fn four_against_three_shares_every_bar_downbeat() {
    let clock = ManualClock::new();
    let mut conductor = Conductor::new(Box::new(clock.clone()), 120.0);

    let (anchor, anchor_rec) = recorded_rhythm(RhythmParams::simple(4));
    let (poly, poly_rec) = recorded_rhythm(poly_params(4, 3));
    conductor.add_rhythm(anchor);
    conductor.add_rhythm(poly);
    conductor.start();
    conductor.tick();

    // One anchor bar is 4 x 0.5s = 2.0s; drive until its downbeat is
    // inside the look-ahead window.
    run_until(&mut conductor, &clock, 1.95);

    // Anchor ticks every 0.5s; the poly voice ticks every (4/3)*0.5s and
    // fires exactly 3 times per bar, reconverging at 2.0s.
    assert_times(&anchor_rec.times(), &[0.0, 0.5, 1.0, 1.5, 2.0]);
    assert_times(
        &poly_rec.times(),
        &[0.0, 2.0 / 3.0, 4.0 / 3.0, 2.0],
    );

    let in_first_bar = poly_rec
        .times()
        .iter()
        .filter(|&&t| t < 2.0 - 1e-6)
        .count();
    assert_eq!(in_first_bar, 3);
}

#[test]
fn voice_added_mid_bar_lands_on_next_shared_position() {
    let clock = ManualClock::new();
    let mut conductor = Conductor::new(Box::new(clock.clone()), 120.0);

    let (anchor, _) = recorded_rhythm(RhythmParams::simple(4));
    conductor.add_rhythm(anchor);
    conductor.start();
    conductor.tick();

    // Anchor reaches beat 3 (pending trigger at 1.0s) before the poly
    // voice joins.
    run_until(&mut conductor, &clock, 0.55);
    assert_eq!(conductor.rhythm(0).unwrap().beat_track(), 3.0);

    let (poly, poly_rec) = recorded_rhythm(poly_params(4, 3));
    conductor.add_rhythm(poly);
    run_until(&mut conductor, &clock, 1.95);

    // Had the poly voice run from the bar start it would tick at 0, 2/3,
    // 4/3; joining mid-bar it must pick up at 4/3 — not restart, not drift.
    assert_times(&poly_rec.times(), &[4.0 / 3.0, 2.0]);
}

#[test]
fn live_tempo_change_keeps_spacing_coherent() {
    let clock = ManualClock::new();
    let mut conductor = Conductor::new(Box::new(clock.clone()), 120.0);

    let (anchor, recording) = recorded_rhythm(RhythmParams::simple(4));
    conductor.add_rhythm(anchor);
    conductor.start();
    conductor.tick();
    run_until(&mut conductor, &clock, 0.3);

    // Pending trigger at 0.5s has 0.2s (fraction 0.4) remaining; at 90 bpm
    // the same fraction of the new 2/3s interval is ~0.267s.
    conductor.update_tempo(90.0);
    run_until(&mut conductor, &clock, 1.85);

    let times = recording.times();
    let retimed = 0.3 + 0.4 * (60.0 / 90.0);
    assert_times(
        &times,
        &[0.0, retimed, retimed + 2.0 / 3.0, retimed + 4.0 / 3.0],
    );
}

#[test]
fn muted_steps_notify_without_sounding() {
    let clock = ManualClock::new();
    let mut conductor = Conductor::new(Box::new(clock.clone()), 120.0);

    let (mut rhythm, recording) = recorded_rhythm(RhythmParams::simple(4));
    rhythm.set_pattern(1, false);
    let beats = Arc::new(Mutex::new(Vec::new()));
    let sink = beats.clone();
    rhythm.on_beat_changed(move |beat| sink.lock().unwrap().push(beat));

    conductor.add_rhythm(rhythm);
    conductor.start();
    conductor.tick();
    run_until(&mut conductor, &clock, 1.45);

    // Beats 1, 3 and 4 sound; beat 2 is muted but still announced.
    assert_times(&recording.times(), &[0.0, 1.0, 1.5]);
    assert!(beats.lock().unwrap().contains(&2.0));

    // Finishing the sounds delivers the remaining notifications in order.
    for handle in recording.handles.lock().unwrap().iter() {
        handle.finish();
    }
    conductor.tick();
    assert_eq!(beats.lock().unwrap().as_slice(), &[2.0, 1.0, 3.0, 4.0]);
}

#[test]
fn stop_silences_and_resets_all_voices() {
    let clock = ManualClock::new();
    let mut conductor = Conductor::new(Box::new(clock.clone()), 120.0);

    let (anchor, anchor_rec) = recorded_rhythm(RhythmParams::simple(4));
    let (poly, poly_rec) = recorded_rhythm(poly_params(4, 3));
    conductor.add_rhythm(anchor);
    conductor.add_rhythm(poly);
    conductor.start();
    conductor.tick();
    run_until(&mut conductor, &clock, 0.8);

    conductor.stop();
    assert!(!conductor.is_running());
    for index in 0..conductor.len() {
        let rhythm = conductor.rhythm(index).unwrap();
        assert!(rhythm.is_stopped());
        assert_eq!(rhythm.beat_track(), 1.0);
        assert_eq!(rhythm.step(), 0);
    }
    for handles in [&anchor_rec.handles, &poly_rec.handles] {
        for handle in handles.lock().unwrap().iter() {
            assert!(handle.is_cancelled());
        }
    }

    // A stopped conductor schedules nothing more.
    let sounded = anchor_rec.times().len();
    run_until(&mut conductor, &clock, 2.0);
    assert_eq!(anchor_rec.times().len(), sounded);
}

#[test]
fn beat_count_edit_commits_on_the_next_downbeat() {
    let clock = ManualClock::new();
    let mut conductor = Conductor::new(Box::new(clock.clone()), 120.0);

    let (rhythm, recording) = recorded_rhythm(RhythmParams::simple(4));
    conductor.add_rhythm(rhythm);
    conductor.start();
    conductor.tick();
    run_until(&mut conductor, &clock, 0.3);

    let running = conductor.is_running();
    conductor
        .rhythm_mut(0)
        .unwrap()
        .request_beat_count_change(Some(3), None, running);
    assert_eq!(conductor.rhythm(0).unwrap().pattern().len(), 4);

    // The rest of the 4-beat measure plays out; the next downbeat commits
    // the 3-beat measure, so triggers continue 0.5s apart throughout.
    run_until(&mut conductor, &clock, 3.45);
    assert_eq!(conductor.rhythm(0).unwrap().beats(), 3);
    assert_eq!(conductor.rhythm(0).unwrap().pattern().len(), 3);

    let times = recording.times();
    let expected: Vec<f64> = (0..times.len()).map(|i| i as f64 * 0.5).collect();
    assert_times(&times, &expected);

    // Downbeats fall at 0 (4-beat bar), 2.0, 3.5 (3-beat bars).
    let downbeats: Vec<f64> = recording
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|call| call.1)
        .map(|call| call.0)
        .collect();
    assert_times(&downbeats, &[0.0, 2.0, 3.5]);
}
