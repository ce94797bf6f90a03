//! The per-voice rhythm state machine.
//!
//! A [`Rhythm`] owns one pattern's beat-position state: the current step,
//! the absolute time of its next trigger, the on/off pattern, and any
//! staged edits. The conductor drives it through `fire`/`advance`; the
//! rhythm decides when its next tick occurs and which accents apply.
//!
//! Edits requested while running never touch the in-flight measure:
//! beat-count changes are staged and committed by the first `fire` that
//! observes beat one, subdivision changes are staged and consumed by the
//! next `advance` as a one-shot phase-preserving jump onto the new grid.

use crate::emitter::{SoundEmitter, SoundHandle, ToneParams};
use crate::timing::{beat_grid, is_fractional, snap, Subdivision, ALIGN_EPSILON};

/// Listener for events carrying a beat position.
pub type BeatListener = Box<dyn FnMut(f64) + Send>;
/// Listener for pattern-length notifications.
pub type LengthListener = Box<dyn FnMut(usize) + Send>;

/// Staged beat-count edit, drained exactly once at a cycle boundary.
#[derive(Clone, Copy, Debug, Default)]
struct PendingBeats {
    base: Option<u32>,
    poly: Option<u32>,
}

#[derive(Default)]
struct RhythmListeners {
    beat_changed: Vec<BeatListener>,
    pattern_length_changed: Vec<LengthListener>,
    cycle_fired: Vec<BeatListener>,
}

struct ActiveSound {
    handle: SoundHandle,
    beat: f64,
}

/// Construction parameters for a [`Rhythm`].
#[derive(Clone, Debug)]
pub struct RhythmParams {
    /// Beats per measure.
    pub beats: u32,
    /// Polyrhythmic beat count; `None` means same as `beats`.
    pub poly: Option<u32>,
    /// Fraction of a beat between successive steps.
    pub subdivision: Subdivision,
    /// Initial on/off pattern; resized to the step count, padding with on.
    pub pattern: Vec<bool>,
}

impl RhythmParams {
    /// A plain `beats`-per-measure voice with quarter-note steps, all on.
    pub fn simple(beats: u32) -> Self {
        Self {
            beats,
            poly: None,
            subdivision: Subdivision::QUARTER,
            pattern: Vec::new(),
        }
    }
}

/// One voice's rhythmic timing state.
pub struct Rhythm {
    beats: u32,
    poly: u32,
    subdivision: Subdivision,
    step: usize,
    beat_track: f64,
    next_note: f64,
    stopped: bool,
    pattern: Vec<bool>,
    pending_subdivision: Option<Subdivision>,
    pending_beats: Option<PendingBeats>,
    emitter: Box<dyn SoundEmitter>,
    active_sounds: Vec<ActiveSound>,
    listeners: RhythmListeners,
}

impl Rhythm {
    /// Create a rhythm in the idle (stopped) state.
    pub fn new(params: RhythmParams, emitter: Box<dyn SoundEmitter>) -> Self {
        let beats = params.beats.max(1);
        let poly = params.poly.unwrap_or(beats).max(1);
        let mut rhythm = Self {
            beats,
            poly,
            subdivision: params.subdivision,
            step: 0,
            beat_track: 1.0,
            next_note: 0.0,
            stopped: true,
            pattern: params.pattern,
            pending_subdivision: None,
            pending_beats: None,
            emitter,
            active_sounds: Vec::new(),
            listeners: RhythmListeners::default(),
        };
        let total = rhythm.total_steps();
        rhythm.pattern.resize(total, true);
        rhythm
    }

    /// Beats per measure.
    pub fn beats(&self) -> u32 {
        self.beats
    }

    /// Polyrhythmic beat count (equals `beats` for non-poly voices).
    pub fn poly(&self) -> u32 {
        self.poly
    }

    /// Whether this voice plays a polyrhythm against its base beat count.
    pub fn is_poly(&self) -> bool {
        self.beats != self.poly
    }

    /// Current subdivision.
    pub fn subdivision(&self) -> Subdivision {
        self.subdivision
    }

    /// Current step index into the pattern.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Continuous 1-based position within the measure.
    pub fn beat_track(&self) -> f64 {
        self.beat_track
    }

    /// Absolute time of the next scheduled trigger.
    pub fn next_note(&self) -> f64 {
        self.next_note
    }

    /// Whether the voice is idle/stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// The on/off pattern.
    pub fn pattern(&self) -> &[bool] {
        &self.pattern
    }

    /// Beat count the step grid is built over: `poly` for polyrhythmic
    /// voices, `beats` otherwise.
    pub fn beat_source(&self) -> u32 {
        if self.beats != self.poly {
            self.poly
        } else {
            self.beats
        }
    }

    /// Number of steps in one measure under the current subdivision.
    pub fn total_steps(&self) -> usize {
        self.subdivision.steps_in(self.beat_source())
    }

    /// Canonical per-step duration in seconds.
    ///
    /// `60/bpm` scaled by the voice's `beats/poly` ratio and divided by the
    /// subdivision's ticks per beat. All timing derives from this.
    pub fn tick_interval(&self, bpm: f64) -> f64 {
        let seconds_per_beat = 60.0 / bpm;
        let beat_scale = f64::from(self.beats) / f64::from(self.poly);
        seconds_per_beat * beat_scale / self.subdivision.ticks_per_beat()
    }

    /// Reset to step 0 / beat 1 with the next trigger at `now`.
    pub fn init(&mut self, now: f64) {
        self.next_note = now;
        self.stopped = false;
        self.step = 0;
        self.beat_track = 1.0;
    }

    /// Compute the next trigger time and advance the step state.
    ///
    /// A staged subdivision change is consumed here as a one-shot jump onto
    /// the new grid instead of a normal step. A voice whose trigger time
    /// fell into the past (e.g. after the host was suspended) catches up in
    /// one computed jump rather than looping tick by tick.
    pub fn advance(&mut self, bpm: f64, now: f64) {
        if self.pending_subdivision.is_some() {
            self.apply_subdivision_transition(bpm, now);
            return;
        }

        let interval = self.tick_interval(bpm);
        if self.next_note <= now {
            let steps_late = ((now - self.next_note) / interval).floor() as usize + 1;
            log::debug!("rhythm fell behind, catching up {steps_late} steps");
            self.next_note += steps_late as f64 * interval;
            self.track_beat(steps_late);
        } else {
            self.next_note += interval;
            self.track_beat(1);
        }
    }

    /// Retime the pending trigger so its phase fraction survives a tempo
    /// change. A trigger already due is left alone; the next `advance`
    /// recomputes naturally from the new tempo.
    pub fn apply_tempo_change(&mut self, old_bpm: f64, new_bpm: f64, now: f64) {
        if self.next_note <= now {
            return;
        }
        let remaining = self.next_note - now;
        let fraction = remaining / self.tick_interval(old_bpm);
        self.next_note = now + fraction * self.tick_interval(new_bpm);
    }

    /// Trigger the current step.
    ///
    /// Commits staged beat-count edits when the cycle boundary is observed,
    /// notifies `cycle_fired`, and either schedules a sound (deferring the
    /// visible-beat notification to its completion) or, for a muted step,
    /// notifies immediately.
    pub fn fire(&mut self) {
        let temp_beat = self.beat_track;

        if temp_beat == 1.0 {
            if let Some(change) = self.pending_beats.take() {
                self.commit_beat_change(change);
            }
        }

        self.emit_cycle_fired(temp_beat);

        let index = ((temp_beat - 1.0) / self.subdivision.as_beats()).round() as usize;
        if self.pattern.get(index).copied().unwrap_or(false) {
            let handle = self
                .emitter
                .play(self.next_note, temp_beat == 1.0, is_fractional(temp_beat));
            self.active_sounds.push(ActiveSound {
                handle,
                beat: temp_beat,
            });
        } else {
            self.emit_beat_changed(temp_beat);
        }
    }

    /// Observe completed sounds and publish their visible-beat events.
    ///
    /// Called on every scheduling pass; this is how the emitter's deferred
    /// completion re-enters the cooperative loop.
    pub fn poll_completions(&mut self) {
        let mut completed = Vec::new();
        self.active_sounds.retain(|sound| {
            if sound.handle.is_finished() {
                completed.push(sound.beat);
                false
            } else {
                true
            }
        });
        if !self.stopped {
            for beat in completed {
                self.emit_beat_changed(beat);
            }
        }
    }

    /// Force-reset to step 0 / beat 1 and silence in-flight sounds.
    pub fn stop(&mut self) {
        self.stopped = true;
        for sound in self.active_sounds.drain(..) {
            sound.handle.cancel();
        }
        self.beat_track = 1.0;
        self.step = 0;
        self.next_note = 0.0;
        self.emit_beat_changed(1.0);
    }

    /// Set one pattern step on or off. Out-of-range indices are ignored.
    pub fn set_pattern(&mut self, index: usize, on: bool) {
        if let Some(slot) = self.pattern.get_mut(index) {
            *slot = on;
        }
    }

    /// Replace the whole pattern, padding or truncating to the step count.
    pub fn replace_pattern(&mut self, values: Vec<bool>) {
        self.pattern = values;
        let total = self.total_steps();
        self.pattern.resize(total, true);
    }

    /// Stage a beat-count edit.
    ///
    /// Merged into the single pending slot; while running it is committed by
    /// the first `fire` that observes beat one, otherwise immediately.
    pub fn request_beat_count_change(
        &mut self,
        base: Option<u32>,
        poly: Option<u32>,
        is_running: bool,
    ) {
        let slot = self.pending_beats.get_or_insert_with(PendingBeats::default);
        if base.is_some() {
            slot.base = base;
        }
        if poly.is_some() {
            slot.poly = poly;
        }
        if !is_running {
            if let Some(change) = self.pending_beats.take() {
                self.commit_beat_change(change);
            }
        }
    }

    /// Stage a subdivision change.
    ///
    /// While running it is consumed by the next `advance`; on an idle voice
    /// it applies immediately.
    pub fn request_subdivision_change(&mut self, subdivision: Subdivision) {
        if self.stopped {
            self.subdivision = subdivision;
            self.pending_subdivision = None;
            self.resize_pattern();
            return;
        }
        self.pending_subdivision = Some(subdivision);
    }

    /// Update the emitter's base frequency.
    pub fn update_frequency(&mut self, frequency: f64) {
        self.emitter.update_frequency(frequency);
    }

    /// Update the emitter's full tone parameter set.
    pub fn update_tone(&mut self, params: ToneParams) {
        self.emitter.update_tone(params);
    }

    /// Register a visible-beat listener.
    pub fn on_beat_changed(&mut self, listener: impl FnMut(f64) + Send + 'static) {
        self.listeners.beat_changed.push(Box::new(listener));
    }

    /// Register a pattern-length listener.
    pub fn on_pattern_length_changed(&mut self, listener: impl FnMut(usize) + Send + 'static) {
        self.listeners.pattern_length_changed.push(Box::new(listener));
    }

    /// Register a listener for every scheduled fire (beat index payload).
    pub fn on_cycle_fired(&mut self, listener: impl FnMut(f64) + Send + 'static) {
        self.listeners.cycle_fired.push(Box::new(listener));
    }

    /// Drop all registered listeners.
    pub fn clear_listeners(&mut self) {
        self.listeners.beat_changed.clear();
        self.listeners.pattern_length_changed.clear();
        self.listeners.cycle_fired.clear();
    }

    /// Place the voice at an externally computed phase (polyrhythm
    /// alignment) and mark it live.
    pub(crate) fn align_to(&mut self, step: usize, beat_track: f64, next_note: f64) {
        self.step = step;
        self.beat_track = snap(beat_track);
        self.next_note = next_note;
        self.stopped = false;
    }

    fn track_beat(&mut self, steps: usize) {
        let total = self.total_steps();
        self.step = (self.step + steps) % total;
        self.beat_track = snap(self.step as f64 * self.subdivision.as_beats() + 1.0);
    }

    /// One-shot jump onto the grid of a staged subdivision.
    ///
    /// Lands on the first new-grid position strictly after the current
    /// beat position (wrapping into the next cycle when none remains), so a
    /// transition never replays a beat and never skips the next valid tick.
    fn apply_subdivision_transition(&mut self, bpm: f64, now: f64) {
        let Some(new_subdivision) = self.pending_subdivision.take() else {
            return;
        };

        let grid = beat_grid(self.beat_source(), new_subdivision);
        let landing = grid
            .iter()
            .enumerate()
            .find(|(_, &position)| position > self.beat_track + ALIGN_EPSILON);
        let (step, target, delta_beats) = match landing {
            Some((step, &position)) => (step, position, position - self.beat_track),
            // Past the last grid position: wrap to beat one of the next cycle.
            None => {
                let delta = f64::from(self.beat_source()) + 1.0 - self.beat_track;
                (0, 1.0, delta)
            }
        };

        let seconds_per_beat = 60.0 / bpm;
        let beat_scale = f64::from(self.beats) / f64::from(self.poly);
        let delta_seconds = delta_beats * seconds_per_beat * beat_scale;

        log::trace!(
            "subdivision transition {} -> {}: beat {} -> {} (+{delta_beats} beats)",
            self.subdivision,
            new_subdivision,
            self.beat_track,
            target,
        );

        self.subdivision = new_subdivision;
        self.step = step;
        self.beat_track = snap(target);
        let anchor = now.max(self.next_note);
        self.next_note = anchor + delta_seconds;
        self.resize_pattern();
    }

    fn commit_beat_change(&mut self, change: PendingBeats) {
        let was_poly = self.is_poly();
        if let Some(base) = change.base {
            if !was_poly {
                self.poly = change.poly.unwrap_or(base);
            }
            self.beats = base;
        }
        if let Some(poly) = change.poly {
            self.poly = poly;
        }
        log::debug!(
            "committed beat counts at cycle boundary: beats={} poly={}",
            self.beats,
            self.poly
        );
        self.resize_pattern();
    }

    /// Keep `pattern.len() == total_steps`, padding with on.
    fn resize_pattern(&mut self) {
        let total = self.total_steps();
        if self.pattern.len() != total {
            self.pattern.resize(total, true);
            self.emit_pattern_length_changed(total);
        }
    }

    fn emit_beat_changed(&mut self, beat: f64) {
        for listener in &mut self.listeners.beat_changed {
            listener(beat);
        }
    }

    fn emit_pattern_length_changed(&mut self, length: usize) {
        for listener in &mut self.listeners.pattern_length_changed {
            listener(length);
        }
    }

    fn emit_cycle_fired(&mut self, beat: f64) {
        for listener in &mut self.listeners.cycle_fired {
            listener(beat);
        }
    }
}
