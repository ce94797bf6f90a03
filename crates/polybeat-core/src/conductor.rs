//! The look-ahead scheduler driving all voices against a shared clock.
//!
//! The [`Conductor`] owns the global tempo and the set of active
//! [`Rhythm`]s. One call to [`Conductor::tick`] is one pass of the
//! cooperative scheduling loop: every voice whose next trigger falls inside
//! the look-ahead window is fired and advanced, repeatedly within the same
//! pass, until nothing is due. Re-arming the loop (a timer, a frame
//! callback, a test) is the caller's concern; `tick` never blocks.
//!
//! The first voice added is the anchor. Any voice added afterwards is
//! phase-aligned to it so that its beat one lands on the next beat position
//! shared by both voices' cycles — the polyrhythm correctness guarantee.

use crate::clock::AudioClock;
use crate::rhythm::Rhythm;
use crate::timing::{snap, ALIGN_EPSILON};

/// Listener for running-state notifications.
pub type RunningListener = Box<dyn FnMut(bool) + Send>;
/// Listener for tempo notifications.
pub type TempoListener = Box<dyn FnMut(f64) + Send>;

#[derive(Default)]
struct ConductorListeners {
    running_changed: Vec<RunningListener>,
    tempo_changed: Vec<TempoListener>,
}

/// Global scheduler for a set of rhythms.
pub struct Conductor {
    bpm: f64,
    running: bool,
    rhythms: Vec<Rhythm>,
    clock: Box<dyn AudioClock>,
    listeners: ConductorListeners,
}

impl Conductor {
    /// Scheduling horizon in seconds: triggers within this window of the
    /// clock are committed on the current pass.
    pub const LOOK_AHEAD: f64 = 0.1;

    /// Minimum positive lead time for an aligned voice's first trigger.
    /// Alignment math can land at or before "now"; without this clamp the
    /// first event is silently dropped.
    pub const MIN_LEAD: f64 = 0.003;

    /// Create a conductor reading time from `clock`.
    pub fn new(clock: Box<dyn AudioClock>, bpm: f64) -> Self {
        Self {
            bpm,
            running: false,
            rhythms: Vec::new(),
            clock,
            listeners: ConductorListeners::default(),
        }
    }

    /// Current tempo in BPM.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Whether the scheduler is running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of active rhythms.
    pub fn len(&self) -> usize {
        self.rhythms.len()
    }

    /// Whether no rhythms are active.
    pub fn is_empty(&self) -> bool {
        self.rhythms.is_empty()
    }

    /// Current time on the scheduling clock, in seconds.
    pub fn current_time(&self) -> f64 {
        self.clock.now()
    }

    /// Borrow a rhythm by index.
    pub fn rhythm(&self, index: usize) -> Option<&Rhythm> {
        self.rhythms.get(index)
    }

    /// Mutably borrow a rhythm by index (pattern edits, staged changes).
    pub fn rhythm_mut(&mut self, index: usize) -> Option<&mut Rhythm> {
        self.rhythms.get_mut(index)
    }

    /// One pass of the scheduling loop.
    ///
    /// For each rhythm: observe completed sounds, then fire and advance as
    /// long as its next trigger is inside the look-ahead window. The inner
    /// loop handles several ticks of a fast subdivision falling inside one
    /// pass, and a voice that fell behind catches up here in one jump.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }
        let now = self.clock.now();
        let horizon = now + Self::LOOK_AHEAD;
        for rhythm in &mut self.rhythms {
            rhythm.poll_completions();
            while rhythm.next_note() < horizon {
                rhythm.fire();
                rhythm.advance(self.bpm, now);
            }
        }
    }

    /// Add a rhythm.
    ///
    /// The first rhythm becomes the anchor and starts at the current clock
    /// time. A later rhythm is phase-aligned: its beat one is placed on the
    /// next anchor-beat position shared by both cycles, its first trigger
    /// offset from the anchor's pending trigger by the beat delta at the
    /// current tempo, clamped to a minimum positive lead.
    pub fn add_rhythm(&mut self, mut rhythm: Rhythm) {
        let now = self.clock.now();
        if let Some(anchor) = self.rhythms.first() {
            let current_beat = anchor.beat_track();

            // Alignment grid: the anchor's beat span divided across the new
            // voice's poly count.
            let partial = snap(f64::from(anchor.beats()) / f64::from(rhythm.poly()));
            let mut grid = Vec::with_capacity(rhythm.poly() as usize);
            let mut position = 1.0;
            for _ in 0..rhythm.poly() {
                grid.push(position);
                position = snap(position + partial);
            }

            // First grid position at or after the anchor's current beat;
            // wrap to the grid start (plus one full cycle below) when the
            // anchor is already past the last alignment point.
            let (index, landing) = grid
                .iter()
                .enumerate()
                .find(|(_, &position)| position + ALIGN_EPSILON >= current_beat)
                .map(|(index, &position)| (index, position))
                .unwrap_or((0, 1.0));

            let mut delta_beats = landing - current_beat;
            if delta_beats < 0.0 {
                delta_beats += f64::from(rhythm.beats());
            }

            let seconds_per_beat = 60.0 / self.bpm;
            let mut next_note = anchor.next_note() + delta_beats * seconds_per_beat;
            if next_note < now + Self::MIN_LEAD {
                next_note = now + Self::MIN_LEAD;
            }

            // The matched index is a whole-beat position in the new voice's
            // own cycle; derive its step through its subdivision, flooring
            // to the grid position at or below when the landing falls
            // between steps, so `beat_track == step * subdivision + 1`
            // holds for every subdivision. For subdivisions of a beat the
            // landing is always on the grid and this is exact.
            let total = rhythm.total_steps();
            let spacing = rhythm.subdivision().as_beats();
            let step = ((index as f64 / spacing).floor() as usize) % total;
            let beat_track = snap(step as f64 * spacing + 1.0);

            log::debug!(
                "aligned rhythm to anchor: beat {current_beat} -> grid {landing} \
                 (+{delta_beats} beats), first trigger at {next_note}"
            );
            rhythm.align_to(step, beat_track, next_note);
        } else {
            rhythm.init(now);
        }
        self.rhythms.push(rhythm);
    }

    /// Remove one rhythm, returning it.
    pub fn remove_rhythm(&mut self, index: usize) -> Option<Rhythm> {
        if index < self.rhythms.len() {
            Some(self.rhythms.remove(index))
        } else {
            None
        }
    }

    /// Remove every rhythm, stopping the scheduler first if needed.
    ///
    /// Listener sets of the removed rhythms are cleared; their lifetime
    /// ends with the voice.
    pub fn remove_all(&mut self) {
        if self.running {
            self.stop();
        }
        for rhythm in &mut self.rhythms {
            rhythm.clear_listeners();
        }
        self.rhythms.clear();
    }

    /// Change the tempo, retiming every voice coherently.
    ///
    /// Each voice preserves the phase fraction of its pending trigger, so a
    /// live tempo change produces no audible snap.
    pub fn update_tempo(&mut self, bpm: f64) {
        let old_bpm = self.bpm;
        self.bpm = bpm;
        let now = self.clock.now();
        for rhythm in &mut self.rhythms {
            rhythm.apply_tempo_change(old_bpm, bpm, now);
        }
        log::debug!("tempo changed {old_bpm} -> {bpm}");
        self.emit_tempo_changed(bpm);
    }

    /// Start the scheduler: every rhythm restarts at beat one, now.
    pub fn start(&mut self) -> bool {
        let now = self.clock.now();
        for rhythm in &mut self.rhythms {
            rhythm.init(now);
        }
        self.running = true;
        log::info!("conductor started at {now:.3}s, {} bpm", self.bpm);
        self.emit_running_changed(true);
        self.running
    }

    /// Stop the scheduler: every rhythm is silenced and snapped to beat one.
    pub fn stop(&mut self) -> bool {
        self.running = false;
        for rhythm in &mut self.rhythms {
            rhythm.stop();
        }
        log::info!("conductor stopped");
        self.emit_running_changed(false);
        self.running
    }

    /// Register a running-state listener.
    pub fn on_running_changed(&mut self, listener: impl FnMut(bool) + Send + 'static) {
        self.listeners.running_changed.push(Box::new(listener));
    }

    /// Register a tempo listener.
    pub fn on_tempo_changed(&mut self, listener: impl FnMut(f64) + Send + 'static) {
        self.listeners.tempo_changed.push(Box::new(listener));
    }

    /// Drop all registered listeners.
    pub fn clear_listeners(&mut self) {
        self.listeners.running_changed.clear();
        self.listeners.tempo_changed.clear();
    }

    fn emit_running_changed(&mut self, running: bool) {
        for listener in &mut self.listeners.running_changed {
            listener(running);
        }
    }

    fn emit_tempo_changed(&mut self, bpm: f64) {
        for listener in &mut self.listeners.tempo_changed {
            listener(bpm);
        }
    }
}
