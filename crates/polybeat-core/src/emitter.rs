//! The sound-emitter contract.
//!
//! The engine never inspects how a sound is synthesized; it only needs to
//! schedule one discrete audible event at an absolute clock time and to
//! learn, later, that the event finished sounding. This module defines:
//!
//! - [`SoundEmitter`] - The trigger contract an audio backend implements
//! - [`SoundHandle`] - Shared completion/cancellation flags for one event
//! - [`ToneParams`] - Tunable tone parameters for an emitter
//!
//! Completion is signalled through the handle's shared flag and observed by
//! polling on the cooperative scheduling loop; no callback crosses the audio
//! boundary in the other direction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tone parameters for a sound emitter.
///
/// The accent offsets are added to the base frequency: `first_beat_offset`
/// on beat one of a cycle, `subdivision_offset` on steps that fall between
/// whole beats.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToneParams {
    /// Base frequency in Hz.
    pub frequency: f64,
    /// Frequency offset applied on the first beat of a cycle (Hz).
    pub first_beat_offset: f64,
    /// Frequency offset applied on subdivided beats (Hz).
    pub subdivision_offset: f64,
    /// Output gain, 0.0 to 1.0.
    pub gain: f64,
}

impl Default for ToneParams {
    fn default() -> Self {
        Self {
            frequency: 750.0,
            first_beat_offset: 200.0,
            subdivision_offset: -50.0,
            gain: 0.5,
        }
    }
}

/// Handle to one scheduled sound event.
///
/// The emitter keeps a clone and flips the finished flag when the sound has
/// fully decayed (or was cancelled); the owning voice polls the flag on the
/// scheduling loop. Cancelling silences the sound if it has not finished.
#[derive(Clone, Debug, Default)]
pub struct SoundHandle {
    finished: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl SoundHandle {
    /// Create a handle for a newly scheduled sound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle that is already finished.
    ///
    /// Useful for emitters that produce no deferred completion (tests,
    /// silent backends).
    pub fn finished() -> Self {
        let handle = Self::new();
        handle.finish();
        handle
    }

    /// Mark the sound as finished. Called by the emitter side.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Request cancellation of the sound.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the sound has finished (or was cancelled and reaped).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Contract for the external sound-producing unit.
///
/// `target_time` is an absolute time on the same clock the scheduler reads;
/// the emitter is expected to start the sound at exactly that time, not on
/// receipt of the call.
pub trait SoundEmitter: Send {
    /// Schedule one discrete audible event.
    fn play(&mut self, target_time: f64, is_first_beat: bool, is_subdivided: bool) -> SoundHandle;

    /// Update the base frequency without touching the other parameters.
    fn update_frequency(&mut self, frequency: f64);

    /// Replace the full tone parameter set.
    fn update_tone(&mut self, params: ToneParams);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_lifecycle() {
        let handle = SoundHandle::new();
        assert!(!handle.is_finished());
        assert!(!handle.is_cancelled());

        let emitter_side = handle.clone();
        emitter_side.finish();
        assert!(handle.is_finished());
    }

    #[test]
    fn test_cancel_is_visible_to_clones() {
        let handle = SoundHandle::new();
        let emitter_side = handle.clone();
        handle.cancel();
        assert!(emitter_side.is_cancelled());
        assert!(!emitter_side.is_finished());
    }

    #[test]
    fn test_prefinished_handle() {
        assert!(SoundHandle::finished().is_finished());
    }
}
