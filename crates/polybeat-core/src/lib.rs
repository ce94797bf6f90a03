//! Polybeat Core - Real-time rhythmic scheduling engine.
//!
//! This crate converts a tempo and a set of per-voice beat patterns into
//! precisely timed trigger events against a drifting hardware audio clock:
//!
//! - **Timing** - Rational subdivisions, beat grids, float-snap cleanup
//! - **Rhythm** - One voice's beat-position state machine with staged edits
//! - **Conductor** - Look-ahead scheduler, polyrhythm phase alignment,
//!   glitch-free live tempo changes
//! - **Emitter** - The trigger contract of the external sound unit
//! - **Clock** - Pluggable time sources (system, manual, audio stream)
//! - **Click** - cpal-backed click backend (native only)
//!
//! # Architecture
//!
//! Scheduling is single-threaded and cooperative: a [`Conductor`] is ticked
//! by an external timer and commits every trigger that falls inside its
//! look-ahead window to the audio clock. Voices of different beat counts
//! stay phase-locked through alignment-grid math when added to a running
//! anchor. Pattern and subdivision edits made while running are staged and
//! committed at cycle boundaries, never corrupting an in-flight measure.
//!
//! # Feature Flags
//!
//! - `native` (default) - cpal audio output for the click backend

pub mod clock;
pub mod conductor;
pub mod emitter;
pub mod error;
pub mod rhythm;
pub mod timing;

// Native-only module (requires audio hardware access)
#[cfg(feature = "native")]
pub mod click;

// Re-export main types for convenience (platform-independent)
pub use clock::{AudioClock, ManualClock, SystemClock};
pub use conductor::Conductor;
pub use emitter::{SoundEmitter, SoundHandle, ToneParams};
pub use error::EngineError;
pub use rhythm::{Rhythm, RhythmParams};
pub use timing::{beat_grid, is_fractional, snap, Subdivision};

// Native-only re-exports
#[cfg(feature = "native")]
pub use click::{ClickBackend, ClickEmitter, StreamClock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdivision_reexport() {
        let sub = Subdivision::parse("1/3").unwrap();
        assert_eq!(sub, Subdivision::TRIPLET);
        assert!((sub.ticks_per_beat() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_default_tone_params() {
        let params = ToneParams::default();
        assert!((params.frequency - 750.0).abs() < 1e-12);
        assert!((params.gain - 0.5).abs() < 1e-12);
    }
}
