//! Timing primitives for the scheduling engine.
//!
//! This module provides the fundamental timing types used throughout Polybeat:
//!
//! - [`Subdivision`] - Rational fraction of a beat between pattern steps
//! - [`snap`] - Floating-point cleanup for computed beat positions
//! - [`beat_grid`] - Step positions of a measure under a subdivision
//!
//! Beat positions are 1-based `f64` values; every computed position is
//! snapped to the nearest integer when within [`SNAP_EPSILON`] so that
//! cycle-boundary comparisons (`== 1.0`) and grid walks stay reliable
//! across fractional subdivisions (1/3, 1/7, ...).

/// Epsilon for snapping computed beat positions to integers.
pub const SNAP_EPSILON: f64 = 1e-12;

/// Tolerance for grid-walk comparisons between beat positions.
pub const ALIGN_EPSILON: f64 = 1e-6;

/// Snap a value to the nearest integer when within `SNAP_EPSILON`.
///
/// Fractional subdivisions accumulate rounding error over many steps;
/// without this cleanup, alignment comparisons intermittently misfire.
#[inline]
pub fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (rounded - value).abs() < SNAP_EPSILON {
        rounded
    } else {
        value
    }
}

/// True when a beat position does not fall on a whole beat.
#[inline]
pub fn is_fractional(value: f64) -> bool {
    value != value.round()
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Rational fraction of a beat between successive pattern steps.
///
/// A quarter note is `1/1`, a triplet `1/3`, and so on. Representing the
/// fraction as a reduced integer pair keeps `ticks_per_beat` exact instead
/// of reconstructing it from a float like `0.3333…`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subdivision {
    num: u32,
    den: u32,
}

impl Subdivision {
    /// Quarter notes: one step per beat.
    pub const QUARTER: Subdivision = Subdivision { num: 1, den: 1 };
    /// Duplets: two steps per beat.
    pub const DUPLET: Subdivision = Subdivision { num: 1, den: 2 };
    /// Triplets: three steps per beat.
    pub const TRIPLET: Subdivision = Subdivision { num: 1, den: 3 };
    /// Quadruplets: four steps per beat.
    pub const QUADRUPLET: Subdivision = Subdivision { num: 1, den: 4 };
    /// Quintuplets: five steps per beat.
    pub const QUINTUPLET: Subdivision = Subdivision { num: 1, den: 5 };
    /// Sextuplets: six steps per beat.
    pub const SEXTUPLET: Subdivision = Subdivision { num: 1, den: 6 };
    /// Septuplets: seven steps per beat.
    pub const SEPTUPLET: Subdivision = Subdivision { num: 1, den: 7 };
    /// Octuplets: eight steps per beat.
    pub const OCTUPLET: Subdivision = Subdivision { num: 1, den: 8 };
    /// Nonuplets: nine steps per beat.
    pub const NONUPLET: Subdivision = Subdivision { num: 1, den: 9 };
    /// Decuplets: ten steps per beat.
    pub const DECUPLET: Subdivision = Subdivision { num: 1, den: 10 };

    /// Create a subdivision of `num/den` beats per step, reduced.
    ///
    /// Zero components are clamped to 1 to prevent division by zero.
    pub fn new(num: u32, den: u32) -> Self {
        let num = num.max(1);
        let den = den.max(1);
        let g = gcd(num, den);
        Self {
            num: num / g,
            den: den / g,
        }
    }

    /// The step spacing as a fraction of a beat.
    #[inline]
    pub fn as_beats(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Ticks per beat: `1/sub` for subdivisions below one beat, `sub`
    /// otherwise, so a step never spans less than one tick.
    #[inline]
    pub fn ticks_per_beat(self) -> f64 {
        if self.num < self.den {
            f64::from(self.den) / f64::from(self.num)
        } else {
            f64::from(self.num) / f64::from(self.den)
        }
    }

    /// Number of steps in a measure of `beat_source` beats.
    ///
    /// A measure always contains at least one step, even when a single step
    /// spans more beats than the measure holds; every walk over the step
    /// grid relies on it being non-empty.
    pub fn steps_in(self, beat_source: u32) -> usize {
        let steps = f64::from(beat_source) / self.as_beats();
        (steps.round() as usize).max(1)
    }

    /// Parse a subdivision from `"n"` or `"n/d"` notation.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        match text.split_once('/') {
            Some((n, d)) => {
                let num = n.trim().parse().ok()?;
                let den = d.trim().parse().ok()?;
                if num == 0 || den == 0 {
                    return None;
                }
                Some(Self::new(num, den))
            }
            None => {
                let num: u32 = text.parse().ok()?;
                if num == 0 {
                    return None;
                }
                Some(Self::new(num, 1))
            }
        }
    }
}

impl Default for Subdivision {
    fn default() -> Self {
        Self::QUARTER
    }
}

impl std::fmt::Display for Subdivision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Generate the 1-based step positions of a measure.
///
/// The first element is `1`; each subsequent element adds the subdivision,
/// snapped for float drift. For `beat_source = 4` and triplets this yields
/// `[1, 1.333…, 1.666…, 2, 2.333…, …, 4.666…]`.
pub fn beat_grid(beat_source: u32, subdivision: Subdivision) -> Vec<f64> {
    let total_steps = subdivision.steps_in(beat_source);
    let spacing = subdivision.as_beats();
    let mut grid = Vec::with_capacity(total_steps);
    let mut position = 1.0;
    for _ in 0..total_steps {
        grid.push(position);
        position = snap(position + spacing);
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_cleans_drift() {
        let mut position = 1.0;
        for _ in 0..3 {
            position = snap(position + Subdivision::TRIPLET.as_beats());
        }
        assert_eq!(position, 2.0);
    }

    #[test]
    fn test_snap_keeps_fractions() {
        assert!((snap(1.5) - 1.5).abs() < 1e-15);
        assert!((snap(2.333333) - 2.333333).abs() < 1e-15);
    }

    #[test]
    fn test_subdivision_reduces() {
        assert_eq!(Subdivision::new(2, 6), Subdivision::TRIPLET);
        assert_eq!(Subdivision::new(4, 4), Subdivision::QUARTER);
    }

    #[test]
    fn test_ticks_per_beat() {
        assert!((Subdivision::QUARTER.ticks_per_beat() - 1.0).abs() < 1e-12);
        assert!((Subdivision::TRIPLET.ticks_per_beat() - 3.0).abs() < 1e-12);
        assert!((Subdivision::DECUPLET.ticks_per_beat() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_steps_in_measure() {
        assert_eq!(Subdivision::QUARTER.steps_in(4), 4);
        assert_eq!(Subdivision::TRIPLET.steps_in(4), 12);
        assert_eq!(Subdivision::SEPTUPLET.steps_in(3), 21);
    }

    #[test]
    fn test_steps_in_never_zero_for_coarse_subdivisions() {
        // A step spanning more beats than the measure still yields one step.
        assert_eq!(Subdivision::new(5, 1).steps_in(2), 1);
        assert_eq!(Subdivision::new(3, 1).steps_in(1), 1);
        assert_eq!(beat_grid(2, Subdivision::new(5, 1)), vec![1.0]);
    }

    #[test]
    fn test_parse() {
        assert_eq!(Subdivision::parse("1"), Some(Subdivision::QUARTER));
        assert_eq!(Subdivision::parse("1/3"), Some(Subdivision::TRIPLET));
        assert_eq!(Subdivision::parse(" 2 / 6 "), Some(Subdivision::TRIPLET));
        assert_eq!(Subdivision::parse("0"), None);
        assert_eq!(Subdivision::parse("1/0"), None);
        assert_eq!(Subdivision::parse("x"), None);
    }

    #[test]
    fn test_beat_grid_quarters() {
        let grid = beat_grid(4, Subdivision::QUARTER);
        assert_eq!(grid, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_beat_grid_triplets_lands_on_whole_beats() {
        let grid = beat_grid(2, Subdivision::TRIPLET);
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[0], 1.0);
        assert_eq!(grid[3], 2.0);
    }

    #[test]
    fn test_is_fractional() {
        assert!(!is_fractional(1.0));
        assert!(is_fractional(1.5));
        assert!(!is_fractional(snap(0.9999999999999999)));
    }
}
