//! Snapshot comparators.
//!
//! Every comparator answers "do these snapshots differ?": `true` means
//! different, `false` means equal.

use crate::cache::{ CacheGeometry, CacheState };
use crate::cache::mispredict::compare_mispredicts;
use crate::cache::stopwatch::compare_time;
use crate::error::{ LeakError, Result };
use crate::harness::MeasureMode;

/// A half-open range of cache sets `[lower, upper)` taking part in a
/// comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetRange {
    lower: usize,
    upper: usize,
}
impl SetRange {
    /// Create a range, checking `lower < upper <= geometry.sets()`.
    pub fn new(geometry: CacheGeometry, lower: usize, upper: usize)
        -> Result<Self>
    {
        if lower >= upper || upper > geometry.sets() {
            return Err(LeakError::InvalidRange {
                lower, upper, sets: geometry.sets()
            });
        }
        Ok(Self { lower, upper })
    }

    /// Every set in the cache.
    pub fn full(geometry: CacheGeometry) -> Self {
        Self { lower: 0, upper: geometry.sets() }
    }

    pub fn lower(&self) -> usize { self.lower }
    pub fn upper(&self) -> usize { self.upper }
    pub fn len(&self) -> usize { self.upper - self.lower }
    pub fn iter(&self) -> std::ops::Range<usize> { self.lower..self.upper }
    pub fn contains(&self, set: usize) -> bool {
        set >= self.lower && set < self.upper
    }
}

/// Predefined comparison ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum RangePreset {
    /// `[0, S)`
    Full,
    /// `[S/2, S)`: only sets above a page boundary in the probing buffer
    UpperHalf,
    /// `[S/2 - 3, S)`: the upper half plus a few sets of margin below it
    UpperHalfMargin,
}
impl RangePreset {
    /// Sets of margin kept below the midpoint by [`RangePreset::UpperHalfMargin`].
    const MARGIN: usize = 3;

    pub fn range(&self, geometry: CacheGeometry) -> Result<SetRange> {
        let sets = geometry.sets();
        match self {
            Self::Full => Ok(SetRange::full(geometry)),
            Self::UpperHalf => SetRange::new(geometry, sets / 2, sets),
            Self::UpperHalfMargin => SetRange::new(geometry,
                (sets / 2).saturating_sub(Self::MARGIN), sets),
        }
    }
}

/// True iff any (set, way) flag differs.
pub fn compare(a: &CacheState, b: &CacheState) -> bool {
    compare_range(a, b, SetRange::full(a.geometry()))
}

/// True iff any (set, way) flag differs among the sets in `range`.
pub fn compare_range(a: &CacheState, b: &CacheState, range: SetRange) -> bool {
    range.iter().any(|set| a.set_flags(set) != b.set_flags(set))
}

/// True iff the *number* of evicted ways differs for any set in `range`.
///
/// Tolerant of which particular way was evicted; use when way assignment
/// is not deterministic across runs.
pub fn compare_counts_in_range(a: &CacheState, b: &CacheState, range: SetRange)
    -> bool
{
    range.iter().any(|set| a.evicted_in_set(set) != b.evicted_in_set(set))
}

/// Signature of a pluggable range comparator.
pub type CompareFn = fn(&CacheState, &CacheState, SetRange) -> bool;

/// The comparator used when checking two input classes against each other.
#[derive(Clone, Copy)]
pub enum Comparison {
    /// [`compare_range`]
    Exact,
    /// [`compare_counts_in_range`]
    OccupancyCount,
    /// [`compare_time`] with the given threshold (the range is ignored)
    Timing(u64),
    /// [`compare_mispredicts`] (the range is ignored)
    Mispredicts,
    /// Some user-provided comparator
    Custom(&'static str, CompareFn),
}
impl Comparison {
    pub fn differs(&self, a: &CacheState, b: &CacheState, range: SetRange) -> bool {
        match self {
            Self::Exact => compare_range(a, b, range),
            Self::OccupancyCount => compare_counts_in_range(a, b, range),
            Self::Timing(threshold) => compare_time(a, b, *threshold),
            Self::Mispredicts => compare_mispredicts(a, b),
            Self::Custom(_, f) => f(a, b, range),
        }
    }

    /// The comparison reading what `mode` measures.
    pub fn for_mode(mode: MeasureMode, time_threshold: u64) -> Self {
        match mode {
            MeasureMode::PrimeProbe => Self::Exact,
            MeasureMode::Stopwatch => Self::Timing(time_threshold),
            MeasureMode::Mispredicts => Self::Mispredicts,
        }
    }

    /// Returns true if this comparison reads a part of the snapshot that
    /// `mode` fills in. Custom comparators are accepted in any mode.
    pub fn supports(&self, mode: MeasureMode) -> bool {
        match (self, mode) {
            (Self::Custom(..), _) => true,
            (Self::Exact | Self::OccupancyCount, MeasureMode::PrimeProbe) => true,
            (Self::Timing(_), MeasureMode::Stopwatch) => true,
            (Self::Mispredicts, MeasureMode::Mispredicts) => true,
            _ => false,
        }
    }

    /// Like [`Comparison::supports`], but returns a
    /// [`LeakError::ModeMismatch`].
    pub fn check_mode(&self, mode: MeasureMode) -> Result<()> {
        if self.supports(mode) {
            Ok(())
        } else {
            Err(LeakError::ModeMismatch {
                mode: mode.name(),
                comparison: self.name(),
            })
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::OccupancyCount => "occupancy-count",
            Self::Timing(_) => "timing",
            Self::Mispredicts => "mispredicts",
            Self::Custom(name, _) => *name,
        }
    }
}
impl std::fmt::Debug for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timing(t) => write!(f, "Timing({})", t),
            _ => write!(f, "{}", self.name()),
        }
    }
}
