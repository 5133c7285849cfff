//! Configuration errors.
//!
//! Every variant here is fatal for the experiment that produced it: the
//! engine never degrades a result or retries. Measurement noise is *not* an
//! error and is reported through [`crate::verdict::Verdict::Inconclusive`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeakError {
    /// A region that must be aligned to the cache size is not.
    #[error("memory '{name}' is not cache aligned (@{addr:#x}, expected alignment {align:#x})")]
    Misaligned {
        name: &'static str,
        addr: usize,
        align: usize,
    },

    /// No callbacks are registered for the requested input class.
    #[error("no input class registered with id {0}")]
    UnregisteredClass(u8),

    /// More than two input classes in one registry.
    #[error("input class {0} cannot be registered (ids 1 and 2 only)")]
    ClassSlot(u8),

    /// Checksum over a located table disagrees with the expected value.
    #[error("table @{addr:#x} failed checksum validation (expected {expected}, got {actual}); check the anchor/table offsets")]
    ChecksumMismatch {
        addr: usize,
        expected: u64,
        actual: u64,
    },

    /// A comparison range outside `0 <= lower < upper <= sets`.
    #[error("invalid set range [{lower}, {upper}) for a cache with {sets} sets")]
    InvalidRange {
        lower: usize,
        upper: usize,
        sets: usize,
    },

    /// Zero-sized or non-power-of-two cache geometry.
    #[error("invalid cache geometry {sets} sets x {ways} ways x {line}B lines")]
    InvalidGeometry {
        sets: usize,
        ways: usize,
        line: usize,
    },

    /// A comparison that reads parts of a snapshot the measurement mode
    /// never fills in.
    #[error("comparison '{comparison}' cannot be used in {mode} mode")]
    ModeMismatch {
        mode: &'static str,
        comparison: &'static str,
    },

    /// A reload window index outside the window.
    #[error("line {idx} is outside the reload window ({len} lines)")]
    LineOutOfWindow { idx: usize, len: usize },

    #[error("perf counter failed: {0}")]
    Perf(#[source] std::io::Error),

    #[error("couldn't map memory: {0}")]
    Mmap(#[source] std::io::Error),

    #[error("couldn't pin to core {core}: {errno}")]
    Affinity { core: usize, errno: nix::Error },
}

pub type Result<T> = std::result::Result<T, LeakError>;
