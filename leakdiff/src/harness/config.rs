//! Harness configuration.

use crate::cache::{ CacheGeometry, Comparison, ProbeBuffer, RangePreset };
use crate::channel::Channel;
use crate::error::Result;
use crate::harness::{ ExperimentMemory, InputRegistry, LeakHarness };
use crate::util::LeakEnv;

/// Where trials run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Platform {
    /// The idealized [`crate::channel::SimChannel`]
    Sim,
    /// The host this process is running on
    Host,
}

/// How a trial turns victim execution into a [`crate::cache::CacheState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum MeasureMode {
    /// Record which (set, way) pairs the victim evicted.
    PrimeProbe,
    /// Record the number of cycles the victim took.
    Stopwatch,
    /// Record the number of branches the victim mispredicted.
    Mispredicts,
}
impl MeasureMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PrimeProbe => "prime-probe",
            Self::Stopwatch => "stopwatch",
            Self::Mispredicts => "mispredicts",
        }
    }
}

/// Configuration passed to [HarnessConfig::emit].
#[derive(Clone, Copy, Debug)]
pub struct HarnessConfig {
    /// The target platform
    pub platform: Platform,

    /// Geometry of the cache being probed.
    pub geometry: CacheGeometry,

    pub mode: MeasureMode,

    /// Number of training iterations run before each trial. Training is
    /// skipped when this is zero or no trainer is registered.
    pub train_iters: usize,

    /// Number of trials run after the baseline when checking a class for
    /// noise.
    pub repeats: usize,

    /// Sets that take part in the cross-class comparison.
    pub range_preset: RangePreset,

    /// Function used to compare the baselines of two classes. Must match
    /// `mode` (see [`Comparison::check_mode`]).
    pub comparison: Comparison,

    /// Stopwatch threshold (in cycles) above which two trials differ.
    pub time_threshold: u64,

    /// Optionally pin the caller to a specific hardware thread.
    pub pinned_core: Option<usize>,

    /// Size of experiment memory (in 64-bit words).
    pub mem_words: usize,
}

impl HarnessConfig {
    const DEFAULT_REPEATS: usize = 10;

    pub fn default_sim() -> Self {
        Self {
            platform: Platform::Sim,
            geometry: CacheGeometry::ARIANE_L1D,
            mode: MeasureMode::PrimeProbe,
            train_iters: 0,
            repeats: Self::DEFAULT_REPEATS,
            range_preset: RangePreset::Full,
            comparison: Comparison::Exact,
            time_threshold: 20,
            pinned_core: None,
            mem_words: ExperimentMemory::DEFAULT_WORDS,
        }
    }

    pub fn default_host() -> Self {
        Self {
            platform: Platform::Host,
            geometry: CacheGeometry::HOST_L1D,
            mode: MeasureMode::PrimeProbe,
            train_iters: 0,
            repeats: Self::DEFAULT_REPEATS,
            range_preset: RangePreset::Full,
            comparison: Comparison::Exact,
            time_threshold: 150,
            pinned_core: Some(0),
            mem_words: ExperimentMemory::DEFAULT_WORDS,
        }
    }

    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Sim => Self::default_sim(),
            Platform::Host => Self::default_host(),
        }
    }
}

impl HarnessConfig {
    pub fn geometry(mut self, x: CacheGeometry) -> Self {
        self.geometry = x;
        self
    }

    /// Set the measurement mode along with its default comparison.
    pub fn mode(mut self, x: MeasureMode) -> Self {
        self.mode = x;
        self.comparison = Comparison::for_mode(x, self.time_threshold);
        self
    }

    pub fn train_iters(mut self, x: usize) -> Self {
        self.train_iters = x;
        self
    }

    pub fn repeats(mut self, x: usize) -> Self {
        self.repeats = x;
        self
    }

    pub fn range_preset(mut self, x: RangePreset) -> Self {
        self.range_preset = x;
        self
    }

    pub fn comparison(mut self, x: Comparison) -> Self {
        self.comparison = x;
        self
    }

    pub fn time_threshold(mut self, x: u64) -> Self {
        self.time_threshold = x;
        if let Comparison::Timing(_) = self.comparison {
            self.comparison = Comparison::Timing(x);
        }
        self
    }

    pub fn pinned_core(mut self, x: Option<usize>) -> Self {
        self.pinned_core = x;
        self
    }

    pub fn mem_words(mut self, x: usize) -> Self {
        self.mem_words = x;
        self
    }
}

impl HarnessConfig {
    /// Check that the geometry and range are valid, and that `comparison`
    /// reads what `mode` measures.
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        self.range_preset.range(self.geometry)?;
        self.comparison.check_mode(self.mode)
    }

    /// Create a [LeakHarness] driving `channel` using this configuration.
    ///
    /// Allocates the probing buffer and experiment memory, and pins the
    /// caller when `pinned_core` is set.
    pub fn emit<C: Channel>(self, channel: C) -> Result<LeakHarness<C>> {
        self.validate()?;
        if let Some(core) = self.pinned_core {
            LeakEnv::pin_to_core(core)?;
            tracing::debug!("pinned to core {}", core);
        }
        let probe = ProbeBuffer::new(self.geometry)?;
        let mem = ExperimentMemory::new(self.mem_words, self.geometry)?;
        Ok(LeakHarness::new(self, channel, probe, mem, InputRegistry::new()))
    }
}
