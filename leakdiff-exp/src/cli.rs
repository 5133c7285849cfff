//! Arguments and setup shared by the binaries.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

use leakdiff::{ CacheGeometry, Comparison, LeakError, SimChannel };

/// Comparison between two baselines, selectable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ComparisonArg {
    /// Every (set, way) flag in range must match
    Exact,
    /// The number of evicted ways in each set in range must match
    OccupancyCount,
    /// Elapsed cycles must be within the threshold
    Timing,
    /// Mispredicted branch counts must match
    Mispredicts,
}
impl ComparisonArg {
    pub fn comparison(&self, threshold: u64) -> Comparison {
        match self {
            Self::Exact => Comparison::Exact,
            Self::OccupancyCount => Comparison::OccupancyCount,
            Self::Timing => Comparison::Timing(threshold),
            Self::Mispredicts => Comparison::Mispredicts,
        }
    }
}

/// Knobs for the simulated channel.
#[derive(clap::Args, Clone, Copy, Debug)]
pub struct SimArgs {
    /// Number of wrong-path loads performed after a misprediction
    #[arg(long, default_value_t = 8)]
    pub speculation_window: usize,

    /// Probability that an access also evicts a random line
    #[arg(long, default_value_t = 0.0, value_parser = parse_probability)]
    pub noise: f64,

    /// Seed for the noise generator
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}
impl SimArgs {
    pub fn channel(&self, geometry: CacheGeometry) -> SimChannel {
        let res = SimChannel::new(geometry)
            .speculation_window(self.speculation_window);
        if self.noise > 0.0 {
            res.noise(self.noise, self.seed)
        } else {
            res
        }
    }
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{} is not in [0, 1]", p))
    }
}

/// Parse a hexadecimal value, with or without a leading `0x`.
pub fn parse_hex(s: &str) -> Result<u64, String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| format!("{}", e))
}

/// Log to stderr, filtered by `RUST_LOG` (default: `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Report a fatal error and return a failing exit code.
pub fn fail(e: LeakError) -> std::process::ExitCode {
    println!("[!] {}", e);
    std::process::ExitCode::FAILURE
}
