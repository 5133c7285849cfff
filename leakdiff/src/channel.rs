//! The hardware counter/channel interface.
//!
//! Everything the engine observes or perturbs goes through a [`Channel`]:
//! counters, flushes, barriers, and the memory accesses and branches made
//! by prime/probe and by victim code. The engine never touches ambient
//! hardware state directly, so the same pipeline runs against
//! [`SimChannel`] (an idealized, noise-free model) or [`PerfChannel`]
//! (the counters of the host this process runs on).
//!
//! No implementation is synchronized. Correctness depends on nothing else
//! consuming the counters while a trial is running.

pub mod sim;
pub mod perf;

pub use sim::*;
pub use perf::*;

use crate::error::Result;
use crate::events::CounterSample;

pub trait Channel {
    /// Monotonic cycle count.
    fn cycles(&mut self) -> u64;

    /// Monotonic L1 data cache read-miss count.
    fn dcache_misses(&mut self) -> u64;

    /// Monotonic L1 instruction cache miss count.
    fn icache_misses(&mut self) -> u64;

    /// Monotonic branch misprediction count.
    fn branch_mispredicts(&mut self) -> u64;

    /// Flush all cache and predictor state.
    fn full_flush(&mut self);

    /// Flush cache state, preserving branch predictor state.
    fn flush_excluding_predictor(&mut self);

    /// Force completion of all prior memory operations.
    fn barrier(&mut self);

    /// Perform one read of the byte at `addr`.
    fn touch(&mut self, addr: usize);

    /// Evict the line containing `addr`.
    fn flush_line(&mut self, addr: usize);

    /// Resolve a conditional branch at `site` whose architectural outcome is
    /// `taken`. Returns the direction the predictor chose.
    ///
    /// Channels without a predictor model return `taken`; real hardware
    /// speculates on its own.
    fn branch(&mut self, site: usize, taken: bool) -> bool;

    /// Execute an unconditional jump at `site`. Jumps never consult or
    /// update the direction predictor.
    fn jump(&mut self, _site: usize) {}

    /// Number of wrong-path loads a victim should perform transiently after
    /// a misprediction reported by [`Channel::branch`].
    fn speculation_window(&self) -> usize { 0 }

    /// Report (and clear) any counter failure since the last call. Counter
    /// reads can't fail in the middle of a measurement, so channels that
    /// can fail latch the first error until the trial is over.
    fn check(&mut self) -> Result<()> { Ok(()) }

    /// Read all counters, bracketed by barriers.
    fn sample(&mut self) -> CounterSample {
        self.barrier();
        let res = CounterSample {
            branch_mispredicts: self.branch_mispredicts(),
            dcache_misses: self.dcache_misses(),
            icache_misses: self.icache_misses(),
            cycles: self.cycles(),
        };
        self.barrier();
        res
    }
}

impl <C: Channel + ?Sized> Channel for &mut C {
    fn cycles(&mut self) -> u64 { (**self).cycles() }
    fn dcache_misses(&mut self) -> u64 { (**self).dcache_misses() }
    fn icache_misses(&mut self) -> u64 { (**self).icache_misses() }
    fn branch_mispredicts(&mut self) -> u64 { (**self).branch_mispredicts() }
    fn full_flush(&mut self) { (**self).full_flush() }
    fn flush_excluding_predictor(&mut self) { (**self).flush_excluding_predictor() }
    fn barrier(&mut self) { (**self).barrier() }
    fn touch(&mut self, addr: usize) { (**self).touch(addr) }
    fn flush_line(&mut self, addr: usize) { (**self).flush_line(addr) }
    fn branch(&mut self, site: usize, taken: bool) -> bool {
        (**self).branch(site, taken)
    }
    fn jump(&mut self, site: usize) { (**self).jump(site) }
    fn speculation_window(&self) -> usize { (**self).speculation_window() }
    fn check(&mut self) -> Result<()> { (**self).check() }
}
