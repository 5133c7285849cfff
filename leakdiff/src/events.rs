//! Counter events consumed by the engine.

use perf_event::events::{ Cache, CacheOp, CacheResult, Event, Hardware, WhichCache };

/// The four monotonic counters exposed by a [`crate::channel::Channel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CounterEvent {
    /// Elapsed cycles.
    Cycles,
    /// L1 data cache read misses.
    DCacheReadMiss,
    /// L1 instruction cache misses.
    ICacheMiss,
    /// Mispredicted branches.
    BranchMispredict,
}
impl CounterEvent {
    pub const ALL: [Self; 4] = [
        Self::Cycles,
        Self::DCacheReadMiss,
        Self::ICacheMiss,
        Self::BranchMispredict,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cycles => "cycles",
            Self::DCacheReadMiss => "l1d.read_miss",
            Self::ICacheMiss => "l1i.miss",
            Self::BranchMispredict => "branch.mispredict",
        }
    }

    /// The generic 'perf' event backing this counter.
    ///
    /// Cycles are read from the timestamp counter instead (see
    /// [`crate::arch::timestamp`]), so there is no event for them.
    pub fn perf_event(&self) -> Option<Event> {
        match self {
            Self::Cycles => None,
            Self::DCacheReadMiss => Some(Event::from(Cache {
                which: WhichCache::L1D,
                operation: CacheOp::READ,
                result: CacheResult::MISS,
            })),
            Self::ICacheMiss => Some(Event::from(Cache {
                which: WhichCache::L1I,
                operation: CacheOp::READ,
                result: CacheResult::MISS,
            })),
            Self::BranchMispredict => Some(Event::from(Hardware::BRANCH_MISSES)),
        }
    }
}

/// A snapshot of all four counters, taken in [`CounterEvent::ALL`] order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSample {
    pub cycles: u64,
    pub dcache_misses: u64,
    pub icache_misses: u64,
    pub branch_mispredicts: u64,
}
impl CounterSample {
    pub fn get(&self, event: CounterEvent) -> u64 {
        match event {
            CounterEvent::Cycles => self.cycles,
            CounterEvent::DCacheReadMiss => self.dcache_misses,
            CounterEvent::ICacheMiss => self.icache_misses,
            CounterEvent::BranchMispredict => self.branch_mispredicts,
        }
    }

    /// Per-counter difference `self - earlier`.
    pub fn delta(&self, earlier: &Self) -> Self {
        Self {
            cycles: self.cycles.wrapping_sub(earlier.cycles),
            dcache_misses: self.dcache_misses.wrapping_sub(earlier.dcache_misses),
            icache_misses: self.icache_misses.wrapping_sub(earlier.icache_misses),
            branch_mispredicts: self.branch_mispredicts
                .wrapping_sub(earlier.branch_mispredicts),
        }
    }
}
impl std::fmt::Display for CounterSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "l1dc miss: {}, cycles: {}, mispredicts: {}, l1ic miss: {}",
            self.dcache_misses, self.cycles, self.branch_mispredicts,
            self.icache_misses)
    }
}
