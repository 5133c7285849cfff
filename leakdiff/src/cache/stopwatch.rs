//! Stopwatch mode: snapshots that only record elapsed cycles.
//!
//! Used when the victim's footprint is too small (or too noisy) for
//! prime+probe, but its running time is still input-dependent.

use crate::cache::CacheState;
use crate::channel::Channel;

/// Record the current cycle count in `state`.
pub fn start_clock(channel: &mut impl Channel, state: &mut CacheState) {
    channel.barrier();
    state.cycles = channel.cycles();
    channel.barrier();
}

/// Replace the start time recorded by [`start_clock`] with the number of
/// cycles elapsed since.
pub fn stop_clock(channel: &mut impl Channel, state: &mut CacheState) {
    channel.barrier();
    let now = channel.cycles();
    state.cycles = now.wrapping_sub(state.cycles);
    channel.barrier();
}

/// True iff `|a.cycles - b.cycles| > threshold`.
pub fn compare_time(a: &CacheState, b: &CacheState, threshold: u64) -> bool {
    a.cycles.abs_diff(b.cycles) > threshold
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::CacheGeometry;
    use crate::channel::SimChannel;

    const GEOM: CacheGeometry = CacheGeometry::ARIANE_L1D;

    #[test]
    fn boundary_is_exclusive() {
        const THRESHOLD: u64 = 50;
        let mut a = CacheState::new(GEOM);
        let mut b = CacheState::new(GEOM);
        a.cycles = 100;
        b.cycles = 100 + THRESHOLD + 1;
        assert!(compare_time(&a, &b, THRESHOLD));
        assert!(compare_time(&b, &a, THRESHOLD));
        b.cycles = 100 + THRESHOLD;
        assert!(!compare_time(&a, &b, THRESHOLD));
    }

    #[test]
    fn measures_elapsed_cycles() {
        let mut sim = SimChannel::new(GEOM);
        sim.touch(0x40);
        let mut state = CacheState::new(GEOM);
        start_clock(&mut sim, &mut state);
        sim.touch(0x1000);
        sim.touch(0x1000);
        stop_clock(&mut sim, &mut state);
        let costs = crate::channel::SimCosts::DEFAULT;
        assert_eq!(state.cycles, costs.miss + costs.hit);
    }
}
