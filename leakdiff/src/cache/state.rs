//! Snapshots of cache state.

use bitvec::prelude::*;
use itertools::iproduct;

use crate::cache::CacheGeometry;

/// A snapshot of cache state produced by one trial.
///
/// In prime+probe mode, `evicted` holds one flag per (set, way): `true` if
/// probing that way missed, meaning something other than the probing buffer
/// claimed it while the victim ran. In stopwatch mode only `cycles` is
/// meaningful, and in mispredict mode only `mispredicts`.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheState {
    geometry: CacheGeometry,
    evicted: BitVec,
    pub cycles: u64,
    pub mispredicts: u64,
}

impl CacheState {
    /// An empty snapshot (nothing evicted, zero counts).
    pub fn new(geometry: CacheGeometry) -> Self {
        Self {
            geometry,
            evicted: bitvec![0; geometry.sets() * geometry.ways()],
            cycles: 0,
            mispredicts: 0,
        }
    }

    /// Build a snapshot from a list of evicted (set, way) pairs.
    pub fn from_evicted(geometry: CacheGeometry,
        evicted: impl IntoIterator<Item=(usize, usize)>) -> Self
    {
        let mut res = Self::new(geometry);
        for (set, way) in evicted {
            res.set_evicted(set, way, true);
        }
        res
    }

    pub fn geometry(&self) -> CacheGeometry { self.geometry }

    fn index(&self, set: usize, way: usize) -> usize {
        assert!(set < self.geometry.sets() && way < self.geometry.ways(),
            "({}, {}) is outside the cache", set, way);
        set * self.geometry.ways() + way
    }

    pub fn set_evicted(&mut self, set: usize, way: usize, val: bool) {
        let idx = self.index(set, way);
        self.evicted.set(idx, val);
    }

    pub fn is_evicted(&self, set: usize, way: usize) -> bool {
        self.evicted[self.index(set, way)]
    }

    /// The flags for every way in `set`.
    pub fn set_flags(&self, set: usize) -> &BitSlice {
        let start = self.index(set, 0);
        &self.evicted[start..start + self.geometry.ways()]
    }

    /// Number of evicted ways in `set`.
    pub fn evicted_in_set(&self, set: usize) -> usize {
        self.set_flags(set).count_ones()
    }

    /// Total number of evicted ways.
    pub fn evicted_count(&self) -> usize {
        self.evicted.count_ones()
    }

    /// Iterate over all evicted (set, way) pairs in set order.
    pub fn iter_evicted(&self) -> impl Iterator<Item=(usize, usize)> + '_ {
        iproduct!(0..self.geometry.sets(), 0..self.geometry.ways())
            .filter(move |(set, way)| self.is_evicted(*set, *way))
    }
}

/// Lists every set with at least one evicted way, followed by its ways.
impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for set in 0..self.geometry.sets() {
            if self.evicted_in_set(set) == 0 {
                continue;
            }
            writeln!(f, "set {}", set)?;
            for way in self.set_flags(set).iter_ones() {
                writeln!(f, "- way {}", way)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheState")
         .field("geometry", &self.geometry)
         .field("evicted", &self.iter_evicted().collect::<Vec<_>>())
         .field("cycles", &self.cycles)
         .field("mispredicts", &self.mispredicts)
         .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const GEOM: CacheGeometry = CacheGeometry::ARIANE_L1D;

    #[test]
    fn flags() {
        let c = CacheState::from_evicted(GEOM, [(16, 3), (16, 5), (200, 0)]);
        assert!(c.is_evicted(16, 3));
        assert!(!c.is_evicted(16, 4));
        assert_eq!(c.evicted_in_set(16), 2);
        assert_eq!(c.evicted_count(), 3);
        assert_eq!(c.iter_evicted().collect::<Vec<_>>(),
            vec![(16, 3), (16, 5), (200, 0)]);
    }

    #[test]
    fn display_lists_evicted_ways() {
        let c = CacheState::from_evicted(GEOM, [(16, 3), (16, 5)]);
        assert_eq!(c.to_string(), "set 16\n- way 3\n- way 5\n");
        assert_eq!(CacheState::new(GEOM).to_string(), "");
    }

    #[test]
    #[should_panic]
    fn out_of_range() {
        CacheState::new(GEOM).is_evicted(256, 0);
    }
}
