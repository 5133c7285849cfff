//! Prime+probe capture of L1 data cache state.

pub mod geometry;
pub mod state;
pub mod compare;
pub mod stopwatch;
pub mod mispredict;

pub use geometry::*;
pub use state::*;
pub use compare::*;
pub use stopwatch::*;
pub use mispredict::*;

use memmap2::MmapMut;

use crate::channel::Channel;
use crate::error::{ LeakError, Result };

/// A cache-sized buffer used to fill every (set, way) of the cache.
///
/// The buffer is aligned to the cache size, so way `w` of set `s` lives at
/// `base + w * sets * line + s * line`.
pub struct ProbeBuffer {
    geometry: CacheGeometry,
    base: usize,
    /// Backing allocation (absent when adopting memory mapped elsewhere).
    _map: Option<MmapMut>,
}

impl ProbeBuffer {
    /// Allocate a new buffer.
    ///
    /// An anonymous mapping of twice the cache size is created and the
    /// buffer starts at the first cache-size-aligned address inside it.
    pub fn new(geometry: CacheGeometry) -> Result<Self> {
        geometry.validate()?;
        let size = geometry.size();
        let map = MmapMut::map_anon(size * 2).map_err(LeakError::Mmap)?;
        let start = map.as_ptr() as usize;
        let base = (start + size - 1) & !(size - 1);
        geometry.validate_alignment("probing_memory", base)?;
        tracing::debug!("probing buffer @ {:016x} ({} bytes)", base, size);
        Ok(Self { geometry, base, _map: Some(map) })
    }

    /// Use the memory at `base` as the probing buffer.
    ///
    /// The caller is responsible for `base..base + geometry.size()` being
    /// mapped for as long as the buffer is used with a channel that
    /// dereferences addresses.
    pub fn at(base: usize, geometry: CacheGeometry) -> Result<Self> {
        geometry.validate()?;
        geometry.validate_alignment("probing_memory", base)?;
        Ok(Self { geometry, base, _map: None })
    }

    pub fn geometry(&self) -> CacheGeometry { self.geometry }
    pub fn base(&self) -> usize { self.base }
    pub fn len(&self) -> usize { self.geometry.size() }

    /// Address of the line used for the (set, way) pair.
    pub fn addr(&self, set: usize, way: usize) -> usize {
        self.base + self.geometry.offset(set, way)
    }

    /// Iterate over (set, way, addr) in prime/probe order: way-major, then
    /// set.
    pub fn iter(&self) -> impl Iterator<Item=(usize, usize, usize)> + '_ {
        (0..self.geometry.ways()).flat_map(move |way| {
            (0..self.geometry.sets())
                .map(move |set| (set, way, self.addr(set, way)))
        })
    }
}

/// Fill every (set, way) of the cache with lines from `buf`.
pub fn prime(channel: &mut impl Channel, buf: &ProbeBuffer) {
    channel.barrier();
    for (_, _, addr) in buf.iter() {
        channel.touch(addr);
    }
    channel.barrier();
}

/// Re-access every line of `buf`, recording which ones missed.
///
/// A (set, way) is marked evicted when the data cache miss counter
/// advanced across its single access.
pub fn probe(channel: &mut impl Channel, buf: &ProbeBuffer) -> CacheState {
    let mut res = CacheState::new(buf.geometry());
    channel.barrier();
    for (set, way, addr) in buf.iter() {
        let before = channel.dcache_misses();
        channel.touch(addr);
        let after = channel.dcache_misses();
        res.set_evicted(set, way, after.wrapping_sub(before) > 0);
    }
    channel.barrier();
    tracing::trace!("probe: {} evicted", res.evicted_count());
    res
}
