//! Cache geometry.

use crate::error::{ LeakError, Result };

/// Geometry of a set-associative cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheGeometry {
    sets: usize,
    ways: usize,
    line: usize,
}
impl CacheGeometry {
    /// 32KiB, 8-way, 16B lines (the Ariane L1D).
    pub const ARIANE_L1D: Self = Self::new(256, 8, 16);

    /// 32KiB, 8-way, 64B lines.
    pub const HOST_L1D: Self = Self::new(64, 8, 64);

    pub const fn new(sets: usize, ways: usize, line: usize) -> Self {
        Self { sets, ways, line }
    }

    pub const fn sets(&self) -> usize { self.sets }
    pub const fn ways(&self) -> usize { self.ways }
    pub const fn line(&self) -> usize { self.line }

    /// Cache size in bytes (`sets * ways * line`).
    pub const fn size(&self) -> usize { self.sets * self.ways * self.line }

    /// Number of bytes spanned by one way (`sets * line`).
    pub const fn way_stride(&self) -> usize { self.sets * self.line }

    /// Offset of the (set, way) pair inside a cache-sized probing buffer.
    /// Each way occupies a contiguous block of [`Self::way_stride`] bytes.
    pub const fn offset(&self, set: usize, way: usize) -> usize {
        way * self.way_stride() + set * self.line
    }

    /// Cache set that `addr` maps to.
    pub const fn set_of(&self, addr: usize) -> usize {
        (addr / self.line) % self.sets
    }

    pub fn validate(&self) -> Result<()> {
        let ok = [self.sets, self.ways, self.line].iter()
            .all(|x| x.is_power_of_two());
        if ok {
            Ok(())
        } else {
            Err(LeakError::InvalidGeometry {
                sets: self.sets,
                ways: self.ways,
                line: self.line,
            })
        }
    }

    /// Check that `addr` is aligned to the cache size.
    ///
    /// A misaligned probing buffer silently maps (set, way) pairs to the
    /// wrong sets, so this is a hard error.
    pub fn validate_alignment(&self, name: &'static str, addr: usize)
        -> Result<()>
    {
        if addr % self.size() != 0 {
            return Err(LeakError::Misaligned { name, addr, align: self.size() });
        }
        Ok(())
    }
}
