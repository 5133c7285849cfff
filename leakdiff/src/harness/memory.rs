//! Memory read and written by victims.

use memmap2::MmapMut;

use crate::cache::CacheGeometry;
use crate::error::{ LeakError, Result };

/// A cache-aligned array of 64-bit words shared by setup, training and
/// victim callbacks.
///
/// Word `i` lives at `base + 8 * i`. The region is a whole number of cache
/// sizes long, so word `i` and word `i + size / 8` always share a set.
pub struct ExperimentMemory {
    map: MmapMut,
    /// Offset of the aligned base within `map`.
    start: usize,
    words: usize,
}

impl ExperimentMemory {
    /// Default number of words (8 cache sizes of the Ariane L1D).
    pub const DEFAULT_WORDS: usize = 32768;

    pub fn new(words: usize, geometry: CacheGeometry) -> Result<Self> {
        geometry.validate()?;
        let size = geometry.size();
        let len = (words * 8).div_ceil(size).max(1) * size;
        let map = MmapMut::map_anon(len + size).map_err(LeakError::Mmap)?;
        let raw = map.as_ptr() as usize;
        let base = (raw + size - 1) & !(size - 1);
        geometry.validate_alignment("experiment_memory", base)?;
        tracing::debug!("experiment memory @ {:016x} ({} words)", base, words);
        Ok(Self { map, start: base - raw, words })
    }

    pub fn base(&self) -> usize { self.map.as_ptr() as usize + self.start }
    pub fn words(&self) -> usize { self.words }
    pub fn len(&self) -> usize { self.words * 8 }

    /// Address of word `word`.
    pub fn word_addr(&self, word: usize) -> usize {
        assert!(word < self.words, "word {} out of range", word);
        self.base() + word * 8
    }

    fn range(&self, word: usize) -> std::ops::Range<usize> {
        assert!(word < self.words, "word {} out of range", word);
        let off = self.start + word * 8;
        off..off + 8
    }

    pub fn read(&self, word: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.map[self.range(word)]);
        u64::from_ne_bytes(buf)
    }

    pub fn write(&mut self, word: usize, val: u64) {
        let range = self.range(word);
        self.map[range].copy_from_slice(&val.to_ne_bytes());
    }

    /// Set every word to `val`.
    pub fn fill(&mut self, val: u64) {
        let bytes = val.to_ne_bytes();
        let (start, end) = (self.start, self.start + self.len());
        for chunk in self.map[start..end].chunks_exact_mut(8) {
            chunk.copy_from_slice(&bytes);
        }
    }
}
