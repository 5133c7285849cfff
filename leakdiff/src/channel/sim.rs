//! An idealized channel for running the engine without hardware.

use std::collections::HashMap;
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::cache::CacheGeometry;
use crate::channel::Channel;

/// Cycle costs charged by [`SimChannel`].
#[derive(Clone, Copy, Debug)]
pub struct SimCosts {
    pub hit: u64,
    pub miss: u64,
    pub branch: u64,
    pub mispredict: u64,
}
impl SimCosts {
    pub const DEFAULT: Self = Self { hit: 2, miss: 40, branch: 1, mispredict: 6 };
}

/// Random eviction noise.
struct SimNoise {
    /// Probability that any access is followed by the eviction of a random
    /// slot.
    prob: f64,
    rng: StdRng,
}

/// A noise-free cache and branch predictor model.
///
/// Cache
/// =====
///
/// Each address maps to exactly one (set, way) slot: the set comes from the
/// bits above the line offset, the way from the bits above the set index.
/// This matches the probing buffer layout, where each way is a contiguous
/// block of `sets * line` bytes, and means a single conflicting access
/// evicts a single way (there is no replacement policy to cascade through
/// during a probe).
///
/// Branch predictor
/// ================
///
/// A 2-bit saturating counter per branch site, initialized weakly
/// not-taken. On a misprediction, up to `speculation_window` loads on the
/// wrong path are performed transiently by the caller (see
/// [`crate::victim::Block`]).
///
/// The instruction cache is not modelled; its counter stays at zero.
pub struct SimChannel {
    geometry: CacheGeometry,
    slots: Vec<Option<usize>>,
    predictor: HashMap<usize, u8>,
    costs: SimCosts,
    speculation_window: usize,
    noise: Option<SimNoise>,

    cycles: u64,
    dcache_misses: u64,
    branch_mispredicts: u64,
}

impl SimChannel {
    pub fn new(geometry: CacheGeometry) -> Self {
        Self {
            geometry,
            slots: vec![None; geometry.sets() * geometry.ways()],
            predictor: HashMap::new(),
            costs: SimCosts::DEFAULT,
            speculation_window: 0,
            noise: None,
            cycles: 0,
            dcache_misses: 0,
            branch_mispredicts: 0,
        }
    }

    pub fn costs(mut self, costs: SimCosts) -> Self {
        self.costs = costs;
        self
    }

    /// Let mispredicted branches transiently execute up to `n` loads.
    pub fn speculation_window(mut self, n: usize) -> Self {
        self.speculation_window = n;
        self
    }

    /// Evict a random slot after each access with probability `prob`.
    pub fn noise(mut self, prob: f64, seed: u64) -> Self {
        assert!((0.0..=1.0).contains(&prob));
        self.noise = Some(SimNoise { prob, rng: StdRng::seed_from_u64(seed) });
        self
    }

    pub fn geometry(&self) -> CacheGeometry { self.geometry }

    /// Return the (set, way) slot and tag for `addr`.
    pub fn slot_of(&self, addr: usize) -> (usize, usize, usize) {
        let line = addr / self.geometry.line();
        let set = line % self.geometry.sets();
        let tag = line / self.geometry.sets();
        let way = tag % self.geometry.ways();
        (set, way, tag)
    }

    /// Returns true if the line containing `addr` is resident.
    pub fn is_cached(&self, addr: usize) -> bool {
        let (set, way, tag) = self.slot_of(addr);
        self.slots[self.index(set, way)] == Some(tag)
    }

    /// Return the current 2-bit counter for a branch site.
    pub fn predictor_state(&self, site: usize) -> u8 {
        self.predictor.get(&site).copied().unwrap_or(Self::PREDICTOR_INIT)
    }

    const PREDICTOR_INIT: u8 = 1;

    fn index(&self, set: usize, way: usize) -> usize {
        set * self.geometry.ways() + way
    }

    fn inject_noise(&mut self) {
        let len = self.slots.len();
        if let Some(noise) = &mut self.noise {
            if noise.rng.gen_bool(noise.prob) {
                let victim = noise.rng.gen_range(0..len);
                self.slots[victim] = None;
            }
        }
    }
}

impl Channel for SimChannel {
    fn cycles(&mut self) -> u64 { self.cycles }
    fn dcache_misses(&mut self) -> u64 { self.dcache_misses }
    fn icache_misses(&mut self) -> u64 { 0 }
    fn branch_mispredicts(&mut self) -> u64 { self.branch_mispredicts }

    fn full_flush(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.predictor.clear();
    }

    fn flush_excluding_predictor(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    fn barrier(&mut self) {}

    fn touch(&mut self, addr: usize) {
        let (set, way, tag) = self.slot_of(addr);
        let idx = self.index(set, way);
        if self.slots[idx] == Some(tag) {
            self.cycles += self.costs.hit;
        } else {
            self.cycles += self.costs.miss;
            self.dcache_misses += 1;
            self.slots[idx] = Some(tag);
        }
        self.inject_noise();
    }

    fn flush_line(&mut self, addr: usize) {
        let (set, way, tag) = self.slot_of(addr);
        let idx = self.index(set, way);
        if self.slots[idx] == Some(tag) {
            self.slots[idx] = None;
        }
    }

    fn branch(&mut self, site: usize, taken: bool) -> bool {
        let ctr = self.predictor.entry(site).or_insert(Self::PREDICTOR_INIT);
        let predicted = *ctr >= 2;
        *ctr = if taken { (*ctr + 1).min(3) } else { ctr.saturating_sub(1) };

        self.cycles += self.costs.branch;
        if predicted != taken {
            self.branch_mispredicts += 1;
            self.cycles += self.costs.mispredict;
        }
        predicted
    }

    fn jump(&mut self, _site: usize) {
        self.cycles += self.costs.branch;
    }

    fn speculation_window(&self) -> usize { self.speculation_window }
}
