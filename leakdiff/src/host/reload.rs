//! Flush+Reload over the lines around a table.

use rand::prelude::*;

use crate::channel::Channel;
use crate::error::{ LeakError, Result };
use crate::host::Table;
use crate::stats::{ RawResults, ResultList };

/// The cache lines probed around a table: `before` lines below the line
/// holding the start of the table, the table's own lines, and `after` lines
/// above them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReloadWindow {
    lines: Vec<usize>,
    before: usize,
    table_lines: usize,
    after: usize,
    line: usize,
}

impl ReloadWindow {
    pub const DEFAULT_BEFORE: usize = 7;
    pub const DEFAULT_AFTER: usize = 7;

    /// Build a window around `table`. The table's lines are every line
    /// holding at least one of its bytes (at least one line for an empty
    /// table).
    pub fn around(table: &Table, line: usize, before: usize, after: usize)
        -> Self
    {
        let first = table.addr & !(line - 1);
        let end = table.addr + table.len.max(1) - 1;
        let table_lines = end / line - table.addr / line + 1;
        let last = first + (table_lines - 1) * line;
        let lines = (1..=before).rev().map(|k| first - k * line)
            .chain((0..table_lines).map(|k| first + k * line))
            .chain((1..=after).map(|k| last + k * line))
            .collect();
        Self { lines, before, table_lines, after, line }
    }

    /// Window with 7 lines on either side.
    pub fn with_defaults(table: &Table, line: usize) -> Self {
        Self::around(table, line, Self::DEFAULT_BEFORE, Self::DEFAULT_AFTER)
    }

    pub fn len(&self) -> usize { self.lines.len() }
    pub fn lines(&self) -> &[usize] { &self.lines }
    pub fn before(&self) -> usize { self.before }
    pub fn after(&self) -> usize { self.after }
    pub fn table_lines(&self) -> usize { self.table_lines }

    /// Indexes of the lines holding the table.
    pub fn table_range(&self) -> std::ops::Range<usize> {
        self.before..self.before + self.table_lines
    }

    pub fn addr(&self, idx: usize) -> Result<usize> {
        self.lines.get(idx).copied().ok_or(LeakError::LineOutOfWindow {
            idx, len: self.lines.len()
        })
    }

    /// Base and length of the memory covered by the window.
    pub fn span(&self) -> (usize, usize) {
        (self.lines[0], self.lines.len() * self.line)
    }
}

/// Outcome of a single reload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reload {
    Hit(u64),
    Miss(u64),
}
impl Reload {
    pub fn cycles(&self) -> u64 {
        match self { Self::Hit(c) | Self::Miss(c) => *c }
    }
    pub fn is_hit(&self) -> bool { matches!(self, Self::Hit(_)) }
}

/// Flush+Reload over a [`ReloadWindow`].
#[derive(Clone, Debug)]
pub struct FlushReload {
    pub window: ReloadWindow,
    /// A reload taking fewer cycles than this is a hit.
    pub threshold: u64,
}

impl FlushReload {
    /// Host threshold between an L1 hit and a miss to memory.
    pub const HOST_THRESHOLD: u64 = 150;

    pub fn new(window: ReloadWindow, threshold: u64) -> Self {
        Self { window, threshold }
    }

    /// Flush every line in the window, run `victim`, and time a reload of
    /// line `idx`.
    pub fn measure<C: Channel>(&self, channel: &mut C, idx: usize,
        victim: &mut impl FnMut(&mut C)) -> Result<Reload>
    {
        let target = self.window.addr(idx)?;
        for addr in self.window.lines() {
            channel.flush_line(*addr);
        }
        channel.barrier();

        victim(channel);

        channel.barrier();
        let start = channel.cycles();
        channel.touch(target);
        channel.barrier();
        let cycles = channel.cycles().wrapping_sub(start);

        Ok(if cycles < self.threshold {
            Reload::Hit(cycles)
        } else {
            Reload::Miss(cycles)
        })
    }

    /// Measure every line `repetitions` times.
    ///
    /// Lines are visited in a different random order on each repetition,
    /// so that a sequential walk over the window doesn't train the
    /// prefetcher.
    pub fn profile<C: Channel>(&self, channel: &mut C, repetitions: usize,
        rng: &mut impl Rng, mut victim: impl FnMut(&mut C))
        -> Result<HitProfile>
    {
        let len = self.window.len();
        let mut timings = vec![RawResults::default(); len];
        let mut order: Vec<usize> = (0..len).collect();
        for _ in 0..repetitions {
            order.shuffle(rng);
            for idx in order.iter() {
                let res = self.measure(channel, *idx, &mut victim)?;
                timings[*idx].0.push(res.cycles());
            }
        }

        let hit_ratios = timings.iter().map(|t| {
            if t.is_empty() {
                0.0
            } else {
                t.count_where(|c| c < self.threshold) as f64 / t.len() as f64
            }
        }).collect();
        Ok(HitProfile {
            hit_ratios,
            timings,
            table: self.window.table_range(),
        })
    }
}

/// Per-line results of [`FlushReload::profile`].
#[derive(Clone, Debug)]
pub struct HitProfile {
    /// Fraction of reloads that hit, per line.
    pub hit_ratios: Vec<f64>,
    /// Raw reload times, per line.
    pub timings: Vec<RawResults>,
    /// Indexes of the lines holding the table.
    pub table: std::ops::Range<usize>,
}

impl HitProfile {
    /// Count the consecutive lines immediately before and after the table
    /// with a hit ratio of at least `min_ratio`.
    pub fn prefetch_reach(&self, min_ratio: f64) -> PrefetchReach {
        let hot = |idx: &usize| self.hit_ratios[*idx] >= min_ratio;
        let before = (0..self.table.start).rev().take_while(hot).count();
        let after = (self.table.end..self.hit_ratios.len())
            .take_while(hot).count();
        PrefetchReach { before, after }
    }
}

/// How many lines beyond a table were pulled in along with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrefetchReach {
    pub before: usize,
    pub after: usize,
}

/// Prints `P<n>` for each side with a nonzero reach, or `P0`.
impl std::fmt::Display for PrefetchReach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.before, self.after) {
            (0, 0) => write!(f, "P0"),
            (b, 0) => write!(f, "P{}", b),
            (0, a) => write!(f, "P{}", a),
            (b, a) => write!(f, "P{} P{}", b, a),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::CacheGeometry;
    use crate::channel::SimChannel;

    const LINE: usize = 64;
    const SIM_THRESHOLD: u64 = 20;

    fn table() -> Table {
        Table { addr: 0x10_0000 + 0x20, len: 128 }
    }

    fn window() -> ReloadWindow {
        ReloadWindow::with_defaults(&table(), LINE)
    }

    #[test]
    fn window_layout() {
        let w = window();
        assert_eq!(w.len(), 17);
        assert_eq!(w.table_range(), 7..10);
        assert_eq!(w.addr(0).unwrap(), 0x10_0000 - 7 * LINE);
        assert_eq!(w.addr(7).unwrap(), 0x10_0000);
        assert_eq!(w.addr(9).unwrap(), 0x10_0000 + 128);
        assert_eq!(w.addr(16).unwrap(), 0x10_0000 + 128 + 7 * LINE);
        assert!(matches!(w.addr(17),
            Err(LeakError::LineOutOfWindow { idx: 17, len: 17 })));
        assert_eq!(w.span(), (0x10_0000 - 7 * LINE, 17 * LINE));
    }

    #[test]
    fn aligned_table_layout() {
        let t = Table { addr: 0x10_0000, len: 128 };
        let w = ReloadWindow::with_defaults(&t, LINE);
        assert_eq!(w.table_lines(), 2);
        assert_eq!(w.len(), 16);
        assert_eq!(w.table_range(), 7..9);
        assert_eq!(w.addr(9).unwrap(), 0x10_0000 + 128);

        // One byte past a line boundary needs another line.
        let t = Table { addr: 0x10_0000, len: 129 };
        assert_eq!(ReloadWindow::with_defaults(&t, LINE).table_lines(), 3);
        let t = Table { addr: 0x10_0000, len: 0 };
        assert_eq!(ReloadWindow::with_defaults(&t, LINE).table_lines(), 1);
    }

    #[test]
    fn aligned_table_reach() {
        let t = Table { addr: 0x10_0000, len: 128 };
        let fr = FlushReload::new(ReloadWindow::with_defaults(&t, LINE),
            SIM_THRESHOLD);
        let mut sim = SimChannel::new(CacheGeometry::HOST_L1D);
        // the whole table, plus the first line after it
        let victim = |ch: &mut SimChannel| {
            ch.touch(t.addr);
            ch.touch(t.addr + LINE);
            ch.touch(t.addr + 2 * LINE);
        };
        let mut rng = StdRng::seed_from_u64(0);
        let profile = fr.profile(&mut sim, 3, &mut rng, victim).unwrap();
        assert_eq!(profile.prefetch_reach(0.5),
            PrefetchReach { before: 0, after: 1 });
    }

    #[test]
    fn accessed_line_hits() {
        let mut sim = SimChannel::new(CacheGeometry::HOST_L1D);
        let fr = FlushReload::new(window(), SIM_THRESHOLD);
        let elem = table().elem_addr(9);
        let mut victim = |ch: &mut SimChannel| ch.touch(elem);

        let res = fr.measure(&mut sim, 8, &mut victim).unwrap();
        assert!(res.is_hit());
        let res = fr.measure(&mut sim, 7, &mut victim).unwrap();
        assert!(!res.is_hit());
        assert!(res.cycles() >= SIM_THRESHOLD);
    }

    #[test]
    fn profile_and_reach() {
        let mut sim = SimChannel::new(CacheGeometry::HOST_L1D);
        let fr = FlushReload::new(window(), SIM_THRESHOLD);
        let t = table();
        // touches the first table line, plus a "prefetch" of the line after
        // the table and the line before it
        let victim = |ch: &mut SimChannel| {
            ch.touch(t.addr);
            ch.touch(fr.window.addr(6).unwrap());
            ch.touch(fr.window.addr(10).unwrap());
        };
        let mut rng = StdRng::seed_from_u64(0);
        let profile = fr.profile(&mut sim, 5, &mut rng, victim).unwrap();
        assert_eq!(profile.hit_ratios[7], 1.0);
        assert_eq!(profile.hit_ratios[8], 0.0);
        assert_eq!(profile.timings[7].len(), 5);
        let reach = profile.prefetch_reach(0.5);
        assert_eq!(reach, PrefetchReach { before: 1, after: 1 });
        assert_eq!(reach.to_string(), "P1 P1");
    }

    #[test]
    fn reach_display() {
        assert_eq!(PrefetchReach { before: 0, after: 0 }.to_string(), "P0");
        assert_eq!(PrefetchReach { before: 2, after: 0 }.to_string(), "P2");
    }
}
