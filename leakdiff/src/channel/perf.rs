//! A channel backed by the counters of the host this process is running on.

use std::io::{ self, ErrorKind };
use std::os::fd::AsRawFd;
use std::ptr::addr_of;
use std::sync::atomic::{ compiler_fence, Ordering };

use memmap2::{ Mmap, MmapOptions };
use perf_event::{ Builder, Counter };
use perf_event::hooks::sys::bindings::perf_event_mmap_page;

use crate::arch;
use crate::channel::Channel;
use crate::error::{ LeakError, Result };
use crate::events::CounterEvent;
use crate::util::LeakEnv;

/// A 'perf' counter read from userspace with `rdpmc`, through the metadata
/// page the kernel maps for it.
///
/// Reading a counter with `read(2)` would run kernel code in the middle of
/// a measurement, and the kernel's own accesses would land in the cache
/// being measured.
struct UserCounter {
    event: CounterEvent,
    ctr: Counter,
    page: Mmap,
    last: u64,
}

impl UserCounter {
    fn new(event: CounterEvent) -> Result<Self> {
        let kind = event.perf_event()
            .ok_or_else(|| LeakError::Perf(io::Error::new(
                ErrorKind::Unsupported,
                format!("no perf event for {}", event.name()),
            )))?;
        let mut ctr = Builder::new().kind(kind).build().map_err(LeakError::Perf)?;
        let page = unsafe {
            MmapOptions::new().len(page_size()).map(ctr.as_raw_fd())
        }.map_err(LeakError::Mmap)?;
        ctr.reset().map_err(LeakError::Perf)?;
        ctr.enable().map_err(LeakError::Perf)?;
        Ok(Self { event, ctr, page, last: 0 })
    }

    /// Read the counter, or return `None` if the kernel doesn't currently
    /// allow it to be read from userspace.
    fn read(&self) -> Option<u64> {
        let page = self.page.as_ptr() as *const perf_event_mmap_page;
        loop {
            unsafe {
                let seq = addr_of!((*page).lock).read_volatile();
                compiler_fence(Ordering::Acquire);
                let idx = addr_of!((*page).index).read_volatile();
                let offset = addr_of!((*page).offset).read_volatile();
                let width = addr_of!((*page).pmc_width).read_volatile();
                let raw = if idx == 0 || width == 0 {
                    None
                } else {
                    arch::rdpmc(idx - 1)
                };
                compiler_fence(Ordering::Acquire);
                if addr_of!((*page).lock).read_volatile() == seq {
                    return raw.map(|raw| pmc_value(offset, raw, width));
                }
            }
        }
    }

    fn unreadable(&self) -> io::Error {
        io::Error::new(ErrorKind::Unsupported, format!(
            "{} counter can't be read with rdpmc (see {})",
            self.event.name(), LeakEnv::RDPMC_PATH,
        ))
    }
}

impl Drop for UserCounter {
    fn drop(&mut self) {
        let _ = self.ctr.disable();
    }
}

fn page_size() -> usize {
    nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
        .ok().flatten().map(|n| n as usize).unwrap_or(4096)
}

/// Combine the kernel's `offset` with a `width`-bit raw counter value.
fn pmc_value(offset: i64, raw: u64, width: u16) -> u64 {
    let shift = 64 - (width as u32).min(64);
    let pmc = ((raw << shift) as i64) >> shift;
    offset.wrapping_add(pmc) as u64
}

/// Hosted [`Channel`] built on 'perf' counters and user-mode cache
/// maintenance instructions.
///
/// Userspace has no privileged "flush everything" operation, so flushes
/// evict every line of every registered region instead. A full flush also
/// runs a sled of taken jumps in an attempt to scrub branch-target state;
/// flushing the direction predictor is not possible from here.
///
/// Counters are read with `rdpmc`. If a read fails mid-trial, the previous
/// value is reported (so the counter stays monotonic) and the failure is
/// latched until [`Channel::check`].
///
/// Only addresses inside registered regions are ever dereferenced.
pub struct PerfChannel {
    dcache: UserCounter,
    icache: UserCounter,
    branch: UserCounter,
    fault: Option<io::Error>,
    line: usize,
    regions: Vec<(usize, usize)>,
}

/// Number of jumps used to scrub the BTB on a full flush.
const BTB_SCRUB_JUMPS: usize = 8192;

impl PerfChannel {
    /// Open, map and enable the counters. `line` is the flush granularity.
    pub fn new(line: usize) -> Result<Self> {
        if let Ok(false) = LeakEnv::sysfs_rdpmc_enabled() {
            return Err(LeakError::Perf(io::Error::new(ErrorKind::Unsupported,
                format!("userspace rdpmc is disabled (see {})", LeakEnv::RDPMC_PATH))));
        }
        let res = Self {
            dcache: UserCounter::new(CounterEvent::DCacheReadMiss)?,
            icache: UserCounter::new(CounterEvent::ICacheMiss)?,
            branch: UserCounter::new(CounterEvent::BranchMispredict)?,
            fault: None,
            line,
            regions: Vec::new(),
        };
        for ctr in [&res.dcache, &res.icache, &res.branch] {
            if ctr.read().is_none() {
                return Err(LeakError::Perf(ctr.unreadable()));
            }
        }
        Ok(res)
    }

    /// Add a region that flushes will evict and that may be touched.
    pub fn register_region(&mut self, base: usize, len: usize) {
        tracing::debug!("registered region {:016x}..{:016x}", base, base + len);
        self.regions.push((base, len));
    }

    pub fn owns(&self, addr: usize) -> bool {
        self.regions.iter().any(|(base, len)| addr >= *base && addr < base + len)
    }

    fn flush_regions(&mut self) {
        for (base, len) in self.regions.iter() {
            for addr in (*base..base + len).step_by(self.line) {
                unsafe { arch::flush_line(addr) };
            }
        }
        arch::fence();
    }

    fn read_counter(ctr: &mut UserCounter, fault: &mut Option<io::Error>) -> u64 {
        match ctr.read() {
            Some(val) => { ctr.last = val; val },
            None => {
                if fault.is_none() {
                    *fault = Some(ctr.unreadable());
                }
                ctr.last
            },
        }
    }
}

impl Channel for PerfChannel {
    fn cycles(&mut self) -> u64 { arch::timestamp() }

    fn dcache_misses(&mut self) -> u64 {
        Self::read_counter(&mut self.dcache, &mut self.fault)
    }
    fn icache_misses(&mut self) -> u64 {
        Self::read_counter(&mut self.icache, &mut self.fault)
    }
    fn branch_mispredicts(&mut self) -> u64 {
        Self::read_counter(&mut self.branch, &mut self.fault)
    }

    fn full_flush(&mut self) {
        self.flush_regions();
        arch::scrub_btb::<BTB_SCRUB_JUMPS>();
        arch::fence();
    }

    fn flush_excluding_predictor(&mut self) {
        self.flush_regions();
    }

    fn barrier(&mut self) { arch::fence(); }

    fn touch(&mut self, addr: usize) {
        if self.owns(addr) {
            unsafe { arch::touch(addr) };
        } else {
            tracing::warn!("refusing to touch unregistered address {:016x}", addr);
        }
    }

    fn flush_line(&mut self, addr: usize) {
        if self.owns(addr) {
            unsafe { arch::flush_line(addr) };
        }
    }

    fn branch(&mut self, _site: usize, taken: bool) -> bool {
        std::hint::black_box(taken)
    }

    fn check(&mut self) -> Result<()> {
        match self.fault.take() {
            Some(e) => Err(LeakError::Perf(e)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pmc_value_sign_extends() {
        assert_eq!(pmc_value(100, 5, 48), 105);
        // -1 in 48 bits
        assert_eq!(pmc_value(10, 0xffff_ffff_ffff, 48), 9);
        // bits above the counter width are ignored
        assert_eq!(pmc_value(0, 0xdead_0000_0000_0007, 48), 7);
        assert_eq!(pmc_value(-3, 3, 64), 0);
    }
}
