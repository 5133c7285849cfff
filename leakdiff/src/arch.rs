//! Architecture-specific primitives used by [`crate::channel::PerfChannel`].
//!
//! These are thin wrappers around single instructions. Everything that
//! dereferences an address is `unsafe`: callers must pass addresses inside
//! memory they own for the duration of the call.

/// Full memory/ordering barrier.
#[inline(always)]
pub fn fence() {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_mfence();
        core::arch::x86_64::_mm_lfence();
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("dsb sy", "isb", options(nostack, preserves_flags));
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

/// Read the timestamp counter.
#[inline(always)]
pub fn timestamp() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        let res: u64;
        core::arch::asm!("mrs {}, cntvct_el0", out(reg) res,
            options(nomem, nostack, preserves_flags));
        res
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// Read hardware counter `idx` with `rdpmc`. Returns `None` on targets
/// without a userspace counter read.
///
/// # Safety
/// Faults unless the kernel allows userspace reads of counter `idx`.
#[inline(always)]
pub unsafe fn rdpmc(idx: u32) -> Option<u64> {
    #[cfg(target_arch = "x86_64")]
    {
        let (lo, hi): (u32, u32);
        core::arch::asm!("rdpmc", in("ecx") idx, out("eax") lo, out("edx") hi,
            options(nomem, nostack, preserves_flags));
        Some(((hi as u64) << 32) | lo as u64)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = idx;
        None
    }
}

/// Evict the line containing `addr` from every level of the hierarchy.
///
/// # Safety
/// `addr` must point into mapped memory.
#[inline(always)]
pub unsafe fn flush_line(addr: usize) {
    #[cfg(target_arch = "x86_64")]
    core::arch::x86_64::_mm_clflush(addr as *const u8);
    #[cfg(target_arch = "aarch64")]
    core::arch::asm!("dc civac, {}", in(reg) addr, options(nostack, preserves_flags));
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    let _ = addr;
}

/// Read a single byte at `addr`.
///
/// # Safety
/// `addr` must point into mapped, readable memory.
#[inline(always)]
pub unsafe fn touch(addr: usize) {
    core::ptr::read_volatile(addr as *const u8);
}

/// Scrub branch-target state by running through a sled of taken jumps.
#[inline(always)]
pub fn scrub_btb<const CNT: usize>() {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::asm!(r#"
        .rept {cnt}
        jmp 2f
        2:
        .endr
        "#, cnt = const CNT,
        );
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!(r#"
        .rept {cnt}
        b 2f
        2:
        .endr
        "#, cnt = const CNT,
        );
    }
}
