//! Instruction cache maintenance after writing code

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86_64", target_arch = "x86"))] {
        /// x86 keeps instruction fetch coherent with data writes
        pub(super) fn sync_icache(_base: u64, _len: usize) {}
    } else if #[cfg(target_arch = "aarch64")] {
        /// Clean data cache lines to the point of unification, then
        /// invalidate the matching instruction cache lines
        pub(super) fn sync_icache(base: u64, len: usize) {
            if len == 0 {
                return;
            }
            let ctr: u64;
            // SAFETY: CTR_EL0 is readable at EL1 and EL2
            unsafe { core::arch::asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack)) };
            let dline = 4u64 << ((ctr >> 16) & 0xf);
            let iline = 4u64 << (ctr & 0xf);
            let end = base + len as u64;

            let mut addr = base & !(dline - 1);
            while addr < end {
                // SAFETY: cache maintenance on mapped memory
                unsafe { core::arch::asm!("dc cvau, {}", in(reg) addr, options(nostack)) };
                addr += dline;
            }
            // SAFETY: barrier only
            unsafe { core::arch::asm!("dsb ish", options(nostack)) };

            let mut addr = base & !(iline - 1);
            while addr < end {
                // SAFETY: cache maintenance on mapped memory
                unsafe { core::arch::asm!("ic ivau, {}", in(reg) addr, options(nostack)) };
                addr += iline;
            }
            // SAFETY: barriers only
            unsafe { core::arch::asm!("dsb ish", "isb", options(nostack)) };
        }
    } else {
        pub(super) fn sync_icache(_base: u64, _len: usize) {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}
