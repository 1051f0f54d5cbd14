//! AArch64 (ARM 64-bit) architecture support
//!
//! Interrupt masking, barriers and data-cache maintenance by virtual address
//! for application cores sharing memory with a non-coherent peer.

/// Interrupt control
pub mod interrupts {
    /// Mask all exceptions and return the previous DAIF value
    #[inline]
    pub fn disable() -> u64 {
        let daif: u64;
        unsafe {
            core::arch::asm!("mrs {}, daif", out(reg) daif);
            core::arch::asm!("msr daifset, #0xf");
        }
        daif
    }

    /// Restore the DAIF value returned by [`disable`]
    #[inline]
    pub fn restore(daif: u64) {
        unsafe {
            core::arch::asm!("msr daif, {}", in(reg) daif);
        }
    }
}

/// Memory barriers
pub mod barriers {
    /// Data synchronization barrier
    #[inline]
    pub fn dsb_sy() {
        unsafe {
            core::arch::asm!("dsb sy");
        }
    }

    /// Instruction synchronization barrier
    #[inline]
    pub fn isb() {
        unsafe {
            core::arch::asm!("isb");
        }
    }
}

/// Cache control
pub mod cache {
    /// Smallest data cache line size, from CTR_EL0.DminLine
    #[inline]
    pub fn dcache_line_size() -> usize {
        let ctr: u64;
        unsafe {
            core::arch::asm!("mrs {}, ctr_el0", out(reg) ctr);
        }
        4 << ((ctr >> 16) & 0xF)
    }

    /// Invalidate data cache line by VA
    #[inline]
    pub unsafe fn invalidate_dcache_line(addr: u64) {
        core::arch::asm!("dc ivac, {}", in(reg) addr);
    }

    /// Clean data cache line by VA
    #[inline]
    pub unsafe fn clean_dcache_line(addr: u64) {
        core::arch::asm!("dc cvac, {}", in(reg) addr);
    }
}
