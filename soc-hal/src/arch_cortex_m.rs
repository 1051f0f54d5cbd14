//! ARM Cortex-M architecture support (Cortex-M7 and M33 class cores)
//!
//! Only the pieces a cross-core transport needs: interrupt masking, barriers
//! and the SCB data-cache maintenance registers.

/// Interrupt control
pub mod interrupts {
    /// Disable interrupts and return whether they were enabled before
    #[inline]
    pub fn disable() -> bool {
        let primask: u32;
        unsafe {
            core::arch::asm!(
                "mrs {0}, primask",
                "cpsid i",
                out(reg) primask,
            );
        }
        primask & 1 == 0
    }

    /// Restore the state returned by [`disable`]
    #[inline]
    pub fn restore(was_enabled: bool) {
        if was_enabled {
            unsafe {
                core::arch::asm!("cpsie i");
            }
        }
    }
}

/// Memory barriers
pub mod barriers {
    /// Data synchronization barrier
    #[inline]
    pub fn dsb() {
        unsafe {
            core::arch::asm!("dsb sy");
        }
    }

    /// Instruction synchronization barrier
    #[inline]
    pub fn isb() {
        unsafe {
            core::arch::asm!("isb sy");
        }
    }
}

/// SCB cache maintenance operations (ARMv7-M L1 data cache)
pub mod scb {
    /// Cache Size ID Register
    const CCSIDR: usize = 0xE000_ED80;
    /// Cache Size Selection Register
    const CSSELR: usize = 0xE000_ED84;
    /// D-cache invalidate by MVA to PoC
    const DCIMVAC: usize = 0xE000_EF5C;
    /// D-cache clean by MVA to PoC
    const DCCMVAC: usize = 0xE000_EF68;

    /// L1 data cache line size in bytes
    pub fn dcache_line_size() -> usize {
        unsafe {
            core::ptr::write_volatile(CSSELR as *mut u32, 0);
            super::barriers::dsb();
            let ccsidr = core::ptr::read_volatile(CCSIDR as *const u32);
            1 << ((ccsidr & 0x7) + 4)
        }
    }

    /// Clean one data cache line by address
    #[inline]
    pub unsafe fn clean_dcache_line(addr: usize) {
        core::ptr::write_volatile(DCCMVAC as *mut u32, addr as u32);
    }

    /// Invalidate one data cache line by address
    #[inline]
    pub unsafe fn invalidate_dcache_line(addr: usize) {
        core::ptr::write_volatile(DCIMVAC as *mut u32, addr as u32);
    }
}
