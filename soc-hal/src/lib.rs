//! SoC Hardware Abstraction Layer for cross-core transports
//!
//! This crate describes the hardware a shared-memory transport between an
//! application core and a network-offload core stands on. It deliberately
//! stops at the boundary: peripheral programming, clock gating and pin muxing
//! live in the board crates.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Cross-core transport (offload-ipc)              │
//! └──────────────────────────┬──────────────────────────────────────┘
//!                            │
//! ┌──────────────────────────▼──────────────────────────────────────┐
//! │                       soc-hal Traits                             │
//! │  ┌──────────────┐ ┌──────────┐ ┌─────────┐ ┌────────────────┐   │
//! │  │ Cache maint. │ │ Doorbell │ │ DelayUs │ │ Critical sect. │   │
//! │  └──────┬───────┘ └────┬─────┘ └────┬────┘ └───────┬────────┘   │
//! └─────────┼──────────────┼────────────┼──────────────┼────────────┘
//!           ▼              ▼            ▼              ▼
//! │     AArch64 / Cortex-M / coherent host implementations          │
//! ```
//!
//! # HAL Traits
//!
//! - [`cache::CacheMaintenance`] - data cache clean / invalidate by range
//! - [`doorbell::Doorbell`] - inter-processor interrupt
//! - [`delay::DelayUs`] - busy-wait delay usable with interrupts masked
//!
//! [`window::MemoryWindow`] describes the shared physical range handed over
//! by platform initialization.

#![cfg_attr(not(test), no_std)]

// Core modules
pub mod cache;
pub mod delay;
pub mod doorbell;
pub mod error;
pub mod window;

// Architecture-specific modules
#[cfg(feature = "armv7m")]
pub mod arch_cortex_m;

#[cfg(feature = "aarch64")]
pub mod arch_aarch64;

// Re-exports
pub use cache::{CacheMaintenance, Coherent};
pub use delay::{DelayUs, SpinDelay};
pub use doorbell::{Doorbell, MmioDoorbell};
pub use error::{Error, Result};
pub use window::MemoryWindow;

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    /// ARM v7-M / v8-M (Cortex-M application or offload cores)
    ARMv7M,
    /// ARM v8 (64-bit application cores)
    AArch64,
    /// RISC-V 32-bit (offload cores on newer parts)
    RISCV32,
}

impl Architecture {
    /// Typical L1 data cache line size in bytes
    pub const fn cache_line_size(&self) -> usize {
        match self {
            Architecture::ARMv7M | Architecture::RISCV32 => 32,
            Architecture::AArch64 => 64,
        }
    }

    /// Get architecture name
    pub const fn name(&self) -> &'static str {
        match self {
            Architecture::ARMv7M => "ARMv7-M",
            Architecture::AArch64 => "AArch64",
            Architecture::RISCV32 => "RISC-V RV32",
        }
    }
}

/// Critical section guard
#[cfg(feature = "critical-section")]
pub mod critical_section {
    /// Critical section token proving interrupts are disabled
    #[derive(Debug)]
    pub struct CriticalSection {
        _private: (),
    }

    impl CriticalSection {
        /// Create a new critical section token
        ///
        /// # Safety
        ///
        /// Caller must ensure interrupts are disabled before calling this function.
        #[inline]
        pub unsafe fn new() -> Self {
            Self { _private: () }
        }
    }

    /// Execute code in a critical section with interrupts disabled
    #[inline]
    pub fn with<R>(f: impl FnOnce(&CriticalSection) -> R) -> R {
        #[cfg(feature = "armv7m")]
        {
            let was_enabled = crate::arch_cortex_m::interrupts::disable();
            let cs = unsafe { CriticalSection::new() };
            let result = f(&cs);
            crate::arch_cortex_m::interrupts::restore(was_enabled);
            result
        }

        #[cfg(all(feature = "aarch64", not(feature = "armv7m")))]
        {
            let daif = crate::arch_aarch64::interrupts::disable();
            let cs = unsafe { CriticalSection::new() };
            let result = f(&cs);
            crate::arch_aarch64::interrupts::restore(daif);
            result
        }

        #[cfg(all(feature = "riscv32", not(any(feature = "armv7m", feature = "aarch64"))))]
        unsafe {
            let mstatus: u32;
            core::arch::asm!("csrr {}, mstatus", out(reg) mstatus);
            core::arch::asm!("csrci mstatus, 8"); // Disable MIE
            let cs = CriticalSection::new();
            let result = f(&cs);
            if mstatus & 8 != 0 {
                core::arch::asm!("csrsi mstatus, 8"); // Enable MIE
            }
            result
        }

        #[cfg(not(any(feature = "armv7m", feature = "aarch64", feature = "riscv32")))]
        {
            // Hosted builds: no local interrupts to mask
            let cs = unsafe { CriticalSection::new() };
            f(&cs)
        }
    }

    /// Mutex shared between interrupt and task context.
    ///
    /// Masks local interrupts so an ISR can never spin on a lock held by the
    /// task it preempted, and takes a spin lock so a second core (or a
    /// hosted thread) is excluded as well.
    pub struct IrqMutex<T> {
        inner: spin::Mutex<T>,
    }

    impl<T> IrqMutex<T> {
        /// Create a new mutex
        pub const fn new(data: T) -> Self {
            Self {
                inner: spin::Mutex::new(data),
            }
        }

        /// Run `f` with exclusive access, interrupts masked for the duration
        pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
            with(|_cs| {
                let mut guard = self.inner.lock();
                f(&mut guard)
            })
        }
    }

}
