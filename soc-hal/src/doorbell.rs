//! Inter-processor doorbell HAL traits
//!
//! A doorbell raises an interrupt on the peer core. Platform initialization
//! owns the interrupt registration and routes the peer's doorbell vector to
//! the transport's interrupt entry point; this module only covers the
//! ringing and clearing side.

/// Inter-processor doorbell
pub trait Doorbell: Send + Sync {
    /// Raise the doorbell interrupt on the peer core
    fn ring(&self);

    /// Clear this core's pending doorbell, called from the interrupt handler
    fn clear(&self) {}
}

/// Memory-mapped doorbell with separate set and clear registers.
///
/// Writing `bit` to the set register raises the interrupt on the peer;
/// writing it to the clear register acknowledges the local one.
#[derive(Debug, Clone, Copy)]
pub struct MmioDoorbell {
    set_reg: usize,
    clear_reg: usize,
    bit: u32,
}

impl MmioDoorbell {
    /// Create a doorbell over the given registers
    ///
    /// # Safety
    ///
    /// Both addresses must be valid, mapped device registers for which a
    /// 32-bit volatile write of `1 << bit` has the described effect.
    pub const unsafe fn new(set_reg: usize, clear_reg: usize, bit: u8) -> Self {
        Self {
            set_reg,
            clear_reg,
            bit: 1u32 << (bit % 32),
        }
    }
}

impl Doorbell for MmioDoorbell {
    fn ring(&self) {
        unsafe { core::ptr::write_volatile(self.set_reg as *mut u32, self.bit) };
    }

    fn clear(&self) {
        unsafe { core::ptr::write_volatile(self.clear_reg as *mut u32, self.bit) };
    }
}
