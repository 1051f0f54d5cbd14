//! Busy-wait delay HAL traits

/// Microsecond busy-wait delay
pub trait DelayUs: Send + Sync {
    /// Block the caller for at least `us` microseconds
    fn delay_us(&self, us: u32);
}

/// Calibrated spin-loop delay.
///
/// Usable from any context, including with interrupts masked. Accuracy
/// depends on `loops_per_us` matching the core clock.
#[derive(Debug, Clone, Copy)]
pub struct SpinDelay {
    loops_per_us: u32,
}

impl SpinDelay {
    /// Create a delay spinning `loops_per_us` times per microsecond
    pub const fn new(loops_per_us: u32) -> Self {
        Self { loops_per_us }
    }

    /// Derive the loop count from the core clock, assuming roughly one
    /// spin iteration per four cycles
    pub const fn from_cpu_freq(cpu_freq_hz: u32) -> Self {
        let per_us = cpu_freq_hz / 1_000_000 / 4;
        Self::new(if per_us == 0 { 1 } else { per_us })
    }
}

impl DelayUs for SpinDelay {
    fn delay_us(&self, us: u32) {
        let loops = us.saturating_mul(self.loops_per_us);
        for _ in 0..loops {
            core::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_count_never_zero() {
        let delay = SpinDelay::from_cpu_freq(1_000_000);
        assert_eq!(delay.loops_per_us, 1);
        delay.delay_us(3);
    }

    #[test]
    fn loop_count_scales_with_clock() {
        let delay = SpinDelay::from_cpu_freq(400_000_000);
        assert_eq!(delay.loops_per_us, 100);
    }
}
