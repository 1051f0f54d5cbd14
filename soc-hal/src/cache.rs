//! Data cache maintenance HAL traits
//!
//! Two cores that share memory without a coherent interconnect must explicitly
//! push their writes out of the data cache (clean) and discard stale lines
//! before reading (invalidate). Implementations operate on whole cache lines;
//! callers are expected to keep shared objects line-aligned so that an
//! invalidate never discards unrelated dirty data.

/// Data cache maintenance by address range
pub trait CacheMaintenance: Send + Sync {
    /// Cache line size in bytes (a power of two)
    fn line_size(&self) -> usize;

    /// Write back every line overlapping `[addr, addr + len)` to memory
    fn clean(&self, addr: usize, len: usize);

    /// Discard every line overlapping `[addr, addr + len)`
    fn invalidate(&self, addr: usize, len: usize);
}

/// Line-aligned span covering `[addr, addr + len)`.
///
/// Returns `(start, end)` with `start` rounded down and `end` rounded up to
/// `line`. An empty range yields an empty span.
pub const fn line_span(addr: usize, len: usize, line: usize) -> (usize, usize) {
    let mask = line - 1;
    let start = addr & !mask;
    if len == 0 {
        return (start, start);
    }
    let end = (addr + len + mask) & !mask;
    (start, end)
}

/// Cache maintenance for coherent interconnects and hosted builds.
///
/// Every operation is a no-op; the line size is still reported so layouts
/// computed against it match a non-coherent target.
#[derive(Debug, Clone, Copy)]
pub struct Coherent {
    line_size: usize,
}

impl Coherent {
    /// Create with the given nominal line size
    pub const fn new(line_size: usize) -> Self {
        Self { line_size }
    }
}

impl Default for Coherent {
    fn default() -> Self {
        Self::new(32)
    }
}

impl CacheMaintenance for Coherent {
    fn line_size(&self) -> usize {
        self.line_size
    }

    fn clean(&self, _addr: usize, _len: usize) {}

    fn invalidate(&self, _addr: usize, _len: usize) {}
}

/// AArch64 data cache, maintained to the point of coherency
#[cfg(feature = "aarch64")]
#[derive(Debug, Clone, Copy)]
pub struct Aarch64DCache {
    line_size: usize,
}

#[cfg(feature = "aarch64")]
impl Aarch64DCache {
    /// Probe the line size from CTR_EL0
    pub fn probe() -> Self {
        Self {
            line_size: crate::arch_aarch64::cache::dcache_line_size(),
        }
    }
}

#[cfg(feature = "aarch64")]
impl CacheMaintenance for Aarch64DCache {
    fn line_size(&self) -> usize {
        self.line_size
    }

    fn clean(&self, addr: usize, len: usize) {
        use crate::arch_aarch64::{barriers, cache};

        let (mut line, end) = line_span(addr, len, self.line_size);
        while line < end {
            unsafe { cache::clean_dcache_line(line as u64) };
            line += self.line_size;
        }
        barriers::dsb_sy();
    }

    fn invalidate(&self, addr: usize, len: usize) {
        use crate::arch_aarch64::{barriers, cache};

        let (mut line, end) = line_span(addr, len, self.line_size);
        while line < end {
            unsafe { cache::invalidate_dcache_line(line as u64) };
            line += self.line_size;
        }
        barriers::dsb_sy();
    }
}

/// Cortex-M7 class L1 data cache, maintained through the SCB
#[cfg(feature = "armv7m")]
#[derive(Debug, Clone, Copy)]
pub struct CortexMDCache {
    line_size: usize,
}

#[cfg(feature = "armv7m")]
impl CortexMDCache {
    /// Probe the line size from CCSIDR
    pub fn probe() -> Self {
        Self {
            line_size: crate::arch_cortex_m::scb::dcache_line_size(),
        }
    }
}

#[cfg(feature = "armv7m")]
impl CacheMaintenance for CortexMDCache {
    fn line_size(&self) -> usize {
        self.line_size
    }

    fn clean(&self, addr: usize, len: usize) {
        use crate::arch_cortex_m::{barriers, scb};

        let (mut line, end) = line_span(addr, len, self.line_size);
        barriers::dsb();
        while line < end {
            unsafe { scb::clean_dcache_line(line) };
            line += self.line_size;
        }
        barriers::dsb();
        barriers::isb();
    }

    fn invalidate(&self, addr: usize, len: usize) {
        use crate::arch_cortex_m::{barriers, scb};

        let (mut line, end) = line_span(addr, len, self.line_size);
        barriers::dsb();
        while line < end {
            unsafe { scb::invalidate_dcache_line(line) };
            line += self.line_size;
        }
        barriers::dsb();
        barriers::isb();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_rounds_to_lines() {
        assert_eq!(line_span(0x1004, 8, 32), (0x1000, 0x1020));
        assert_eq!(line_span(0x101c, 8, 32), (0x1000, 0x1040));
        assert_eq!(line_span(0x1000, 32, 32), (0x1000, 0x1020));
    }

    #[test]
    fn empty_span() {
        assert_eq!(line_span(0x1010, 0, 32), (0x1000, 0x1000));
    }

    #[test]
    fn coherent_reports_line_size() {
        let cache = Coherent::new(64);
        cache.clean(0, 128);
        cache.invalidate(0, 128);
        assert_eq!(cache.line_size(), 64);
    }
}
