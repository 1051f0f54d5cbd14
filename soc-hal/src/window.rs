//! Shared memory window descriptor
//!
//! Platform initialization hands the transport a physical range that both
//! cores map at the same address. The descriptor only carries bounds; it
//! does not grant access by itself.

use crate::error::{Error, Result};

/// Base and size of a memory range visible to both cores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryWindow {
    base: usize,
    size: usize,
}

impl MemoryWindow {
    /// Describe `[base, base + size)`
    pub fn new(base: usize, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidParameter);
        }
        base.checked_add(size).ok_or(Error::Overflow)?;
        Ok(Self { base, size })
    }

    /// First address of the window
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Size in bytes
    pub const fn size(&self) -> usize {
        self.size
    }

    /// One past the last address
    pub const fn end(&self) -> usize {
        self.base + self.size
    }

    /// Check that `[addr, addr + len)` lies inside the window
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.base && end <= self.end(),
            None => false,
        }
    }

    /// Check the base address alignment
    pub const fn is_aligned(&self, align: usize) -> bool {
        self.base % align == 0
    }
}
