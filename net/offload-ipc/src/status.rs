//! Channel status flags and the logical interface table

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::error::{Error, Result};

/// Highest number of logical interfaces per channel
pub const MAX_INTERFACES: u8 = 32;

bitflags! {
    /// Channel status
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelFlags: u32 {
        /// Initialized and accepting traffic
        const UP = 1 << 0;
        /// Last acknowledgement from the peer carried `QueueLow`
        const PEER_QUEUE_LOW = 1 << 1;
        /// Peer reported it could not allocate native packet memory
        const PEER_MEMORY_SHORT = 1 << 2;
        /// A submission failed for lack of send buffers
        const TX_STALLED = 1 << 3;
    }
}

/// Atomically updated [`ChannelFlags`]
#[derive(Debug, Default)]
pub struct StatusWord(AtomicU32);

impl StatusWord {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn get(&self) -> ChannelFlags {
        ChannelFlags::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub fn contains(&self, flags: ChannelFlags) -> bool {
        self.get().contains(flags)
    }

    /// Set `flags`; returns the previous value
    pub fn insert(&self, flags: ChannelFlags) -> ChannelFlags {
        ChannelFlags::from_bits_truncate(self.0.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    /// Clear `flags`; returns the previous value
    pub fn remove(&self, flags: ChannelFlags) -> ChannelFlags {
        ChannelFlags::from_bits_truncate(self.0.fetch_and(!flags.bits(), Ordering::AcqRel))
    }

    pub fn set(&self, flags: ChannelFlags, value: bool) {
        if value {
            self.insert(flags);
        } else {
            self.remove(flags);
        }
    }
}

/// Bitmask of running logical interfaces.
///
/// Interfaces start down. Indices at or above [`MAX_INTERFACES`] are never
/// active.
#[derive(Debug, Default)]
pub struct InterfaceTable(AtomicU32);

impl InterfaceTable {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Mark interface `index` up or down
    pub fn set_active(&self, index: u8, active: bool) {
        if index >= MAX_INTERFACES {
            log::warn!("interface {} out of range", index);
            return;
        }
        let bit = 1u32 << index;
        if active {
            self.0.fetch_or(bit, Ordering::AcqRel);
        } else {
            self.0.fetch_and(!bit, Ordering::AcqRel);
        }
    }

    pub fn is_active(&self, index: u8) -> bool {
        index < MAX_INTERFACES && self.0.load(Ordering::Acquire) & (1u32 << index) != 0
    }

    /// `ChannelInactive` unless interface `index` is up
    pub fn check(&self, index: u8) -> Result<()> {
        if self.is_active(index) {
            Ok(())
        } else {
            Err(Error::ChannelInactive)
        }
    }

    /// Raw bitmask
    pub fn bits(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}
