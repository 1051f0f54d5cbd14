//! Receive buffers
//!
//! Owned by the offload core. A buffer is filled, lent to the application
//! core by reference and stays lent until that core sends `BufferReleased`.
//! Release is a compare-and-swap from `LENT` to `FREE`, so a duplicate
//! release for the same reference cannot free the buffer twice.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::buffer::{write_payload, PayloadView};
use crate::cache::{Acquired, CacheBridge, Published, Region};
use crate::error::{Error, Result};
use crate::layout::{PoolRegion, SharedWindow};
use crate::wire::CrossCoreRef;

const FREE: u8 = 0;
const FILLING: u8 = 1;
const LENT: u8 = 2;

/// Result of returning a buffer to its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The buffer was lent and is now free
    Freed,
    /// The buffer was not lent; nothing changed
    AlreadyReleased,
}

/// Owner side of the receive buffer pool
pub struct ReceivePool {
    region: PoolRegion,
    states: Box<[AtomicU8]>,
    _window: SharedWindow,
}

impl ReceivePool {
    pub(crate) fn new(region: PoolRegion, window: SharedWindow) -> Self {
        let states = (0..region.depth()).map(|_| AtomicU8::new(FREE)).collect();
        Self {
            region,
            states,
            _window: window,
        }
    }

    /// Forget every outstanding loan
    pub fn init(&self) {
        for state in self.states.iter() {
            state.store(FREE, Ordering::Relaxed);
        }
    }

    /// Take any free buffer, or fail with `Backpressure`
    pub fn alloc(&self) -> Result<OwnedReceiveBuffer<'_>> {
        self.states
            .iter()
            .position(|state| {
                state
                    .compare_exchange(FREE, FILLING, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            })
            .map(|index| OwnedReceiveBuffer {
                pool: self,
                index,
                len: 0,
                lent: false,
            })
            .ok_or(Error::Backpressure)
    }

    /// Return a lent buffer. Idempotent: releasing a buffer that is not
    /// lent reports `AlreadyReleased` and changes nothing.
    pub fn release(&self, r: CrossCoreRef) -> Result<ReleaseOutcome> {
        let index = self.region.index_of(r)?;
        match self.states[index].compare_exchange(LENT, FREE, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => {
                log::trace!("receive buffer {} released", r);
                Ok(ReleaseOutcome::Freed)
            }
            Err(_) => Ok(ReleaseOutcome::AlreadyReleased),
        }
    }

    /// Take back a lent buffer whose reference never reached the peer
    pub fn reclaim_unsent(&self, r: CrossCoreRef) -> Result<()> {
        if self.release(r)? == ReleaseOutcome::AlreadyReleased {
            log::warn!("reclaiming receive buffer {} that was not lent", r);
        }
        Ok(())
    }

    /// Buffers lent to the peer
    pub fn outstanding(&self) -> usize {
        self.count(LENT)
    }

    /// Buffers available to `alloc`
    pub fn free_count(&self) -> usize {
        self.count(FREE)
    }

    fn count(&self, wanted: u8) -> usize {
        self.states
            .iter()
            .filter(|state| state.load(Ordering::Relaxed) == wanted)
            .count()
    }

    /// Number of buffers
    pub fn depth(&self) -> usize {
        self.region.depth()
    }

    /// Payload bytes per buffer
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }
}

/// A receive buffer being filled by its owner.
///
/// Dropping it without lending it returns it to the pool.
pub struct OwnedReceiveBuffer<'a> {
    pool: &'a ReceivePool,
    index: usize,
    len: usize,
    lent: bool,
}

impl OwnedReceiveBuffer<'_> {
    /// Copy `segments` in as one payload for interface `channel_index`
    pub fn fill(&mut self, channel_index: u8, segments: &[&[u8]]) -> Result<usize> {
        self.len = write_payload(&self.pool.region, self.index, channel_index, segments)?;
        Ok(self.len)
    }

    /// Buffer position in the pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Payload length written so far
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no payload has been written
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Region for OwnedReceiveBuffer<'_> {
    fn addr(&self) -> usize {
        self.pool.region.slot_addr(self.index)
    }

    fn len(&self) -> usize {
        self.pool.region.header_len() + self.len
    }
}

impl Drop for OwnedReceiveBuffer<'_> {
    fn drop(&mut self) {
        if !self.lent {
            self.pool.states[self.index].store(FREE, Ordering::Release);
        }
    }
}

impl Published<OwnedReceiveBuffer<'_>> {
    /// Lend the buffer to the peer until it is released
    pub fn lend(self) -> CrossCoreRef {
        let mut buffer = self.into_inner();
        buffer.pool.states[buffer.index].store(LENT, Ordering::Release);
        buffer.lent = true;
        buffer.pool.region.slot_ref(buffer.index)
    }
}

/// Borrower side view of the receive buffer pool
pub struct PeerReceivePool {
    region: PoolRegion,
    bridge: CacheBridge,
    _window: SharedWindow,
}

impl PeerReceivePool {
    pub(crate) fn new(region: PoolRegion, bridge: CacheBridge, window: SharedWindow) -> Self {
        Self {
            region,
            bridge,
            _window: window,
        }
    }

    /// Resolve a lent reference to its payload; read-only
    pub fn acquire(&self, r: CrossCoreRef) -> Result<Acquired<PayloadView<'_>>> {
        let index = self.region.index_of(r)?;
        PayloadView::acquire(&self.region, &self.bridge, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::tests::small_window;

    fn pools() -> (ReceivePool, PeerReceivePool, CacheBridge) {
        let (window, layout, _) = small_window(128);
        let bridge = CacheBridge::coherent(32);
        let pool = ReceivePool::new(layout.receive_pool(), window.clone());
        let peer = PeerReceivePool::new(layout.receive_pool(), bridge.clone(), window);
        (pool, peer, bridge)
    }

    fn lend(pool: &ReceivePool, bridge: &CacheBridge, payload: &[u8]) -> CrossCoreRef {
        let mut buffer = pool.alloc().unwrap();
        buffer.fill(2, &[payload]).unwrap();
        bridge.publish(buffer).lend()
    }

    #[test]
    fn lent_until_released() {
        let (pool, peer, bridge) = pools();
        let r = lend(&pool, &bridge, b"frame");
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.free_count(), 2);

        let view = peer.acquire(r).unwrap();
        assert_eq!(view.bytes(), b"frame");
        assert_eq!(view.channel_index(), 2);
        drop(view);

        assert_eq!(pool.release(r), Ok(ReleaseOutcome::Freed));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn release_is_idempotent() {
        let (pool, _peer, bridge) = pools();
        let r = lend(&pool, &bridge, b"x");
        let _other = lend(&pool, &bridge, b"y");

        assert_eq!(pool.release(r), Ok(ReleaseOutcome::Freed));
        assert_eq!(pool.release(r), Ok(ReleaseOutcome::AlreadyReleased));
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn exhaustion_and_drop() {
        let (pool, _peer, bridge) = pools();
        let refs: alloc::vec::Vec<_> = (0..3).map(|_| lend(&pool, &bridge, b"z")).collect();
        assert_eq!(pool.alloc().err(), Some(Error::Backpressure));

        pool.reclaim_unsent(refs[1]).unwrap();
        let buffer = pool.alloc().unwrap();
        assert_eq!(buffer.index(), 1);
        drop(buffer);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn corrupt_length_names_a_real_buffer() {
        let (pool, peer, bridge) = pools();
        let r = lend(&pool, &bridge, b"frame");
        let index = pool.region.index_of(r).unwrap();
        unsafe { pool.region.header(index) }.len.store(4096, Ordering::Relaxed);

        assert_eq!(
            peer.acquire(r).err(),
            Some(Error::PayloadTooLarge {
                len: 4096,
                capacity: 128
            })
        );
        assert_eq!(pool.release(r), Ok(ReleaseOutcome::Freed));
    }

    #[test]
    fn reference_into_wrong_pool_rejected() {
        let (_window, layout, _) = small_window(128);
        let (pool, peer, _bridge) = pools();
        let stray = layout.send_pool().slot_ref(0);
        assert_eq!(pool.release(stray), Err(Error::InvalidRef));
        assert_eq!(peer.acquire(stray).err(), Some(Error::InvalidRef));
    }
}
