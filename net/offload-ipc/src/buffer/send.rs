//! Send slots
//!
//! A fixed array of slots in the shared window, owned by the application
//! core for their whole lifetime and handed out round-robin. A slot handed
//! to the peer carries `busy` in its header until the peer has copied the
//! payload out and cleared it; the owner never reuses a busy slot.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::buffer::{write_payload, PayloadView};
use crate::cache::{Acquired, CacheBridge, Published, Region};
use crate::error::{Error, Result};
use crate::layout::{PoolRegion, SharedWindow};
use crate::wire::CrossCoreRef;

const SLOT_FREE: u32 = 0;
const SLOT_BUSY: u32 = 1;

fn invalidate_header(pool: &PoolRegion, bridge: &CacheBridge, index: usize) {
    bridge.invalidate_raw(pool.slot_addr(index), pool.header_len());
}

fn set_state(pool: &PoolRegion, bridge: &CacheBridge, index: usize, state: u32) {
    let header = unsafe { pool.header(index) };
    header.state.store(state, Ordering::Release);
    bridge.clean_raw(pool.slot_addr(index), pool.header_len());
}

/// Peer-visible ownership flag of one send slot
pub struct SlotOwnership<'a> {
    state: &'a AtomicU32,
    claimed: &'a AtomicBool,
    pool: &'a PoolRegion,
    bridge: &'a CacheBridge,
    index: usize,
}

impl SlotOwnership<'_> {
    /// Whether the peer may still be reading the slot.
    ///
    /// A slot claimed locally is being filled and has not been handed off;
    /// its header line is left alone so unpublished writes survive.
    pub fn is_referenced_by_peer(&self) -> bool {
        if self.claimed.load(Ordering::Acquire) {
            return false;
        }
        invalidate_header(self.pool, self.bridge, self.index);
        self.state.load(Ordering::Acquire) == SLOT_BUSY
    }

    /// Succeeds only once the peer has let go of the slot
    pub fn try_reclaim(&self) -> Result<()> {
        if self.is_referenced_by_peer() {
            Err(Error::Backpressure)
        } else {
            Ok(())
        }
    }
}

/// Owner side of the send slot array
pub struct SendPool {
    region: PoolRegion,
    claimed: Box<[AtomicBool]>,
    cursor: spin::Mutex<usize>,
    bridge: CacheBridge,
    _window: SharedWindow,
}

impl SendPool {
    pub(crate) fn new(region: PoolRegion, bridge: CacheBridge, window: SharedWindow) -> Self {
        let claimed = (0..region.depth()).map(|_| AtomicBool::new(false)).collect();
        Self {
            region,
            claimed,
            cursor: spin::Mutex::new(0),
            bridge,
            _window: window,
        }
    }

    /// Mark every slot free and restart the round-robin
    pub fn init(&self) {
        let mut cursor = self.cursor.lock();
        for index in 0..self.region.depth() {
            self.claimed[index].store(false, Ordering::Relaxed);
            set_state(&self.region, &self.bridge, index, SLOT_FREE);
        }
        *cursor = 0;
    }

    /// Ownership flag of slot `index`
    pub fn ownership(&self, index: usize) -> Option<SlotOwnership<'_>> {
        if index >= self.region.depth() {
            return None;
        }
        let header = unsafe { self.region.header(index) };
        Some(SlotOwnership {
            state: &header.state,
            claimed: &self.claimed[index],
            pool: &self.region,
            bridge: &self.bridge,
            index,
        })
    }

    /// Take the next slot in round-robin order.
    ///
    /// Never blocks: if that slot is still referenced by the peer the call
    /// fails with `Backpressure` and the cursor stays put, so slots are
    /// reused strictly in order.
    pub fn alloc_send_buffer(&self) -> Result<SendSlot<'_>> {
        let mut cursor = self.cursor.lock();
        let index = *cursor;
        if self.claimed[index].load(Ordering::Acquire) {
            return Err(Error::Backpressure);
        }
        if let Some(ownership) = self.ownership(index) {
            ownership.try_reclaim()?;
        }
        self.claimed[index].store(true, Ordering::Release);
        *cursor = (index + 1) % self.region.depth();
        Ok(SendSlot {
            pool: self,
            index,
            len: 0,
        })
    }

    /// Whether `alloc_send_buffer` would succeed right now
    pub fn can_alloc(&self) -> bool {
        let cursor = self.cursor.lock();
        !self.claimed[*cursor].load(Ordering::Acquire)
            && self
                .ownership(*cursor)
                .map_or(false, |ownership| ownership.try_reclaim().is_ok())
    }

    /// Take back a handed-off slot whose reference never reached the peer
    pub fn revoke(&self, r: CrossCoreRef) -> Result<()> {
        let index = self.region.index_of(r)?;
        set_state(&self.region, &self.bridge, index, SLOT_FREE);
        Ok(())
    }

    /// Slots currently referenced by the peer
    pub fn busy_count(&self) -> usize {
        (0..self.region.depth())
            .filter_map(|index| self.ownership(index))
            .filter(|ownership| ownership.is_referenced_by_peer())
            .count()
    }

    /// Number of slots
    pub fn depth(&self) -> usize {
        self.region.depth()
    }

    /// Payload bytes per slot
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }
}

/// A claimed send slot being filled.
///
/// Dropping it without handing it off returns the slot to the pool.
pub struct SendSlot<'a> {
    pool: &'a SendPool,
    index: usize,
    len: usize,
}

impl SendSlot<'_> {
    /// Copy `segments` in as one payload for interface `channel_index`
    pub fn fill(&mut self, channel_index: u8, segments: &[&[u8]]) -> Result<usize> {
        self.len = write_payload(&self.pool.region, self.index, channel_index, segments)?;
        Ok(self.len)
    }

    /// Slot position in the pool
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

impl Region for SendSlot<'_> {
    fn addr(&self) -> usize {
        self.pool.region.slot_addr(self.index)
    }

    fn len(&self) -> usize {
        self.pool.region.header_len() + self.len
    }
}

impl Drop for SendSlot<'_> {
    fn drop(&mut self) {
        self.pool.claimed[self.index].store(false, Ordering::Release);
    }
}

impl Published<SendSlot<'_>> {
    /// Mark the slot busy and produce the reference to post to the peer
    pub fn hand_off(self) -> CrossCoreRef {
        let slot = self.into_inner();
        let pool = slot.pool;
        set_state(&pool.region, &pool.bridge, slot.index, SLOT_BUSY);
        pool.region.slot_ref(slot.index)
    }
}

/// Peer side view of the send slot array
pub struct PeerSendPool {
    region: PoolRegion,
    bridge: CacheBridge,
    _window: SharedWindow,
}

impl PeerSendPool {
    pub(crate) fn new(region: PoolRegion, bridge: CacheBridge, window: SharedWindow) -> Self {
        Self {
            region,
            bridge,
            _window: window,
        }
    }

    /// Resolve a transmitted reference to its payload
    pub fn acquire(&self, r: CrossCoreRef) -> Result<Acquired<PayloadView<'_>>> {
        let index = self.region.index_of(r)?;
        invalidate_header(&self.region, &self.bridge, index);
        let header = unsafe { self.region.header(index) };
        if header.state.load(Ordering::Acquire) != SLOT_BUSY {
            log::error!("send slot {} referenced but not busy", r);
            return Err(Error::InvalidRef);
        }
        PayloadView::acquire(&self.region, &self.bridge, index)
    }

    /// Let the owner reuse the slot. Interrupt safe.
    pub fn release(&self, r: CrossCoreRef) -> Result<()> {
        let index = self.region.index_of(r)?;
        set_state(&self.region, &self.bridge, index, SLOT_FREE);
        log::trace!("send slot {} released", r);
        Ok(())
    }
}
