//! Cross-core packet buffers
//!
//! Two ownership regimes share one slot format (a header line followed by
//! line-rounded payload):
//!
//! - [`send`]: the application core's round-robin send slots. The memory
//!   never changes owner; the peer clears the header's `busy` word once it
//!   has copied the payload out.
//! - [`receive`]: the offload core's receive buffers. Lent to the
//!   application core by reference and reusable only after an explicit
//!   `BufferReleased` comes back.
//!
//! The side that does not own a pool only gets a read-only [`PayloadView`]
//! through `acquire`.

pub mod receive;
pub mod send;

pub use receive::{OwnedReceiveBuffer, PeerReceivePool, ReceivePool, ReleaseOutcome};
pub use send::{PeerSendPool, SendPool, SendSlot, SlotOwnership};

use core::sync::atomic::Ordering;

use crate::cache::{Acquired, CacheBridge, Region};
use crate::error::{Error, Result};
use crate::layout::PoolRegion;
use crate::wire::CrossCoreRef;

/// Copy `segments` back to back into slot `index`'s payload area and record
/// the length and interface in its header. Returns the total length.
fn write_payload(pool: &PoolRegion, index: usize, channel_index: u8, segments: &[&[u8]]) -> Result<usize> {
    let total: usize = segments.iter().map(|s| s.len()).sum();
    if total > pool.capacity() {
        return Err(Error::PayloadTooLarge {
            len: total,
            capacity: pool.capacity(),
        });
    }

    let mut dst = pool.data_ptr(index);
    for segment in segments {
        unsafe {
            core::ptr::copy_nonoverlapping(segment.as_ptr(), dst, segment.len());
            dst = dst.add(segment.len());
        }
    }

    let header = unsafe { pool.header(index) };
    header.len.store(total as u32, Ordering::Relaxed);
    header.channel_index.store(channel_index as u32, Ordering::Relaxed);
    Ok(total)
}

/// Read-only view of a peer-owned buffer's payload
#[derive(Debug)]
pub struct PayloadView<'a> {
    pool: &'a PoolRegion,
    index: usize,
    len: usize,
    channel_index: u8,
}

impl<'a> PayloadView<'a> {
    /// Invalidate the slot header, validate it and invalidate the payload.
    ///
    /// The caller has already resolved `r` to `index`. A header claiming
    /// more than the slot holds fails with `PayloadTooLarge`; the reference
    /// itself is still good and its buffer must go back to the owner.
    fn acquire(pool: &'a PoolRegion, bridge: &CacheBridge, index: usize) -> Result<Acquired<Self>> {
        bridge.invalidate_raw(pool.slot_addr(index), pool.header_len());
        let header = unsafe { pool.header(index) };
        let len = header.len.load(Ordering::Relaxed) as usize;
        if len > pool.capacity() {
            log::error!(
                "peer buffer {} claims {} bytes, capacity {}",
                index,
                len,
                pool.capacity()
            );
            return Err(Error::PayloadTooLarge {
                len,
                capacity: pool.capacity(),
            });
        }
        let channel_index = header.channel_index.load(Ordering::Relaxed) as u8;
        Ok(bridge.acquire(PayloadView {
            pool,
            index,
            len,
            channel_index,
        }))
    }

    /// Payload bytes
    pub fn bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.pool.data_ptr(self.index), self.len) }
    }

    /// Interface index recorded by the owner
    pub fn channel_index(&self) -> u8 {
        self.channel_index
    }

    /// Reference the view was acquired from
    pub fn buffer_ref(&self) -> CrossCoreRef {
        self.pool.slot_ref(self.index)
    }
}

impl Region for PayloadView<'_> {
    fn addr(&self) -> usize {
        self.pool.data_addr(self.index)
    }

    fn len(&self) -> usize {
        self.len
    }
}
