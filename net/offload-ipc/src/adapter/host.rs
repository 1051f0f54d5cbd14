//! Application core side
//!
//! Transmits by filling its own send slots and posting `TransmitPackets`.
//! Receives `ReceivePackets` referencing the offload core's buffers, copies
//! each payload into a native packet and returns the buffer with exactly
//! one `BufferReleased`.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::adapter::{BufferUsage, Context, SideAdapter};
use crate::buffer::{PeerReceivePool, SendPool};
use crate::cache::CacheBridge;
use crate::error::{Error, Result};
use crate::status::{ChannelFlags, MAX_INTERFACES};
use crate::wire::{EventKind, WireMessage};

/// Application core half of a channel.
///
/// Owns the send slots and borrows the offload core's receive buffers.
pub struct HostAdapter {
    ctx: Context,
    send_pool: SendPool,
    peer_receive: PeerReceivePool,
    bridge: CacheBridge,
    /// Interfaces that saw `Backpressure` and wait for `transmit_ready`
    stalled: AtomicU32,
}

impl HostAdapter {
    pub(crate) fn new(
        ctx: Context,
        send_pool: SendPool,
        peer_receive: PeerReceivePool,
        bridge: CacheBridge,
    ) -> Self {
        Self {
            ctx,
            send_pool,
            peer_receive,
            bridge,
            stalled: AtomicU32::new(0),
        }
    }

    /// The send slot array
    pub fn send_pool(&self) -> &SendPool {
        &self.send_pool
    }

    fn mark_stalled(&self, channel_index: u8) {
        if channel_index < MAX_INTERFACES {
            self.stalled.fetch_or(1 << channel_index, Ordering::AcqRel);
        }
        self.ctx.status.insert(ChannelFlags::TX_STALLED);
    }

    /// Notify stalled interfaces once the next send slot is free again
    pub fn poll_transmit_capacity(&self) {
        if self.stalled.load(Ordering::Acquire) == 0 || !self.send_pool.can_alloc() {
            return;
        }
        self.ctx.status.remove(ChannelFlags::TX_STALLED);
        let mut stalled = self.stalled.swap(0, Ordering::AcqRel);
        while stalled != 0 {
            let index = stalled.trailing_zeros() as u8;
            stalled &= stalled - 1;
            log::trace!("transmit capacity back for interface {}", index);
            self.ctx.upstream.transmit_ready(index);
        }
    }

    fn send_release(&self, msg: &WireMessage) {
        let release = WireMessage::released(msg.buffer_ref(), msg.channel_index());
        match self.ctx.post(release) {
            Ok(()) => self.ctx.stats.record_release_sent(),
            Err(err) => {
                log::error!("could not release receive buffer {}: {}", msg.buffer_ref(), err);
                self.ctx.stats.record_release_failure();
            }
        }
    }
}

impl SideAdapter for HostAdapter {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn packet_event(&self) -> EventKind {
        EventKind::ReceivePackets
    }

    fn reset(&self) {
        self.send_pool.init();
        self.stalled.store(0, Ordering::Relaxed);
    }

    fn prepare_send(&self, channel_index: u8, segments: &[&[u8]]) -> Result<WireMessage> {
        let mut slot = match self.send_pool.alloc_send_buffer() {
            Ok(slot) => slot,
            Err(Error::Backpressure) => {
                log::trace!("send slots exhausted, interface {} stalled", channel_index);
                self.mark_stalled(channel_index);
                self.ctx.stats.record_tx_backpressure();
                return Err(Error::Backpressure);
            }
            Err(err) => return Err(err),
        };
        slot.fill(channel_index, segments)?;
        let buffer_ref = self.bridge.publish(slot).hand_off();
        // A reported shortage applies to earlier packets only.
        self.ctx.status.remove(ChannelFlags::PEER_MEMORY_SHORT);
        Ok(WireMessage::transmit(buffer_ref, channel_index))
    }

    fn abandon(&self, msg: &WireMessage) {
        match msg.event() {
            EventKind::BufferReleased => {
                log::error!("release of receive buffer {} never posted", msg.buffer_ref());
                self.ctx.stats.record_release_failure();
            }
            _ => {
                if let Err(err) = self.send_pool.revoke(msg.buffer_ref()) {
                    log::error!("could not revoke send slot {}: {}", msg.buffer_ref(), err);
                }
            }
        }
    }

    fn on_receive_event(&self, msg: &WireMessage) {
        let channel_index = msg.channel_index();
        if let Err(err) = self.ctx.interfaces.check(channel_index) {
            log::debug!("discarding received packet for interface {}: {}", channel_index, err);
            self.ctx.stats.record_inactive_discard();
            self.send_release(msg);
            return;
        }

        let view = match self.peer_receive.acquire(msg.buffer_ref()) {
            Ok(view) => view,
            Err(err @ Error::PayloadTooLarge { .. }) => {
                log::error!("corrupt receive buffer {}: {}", msg.buffer_ref(), err);
                self.send_release(msg);
                return;
            }
            Err(err) => {
                log::error!("bad receive buffer {}: {}", msg.buffer_ref(), err);
                return;
            }
        };

        let Some(mut packet) = self.ctx.upstream.alloc_packet(view.bytes().len()) else {
            log::warn!(
                "no memory for {} byte packet on interface {}, dropping",
                view.bytes().len(),
                channel_index
            );
            drop(view);
            self.ctx.stats.record_native_alloc_failure();
            self.send_release(msg);
            return;
        };
        packet.extend_from_slice(view.bytes());
        drop(view);

        log::trace!("delivering {} bytes on interface {}", packet.len(), channel_index);
        self.ctx.upstream.deliver_incoming(channel_index, packet);
        self.ctx.stats.record_delivered();
        self.send_release(msg);
    }

    fn on_release_event(&self, msg: &WireMessage) {
        // Send slots are recycled through their busy flag.
        log::warn!("unexpected release of {} from peer", msg.buffer_ref());
    }

    fn on_control_event(&self, msg: &WireMessage) {
        match msg.event() {
            EventKind::MemoryShortage => {
                log::warn!("peer out of packet memory on interface {}", msg.channel_index());
                self.ctx.status.insert(ChannelFlags::PEER_MEMORY_SHORT);
                self.ctx.stats.record_memory_shortage();
            }
            other => log::warn!(
                "ignoring unexpected {:?} on interface {}",
                other,
                msg.channel_index()
            ),
        }
    }

    fn on_dropped(&self, msg: &WireMessage) {
        if msg.event() != EventKind::ReceivePackets {
            return;
        }
        // Posting spins on the mailbox; the send-dispatch task does it.
        let release = WireMessage::released(msg.buffer_ref(), msg.channel_index());
        if let Err(err) = self.ctx.deferred.defer(release) {
            log::error!("could not queue release of {}: {}", msg.buffer_ref(), err);
            self.ctx.stats.record_release_failure();
        }
    }

    fn idle(&self) {
        self.poll_transmit_capacity();
    }

    fn buffer_usage(&self) -> BufferUsage {
        BufferUsage {
            depth: self.send_pool.depth(),
            in_peer_use: self.send_pool.busy_count(),
        }
    }
}
