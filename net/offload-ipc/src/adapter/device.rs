//! Offload core side
//!
//! Lends its receive buffers to the application core with `ReceivePackets`
//! and frees them on `BufferReleased`. Consumes `TransmitPackets` by copying
//! the send slot into a native packet and clearing the slot's busy flag.
//! Transmits for interfaces that are down are dropped in interrupt context
//! without taking a queue node.

use crate::adapter::{BufferUsage, Context, SideAdapter};
use crate::buffer::{PeerSendPool, ReceivePool, ReleaseOutcome};
use crate::cache::CacheBridge;
use crate::error::{Error, Result};
use crate::mailbox::Admission;
use crate::wire::{EventKind, WireMessage};

/// Offload core half of a channel.
///
/// Owns the receive buffers and consumes the application core's send slots.
pub struct DeviceAdapter {
    ctx: Context,
    receive_pool: ReceivePool,
    peer_send: PeerSendPool,
    bridge: CacheBridge,
}

impl DeviceAdapter {
    pub(crate) fn new(
        ctx: Context,
        receive_pool: ReceivePool,
        peer_send: PeerSendPool,
        bridge: CacheBridge,
    ) -> Self {
        Self {
            ctx,
            receive_pool,
            peer_send,
            bridge,
        }
    }

    /// The receive buffer pool
    pub fn receive_pool(&self) -> &ReceivePool {
        &self.receive_pool
    }

    fn release_send_slot(&self, msg: &WireMessage) {
        if let Err(err) = self.peer_send.release(msg.buffer_ref()) {
            log::error!("could not release send slot {}: {}", msg.buffer_ref(), err);
        }
    }
}

impl SideAdapter for DeviceAdapter {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn packet_event(&self) -> EventKind {
        EventKind::TransmitPackets
    }

    fn reset(&self) {
        self.receive_pool.init();
    }

    fn prepare_send(&self, channel_index: u8, segments: &[&[u8]]) -> Result<WireMessage> {
        let mut buffer = match self.receive_pool.alloc() {
            Ok(buffer) => buffer,
            Err(Error::Backpressure) => {
                log::trace!("receive buffers exhausted on interface {}", channel_index);
                self.ctx.stats.record_tx_backpressure();
                return Err(Error::Backpressure);
            }
            Err(err) => return Err(err),
        };
        buffer.fill(channel_index, segments)?;
        let buffer_ref = self.bridge.publish(buffer).lend();
        Ok(WireMessage::receive(buffer_ref, channel_index))
    }

    fn abandon(&self, msg: &WireMessage) {
        if let Err(err) = self.receive_pool.reclaim_unsent(msg.buffer_ref()) {
            log::error!("could not reclaim receive buffer {}: {}", msg.buffer_ref(), err);
        }
    }

    fn screen(&self, msg: &WireMessage) -> Admission {
        if msg.event() != EventKind::TransmitPackets {
            return Admission::Enqueue;
        }
        match self.ctx.interfaces.check(msg.channel_index()) {
            Ok(()) => Admission::Enqueue,
            Err(err) => {
                log::debug!("discarding transmit on interface {}: {}", msg.channel_index(), err);
                self.release_send_slot(msg);
                self.ctx.stats.record_inactive_discard();
                Admission::Handled
            }
        }
    }

    fn on_dropped(&self, msg: &WireMessage) {
        match msg.event() {
            EventKind::TransmitPackets => self.release_send_slot(msg),
            // Freeing is a single compare-and-swap.
            EventKind::BufferReleased => self.on_release_event(msg),
            _ => {}
        }
    }

    fn on_receive_event(&self, msg: &WireMessage) {
        let channel_index = msg.channel_index();
        if let Err(err) = self.ctx.interfaces.check(channel_index) {
            log::debug!("interface {} went down, discarding transmit: {}", channel_index, err);
            self.release_send_slot(msg);
            self.ctx.stats.record_inactive_discard();
            return;
        }

        let view = match self.peer_send.acquire(msg.buffer_ref()) {
            Ok(view) => view,
            Err(err @ Error::PayloadTooLarge { .. }) => {
                log::error!("corrupt send slot {}: {}", msg.buffer_ref(), err);
                self.release_send_slot(msg);
                return;
            }
            Err(err) => {
                log::error!("bad send slot {}: {}", msg.buffer_ref(), err);
                return;
            }
        };

        let Some(mut packet) = self.ctx.upstream.alloc_packet(view.bytes().len()) else {
            log::warn!(
                "no memory for {} byte transmit on interface {}, dropping",
                view.bytes().len(),
                channel_index
            );
            drop(view);
            self.ctx.stats.record_native_alloc_failure();
            self.release_send_slot(msg);
            match self.ctx.post(WireMessage::memory_shortage(channel_index)) {
                Ok(()) => self.ctx.stats.record_memory_shortage(),
                Err(err) => log::error!("could not report memory shortage: {}", err),
            }
            return;
        };
        packet.extend_from_slice(view.bytes());
        drop(view);
        self.release_send_slot(msg);

        log::trace!("transmitting {} bytes on interface {}", packet.len(), channel_index);
        self.ctx.upstream.deliver_incoming(channel_index, packet);
        self.ctx.stats.record_delivered();
    }

    fn on_release_event(&self, msg: &WireMessage) {
        match self.receive_pool.release(msg.buffer_ref()) {
            Ok(ReleaseOutcome::Freed) => {}
            Ok(ReleaseOutcome::AlreadyReleased) => {
                log::warn!("duplicate release of receive buffer {}", msg.buffer_ref());
                self.ctx.stats.record_duplicate_release();
            }
            Err(err) => {
                log::error!("peer released unknown buffer {}: {}", msg.buffer_ref(), err);
                self.ctx.stats.record_release_failure();
            }
        }
    }

    fn buffer_usage(&self) -> BufferUsage {
        BufferUsage {
            depth: self.receive_pool.depth(),
            in_peer_use: self.receive_pool.outstanding(),
        }
    }
}
