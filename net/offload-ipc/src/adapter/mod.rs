//! Side adapters
//!
//! The transport is symmetric up to the mailbox; above it each core plays a
//! role. The application core ([`HostAdapter`]) transmits from its send
//! slots and consumes lent receive buffers. The offload core
//! ([`DeviceAdapter`]) lends receive buffers and consumes send slots.
//!
//! Both sides talk to the network stack above them through [`Upstream`].

pub mod device;
pub mod host;

pub use device::DeviceAdapter;
pub use host::HostAdapter;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::dispatch::SendDispatcher;
use crate::error::{Error, Result};
use crate::mailbox::{Admission, MailboxTx};
use crate::stats::ChannelStats;
use crate::status::{ChannelFlags, InterfaceTable, StatusWord};
use crate::wire::{EventKind, FlowStatus, WireMessage};

/// Network stack above the transport
pub trait Upstream: Send + Sync {
    /// Allocate a native packet able to hold `len` bytes.
    ///
    /// `None` means the stack is out of memory; the transport drops the
    /// packet and still returns the shared buffer to its owner.
    fn alloc_packet(&self, len: usize) -> Option<Vec<u8>> {
        let mut packet = Vec::new();
        packet.try_reserve_exact(len).ok()?;
        Some(packet)
    }

    /// Hand a received packet to the stack
    fn deliver_incoming(&self, channel_index: u8, packet: Vec<u8>);

    /// Transmit capacity is available again after a `Backpressure` result
    fn transmit_ready(&self, _channel_index: u8) {}
}

/// Buffers currently held by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage {
    /// Buffers in this side's pool
    pub depth: usize,
    /// Buffers the peer still references
    pub in_peer_use: usize,
}

/// State every adapter shares with its channel
pub struct Context {
    pub(crate) tx: MailboxTx,
    pub(crate) interfaces: InterfaceTable,
    pub(crate) status: StatusWord,
    pub(crate) stats: Arc<ChannelStats>,
    pub(crate) upstream: Arc<dyn Upstream>,
    /// Messages waiting for the send-dispatch task
    pub(crate) deferred: SendDispatcher,
}

impl Context {
    pub(crate) fn new(
        tx: MailboxTx,
        stats: Arc<ChannelStats>,
        upstream: Arc<dyn Upstream>,
        deferred: SendDispatcher,
    ) -> Self {
        Self {
            tx,
            interfaces: InterfaceTable::new(),
            status: StatusWord::new(),
            stats,
            upstream,
            deferred,
        }
    }

    /// Send through the mailbox and track the peer's queue state
    pub(crate) fn post(&self, msg: WireMessage) -> Result<()> {
        let result = self.tx.send(msg);
        self.status.set(
            ChannelFlags::PEER_QUEUE_LOW,
            self.tx.peer_flow() == FlowStatus::QueueLow,
        );
        result
    }
}

/// Role-specific half of a channel
pub trait SideAdapter: Send + Sync {
    /// Shared channel state
    fn context(&self) -> &Context;

    /// Event that carries a packet towards this side
    fn packet_event(&self) -> EventKind;

    /// Reset the buffer pool this side owns
    fn reset(&self);

    /// Fill and publish a buffer with `segments` and build the message
    /// referencing it
    fn prepare_send(&self, channel_index: u8, segments: &[&[u8]]) -> Result<WireMessage>;

    /// Take back the buffer of a prepared message that was never posted
    fn abandon(&self, msg: &WireMessage);

    /// Submit one packet.
    ///
    /// A message that cannot be posted gives its buffer back and reports
    /// `Backpressure`, whatever the mailbox failure was.
    fn on_send_request(&self, channel_index: u8, segments: &[&[u8]]) -> Result<()> {
        let msg = self.prepare_send(channel_index, segments)?;
        if let Err(err) = self.context().post(msg) {
            log::warn!("dropping packet for interface {}: {}", channel_index, err);
            self.abandon(&msg);
            self.context().stats.record_tx_backpressure();
            return Err(Error::Backpressure);
        }
        Ok(())
    }

    /// A packet arrived from the peer
    fn on_receive_event(&self, msg: &WireMessage);

    /// The peer returned a buffer
    fn on_release_event(&self, msg: &WireMessage);

    /// Anything that is neither a packet nor a release
    fn on_control_event(&self, msg: &WireMessage) {
        log::warn!(
            "ignoring unexpected {:?} on interface {}",
            msg.event(),
            msg.channel_index()
        );
    }

    /// Decide in interrupt context whether `msg` needs the dispatch task
    fn screen(&self, _msg: &WireMessage) -> Admission {
        Admission::Enqueue
    }

    /// The receive queue had no room for `msg`. Runs in interrupt context;
    /// whatever buffer `msg` references must still go back to its owner.
    fn on_dropped(&self, _msg: &WireMessage) {}

    /// Called after every dispatch pass
    fn idle(&self) {}

    /// Occupancy of this side's pool
    fn buffer_usage(&self) -> BufferUsage;
}

/// Route a dequeued message to its handler
pub fn dispatch(adapter: &dyn SideAdapter, msg: WireMessage) {
    match msg.event() {
        event if event == adapter.packet_event() => adapter.on_receive_event(&msg),
        EventKind::BufferReleased => adapter.on_release_event(&msg),
        _ => adapter.on_control_event(&msg),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use spin::Mutex;

    /// Stack stub recording everything handed to it
    #[derive(Default)]
    pub(crate) struct RecordingUpstream {
        pub(crate) delivered: Mutex<Vec<(u8, Vec<u8>)>>,
        pub(crate) ready: Mutex<Vec<u8>>,
        pub(crate) out_of_memory: core::sync::atomic::AtomicBool,
    }

    impl Upstream for RecordingUpstream {
        fn alloc_packet(&self, len: usize) -> Option<Vec<u8>> {
            if self.out_of_memory.load(core::sync::atomic::Ordering::Relaxed) {
                None
            } else {
                Some(Vec::with_capacity(len))
            }
        }

        fn deliver_incoming(&self, channel_index: u8, packet: Vec<u8>) {
            self.delivered.lock().push((channel_index, packet));
        }

        fn transmit_ready(&self, channel_index: u8) {
            self.ready.lock().push(channel_index);
        }
    }

    struct Nothing;

    impl Upstream for Nothing {
        fn deliver_incoming(&self, _channel_index: u8, _packet: Vec<u8>) {}
    }

    #[test]
    fn default_alloc_reserves_capacity() {
        let packet = Nothing.alloc_packet(1536).unwrap();
        assert!(packet.capacity() >= 1536);
        assert!(packet.is_empty());
    }
}
