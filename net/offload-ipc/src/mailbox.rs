//! Single-slot mailbox
//!
//! One [`SlotCell`] per direction. The sender owns the slot between
//! observing `Acknowledged` and ringing the doorbell; the receiver owns it
//! from the doorbell until it writes `Acknowledged` back. At most one
//! unacknowledged message exists per direction.
//!
//! ```text
//!   sender                       slot                      receiver
//!   ──────                       ────                      ────────
//!   wait for Acknowledged ◄──── Acknowledged
//!   write + publish ──────────► MessagePosted
//!   ring doorbell ─────────────────────────────────────► on_interrupt
//!                                                          acquire + copy
//!                                                          enqueue
//!                               Acknowledged(flow) ◄────── write + publish
//! ```

use alloc::sync::Arc;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use soc_hal::{DelayUs, Doorbell};

use crate::cache::{CacheBridge, Published, Region};
use crate::config::{AckTimeoutPolicy, TransportConfig};
use crate::error::{Error, Result};
use crate::layout::SharedWindow;
use crate::queue::MessageQueue;
use crate::stats::ChannelStats;
use crate::wire::{EventKind, FlowStatus, SlotCell, WireMessage, WIRE_MESSAGE_SIZE};

impl Region for &SlotCell {
    fn addr(&self) -> usize {
        *self as *const SlotCell as usize
    }

    fn len(&self) -> usize {
        WIRE_MESSAGE_SIZE
    }
}

/// Observable slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free for the next message
    Acknowledged,
    /// Holds a message the receiver has not acknowledged
    Posted,
}

/// What the interrupt handler does with an incoming message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Queue it for the receive-dispatch task
    Enqueue,
    /// Already dealt with in interrupt context; acknowledge only
    Handled,
}

/// Bounded wait, counted in polls
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    remaining: u32,
    interval_us: u32,
}

impl Deadline {
    /// Allow `polls` retries spaced `interval_us` apart
    pub const fn new(polls: u32, interval_us: u32) -> Self {
        Self {
            remaining: polls,
            interval_us,
        }
    }

    /// Poll `probe` until it yields a value or the deadline expires
    pub fn wait_for<T>(
        &mut self,
        delay: &dyn DelayUs,
        mut probe: impl FnMut() -> Option<T>,
    ) -> Result<T> {
        loop {
            if let Some(value) = probe() {
                return Ok(value);
            }
            if self.remaining == 0 {
                return Err(Error::Timeout);
            }
            self.remaining -= 1;
            delay.delay_us(self.interval_us);
        }
    }

    /// Polls left
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

/// One direction's slot in the shared window
pub(crate) struct MailboxSlot {
    cell: NonNull<SlotCell>,
    _window: SharedWindow,
}

// The cell is only touched through atomics; the window keeps it mapped.
unsafe impl Send for MailboxSlot {}
unsafe impl Sync for MailboxSlot {}

impl MailboxSlot {
    /// # Safety
    ///
    /// `cell` must point at a line-aligned slot inside `window`.
    pub(crate) unsafe fn new(cell: NonNull<SlotCell>, window: SharedWindow) -> Self {
        Self {
            cell,
            _window: window,
        }
    }

    fn cell(&self) -> &SlotCell {
        unsafe { self.cell.as_ref() }
    }

    fn read(&self, bridge: &CacheBridge) -> Result<WireMessage> {
        bridge.acquire(self.cell()).load()
    }

    fn write(&self, bridge: &CacheBridge, msg: &WireMessage) -> Published<&SlotCell> {
        let cell = self.cell();
        cell.store(msg);
        bridge.publish(cell)
    }
}

/// Sending half of a direction
pub struct MailboxTx {
    slot: MailboxSlot,
    bridge: CacheBridge,
    doorbell: Arc<dyn Doorbell>,
    delay: Arc<dyn DelayUs>,
    lock: spin::Mutex<()>,
    config: TransportConfig,
    peer_flow: AtomicU32,
    stats: Arc<ChannelStats>,
}

impl MailboxTx {
    pub(crate) fn new(
        slot: MailboxSlot,
        bridge: CacheBridge,
        doorbell: Arc<dyn Doorbell>,
        delay: Arc<dyn DelayUs>,
        config: TransportConfig,
        stats: Arc<ChannelStats>,
    ) -> Self {
        Self {
            slot,
            bridge,
            doorbell,
            delay,
            lock: spin::Mutex::new(()),
            config,
            peer_flow: AtomicU32::new(FlowStatus::Ok as u32),
            stats,
        }
    }

    /// Mark the outbound slot free so the first send does not wait
    pub fn init(&self) {
        let _guard = self.lock.lock();
        let _free = self
            .slot
            .write(&self.bridge, &WireMessage::acknowledged(FlowStatus::Ok));
        self.peer_flow.store(FlowStatus::Ok as u32, Ordering::Relaxed);
    }

    /// Post `msg` once the previous message has been acknowledged.
    ///
    /// Serializes local senders, waits at most `ack_poll_limit` polls, and
    /// honours a `QueueLow` acknowledgement with a back-off before posting.
    /// On timeout the configured [`AckTimeoutPolicy`] applies.
    pub fn send(&self, msg: WireMessage) -> Result<()> {
        let _guard = self.lock.lock();

        let mut deadline = Deadline::new(self.config.ack_poll_limit, self.config.ack_poll_interval_us);
        let ack = deadline.wait_for(&*self.delay, || match self.slot.read(&self.bridge) {
            Ok(current) if current.event() == EventKind::Acknowledged => Some(current),
            _ => None,
        });

        match ack {
            Ok(ack) => {
                let flow = ack.flow_status();
                self.peer_flow.store(flow as u32, Ordering::Relaxed);
                if flow == FlowStatus::QueueLow {
                    log::trace!("peer queue low, backing off {}us", self.config.queue_low_backoff_us);
                    self.stats.record_queue_low_backoff();
                    self.delay.delay_us(self.config.queue_low_backoff_us);
                }
            }
            Err(err) => {
                self.stats.record_ack_timeout();
                match self.config.ack_timeout_policy {
                    AckTimeoutPolicy::Reject => {
                        log::error!(
                            "mailbox ack timeout after {} polls, {:?} not posted",
                            self.config.ack_poll_limit,
                            msg.event()
                        );
                        return Err(err);
                    }
                    AckTimeoutPolicy::ForcePost => {
                        log::warn!(
                            "mailbox ack timeout after {} polls, overwriting unacknowledged slot",
                            self.config.ack_poll_limit
                        );
                        self.stats.record_forced_post();
                    }
                }
            }
        }

        let posted = self.slot.write(&self.bridge, &msg);
        self.ring(posted);
        self.stats.record_sent();
        log::trace!(
            "posted {:?} ch={} ref={}",
            msg.event(),
            msg.channel_index(),
            msg.buffer_ref()
        );
        Ok(())
    }

    // Only a published slot may be signalled.
    fn ring(&self, _posted: Published<&SlotCell>) {
        self.doorbell.ring();
    }

    /// Current slot state as seen from this core
    pub fn state(&self) -> SlotState {
        match self.slot.read(&self.bridge) {
            Ok(msg) if msg.event() == EventKind::Acknowledged => SlotState::Acknowledged,
            _ => SlotState::Posted,
        }
    }

    /// Flow status of the acknowledgement currently in the slot, if the
    /// last message has been acknowledged
    pub fn observe_ack(&self) -> Option<FlowStatus> {
        match self.slot.read(&self.bridge) {
            Ok(msg) if msg.event() == EventKind::Acknowledged => Some(msg.flow_status()),
            _ => None,
        }
    }

    /// Flow status carried by the last acknowledgement a send waited for
    pub fn peer_flow(&self) -> FlowStatus {
        FlowStatus::from(self.peer_flow.load(Ordering::Relaxed))
    }
}

/// Receiving half of a direction
pub struct MailboxRx {
    slot: MailboxSlot,
    bridge: CacheBridge,
    doorbell: Arc<dyn Doorbell>,
    stats: Arc<ChannelStats>,
}

impl MailboxRx {
    pub(crate) fn new(
        slot: MailboxSlot,
        bridge: CacheBridge,
        doorbell: Arc<dyn Doorbell>,
        stats: Arc<ChannelStats>,
    ) -> Self {
        Self {
            slot,
            bridge,
            doorbell,
            stats,
        }
    }

    /// Read the inbound slot
    pub fn receive(&self) -> Result<WireMessage> {
        self.slot.read(&self.bridge)
    }

    /// Free the inbound slot, reporting `flow` to the sender
    pub fn acknowledge(&self, flow: FlowStatus) {
        if flow == FlowStatus::QueueLow {
            self.stats.record_queue_low_ack();
        }
        let _ack = self
            .slot
            .write(&self.bridge, &WireMessage::acknowledged(flow));
    }

    /// Doorbell interrupt entry point.
    ///
    /// Copies the posted message out, lets `screen` consume it in interrupt
    /// context or queues it, and acknowledges with the queue's flow status.
    /// Never blocks: a full queue drops the message and hands it to
    /// `dropped` so the buffer it references can be given back. The sender
    /// is released either way. Returns the message that was taken, if any.
    pub fn on_interrupt(
        &self,
        queue: &MessageQueue,
        screen: impl FnOnce(&WireMessage) -> Admission,
        dropped: impl FnOnce(&WireMessage),
    ) -> Option<WireMessage> {
        soc_hal::critical_section::with(|_cs| {
            self.doorbell.clear();

            let msg = match self.receive() {
                Ok(msg) if msg.event() == EventKind::Acknowledged => {
                    log::trace!("spurious doorbell, slot already acknowledged");
                    return None;
                }
                Ok(msg) => msg,
                Err(err) => {
                    log::error!("discarding malformed mailbox message: {}", err);
                    self.acknowledge(queue.flow_status());
                    return None;
                }
            };
            self.stats.record_received();

            if screen(&msg) == Admission::Enqueue {
                if let Err(err) = queue.enqueue(msg) {
                    log::warn!(
                        "message queue exhausted, dropping {:?} ch={}: {}",
                        msg.event(),
                        msg.channel_index(),
                        err
                    );
                    self.stats.record_queue_drop();
                    dropped(&msg);
                }
            }

            self.acknowledge(queue.flow_status());
            Some(msg)
        })
    }
}
