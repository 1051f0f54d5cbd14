//! Channels and the channel manager
//!
//! A [`Channel`] is one side of one transport instance: the two mailbox
//! directions, the receive queue, the deferred send queue and the side
//! adapter, laid out over one shared window. Nothing is global; the
//! [`ChannelManager`] only keeps a registry of channels by id.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use soc_hal::{CacheMaintenance, DelayUs, Doorbell};

use crate::adapter::{dispatch, BufferUsage, Context, DeviceAdapter, HostAdapter, SideAdapter, Upstream};
use crate::buffer::{PeerReceivePool, PeerSendPool, ReceivePool, SendPool};
use crate::cache::CacheBridge;
use crate::config::TransportConfig;
use crate::dispatch::SendDispatcher;
use crate::error::{Error, Result};
use crate::layout::{SharedWindow, ShmLayout};
use crate::mailbox::{MailboxRx, MailboxSlot, MailboxTx};
use crate::queue::MessageQueue;
use crate::stats::ChannelStats;
use crate::status::ChannelFlags;
use crate::sync::new_signal;
use crate::wire::{EventKind, WireMessage};

/// Which core this channel runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Application core: owns the send slots
    Host,
    /// Network-offload core: owns the receive buffers
    Device,
}

/// Hardware services supplied by platform initialization
#[derive(Clone)]
pub struct Platform {
    pub cache: Arc<dyn CacheMaintenance>,
    pub doorbell: Arc<dyn Doorbell>,
    pub delay: Arc<dyn DelayUs>,
}

/// One side of a transport instance
pub struct Channel {
    id: u8,
    role: Role,
    config: TransportConfig,
    layout: ShmLayout,
    adapter: Box<dyn SideAdapter>,
    rx: MailboxRx,
    queue: MessageQueue,
}

impl Channel {
    /// Application core side over `window`
    pub fn host(
        id: u8,
        window: SharedWindow,
        config: TransportConfig,
        platform: Platform,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self> {
        Self::build(id, Role::Host, window, config, platform, upstream)
    }

    /// Network-offload core side over `window`
    pub fn device(
        id: u8,
        window: SharedWindow,
        config: TransportConfig,
        platform: Platform,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self> {
        Self::build(id, Role::Device, window, config, platform, upstream)
    }

    fn build(
        id: u8,
        role: Role,
        window: SharedWindow,
        config: TransportConfig,
        platform: Platform,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self> {
        let layout = ShmLayout::new(&window, &config, platform.cache.line_size())?;
        let bridge = CacheBridge::new(platform.cache);
        let stats = Arc::new(ChannelStats::default());

        let (outbound, inbound) = match role {
            Role::Host => (layout.host_to_device_slot(), layout.device_to_host_slot()),
            Role::Device => (layout.device_to_host_slot(), layout.host_to_device_slot()),
        };
        // Both slots come from a layout validated against this window.
        let (outbound, inbound) = unsafe {
            (
                MailboxSlot::new(outbound, window.clone()),
                MailboxSlot::new(inbound, window.clone()),
            )
        };

        let tx = MailboxTx::new(
            outbound,
            bridge.clone(),
            platform.doorbell.clone(),
            platform.delay,
            config,
            stats.clone(),
        );
        let rx = MailboxRx::new(inbound, bridge.clone(), platform.doorbell, stats.clone());
        let deferred = SendDispatcher::new(config.send_dispatch_depth, new_signal());
        let ctx = Context::new(tx, stats, upstream, deferred);

        let adapter: Box<dyn SideAdapter> = match role {
            Role::Host => Box::new(HostAdapter::new(
                ctx,
                SendPool::new(layout.send_pool(), bridge.clone(), window.clone()),
                PeerReceivePool::new(layout.receive_pool(), bridge.clone(), window),
                bridge,
            )),
            Role::Device => Box::new(DeviceAdapter::new(
                ctx,
                ReceivePool::new(layout.receive_pool(), window.clone()),
                PeerSendPool::new(layout.send_pool(), bridge.clone(), window),
                bridge,
            )),
        };

        Ok(Self {
            id,
            role,
            config,
            layout,
            adapter,
            rx,
            queue: MessageQueue::new(config.queue_depth, config.queue_warning, new_signal()),
        })
    }

    fn ctx(&self) -> &Context {
        self.adapter.context()
    }

    fn dispatcher(&self) -> &SendDispatcher {
        &self.ctx().deferred
    }

    fn ensure_up(&self) -> Result<()> {
        if self.ctx().status.contains(ChannelFlags::UP) {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Reset this side's pool and outbound slot and start accepting traffic
    pub fn init(&self) -> Result<()> {
        if self.ctx().status.contains(ChannelFlags::UP) {
            return Err(Error::AlreadyInitialized);
        }
        self.adapter.reset();
        self.queue.clear();
        self.dispatcher().drain(|_| {});
        self.ctx().tx.init();
        self.ctx().status.remove(ChannelFlags::all());
        self.ctx().status.insert(ChannelFlags::UP);
        log::debug!("channel {} ({:?}) up", self.id, self.role);
        Ok(())
    }

    /// Stop accepting traffic. Queued messages are dropped and parked
    /// sends give their buffers back.
    pub fn shutdown(&self) {
        let prev = self.ctx().status.remove(ChannelFlags::UP);
        if !prev.contains(ChannelFlags::UP) {
            return;
        }
        let dropped = self.queue.clear();
        let abandoned = self.dispatcher().drain(|msg| self.adapter.abandon(&msg));
        self.queue.wake();
        self.dispatcher().wake();
        log::debug!(
            "channel {} ({:?}) down, {} queued and {} parked messages dropped",
            self.id,
            self.role,
            dropped,
            abandoned
        );
    }

    /// Doorbell interrupt entry point
    pub fn on_doorbell(&self) -> Option<WireMessage> {
        if !self.ctx().status.contains(ChannelFlags::UP) {
            log::trace!("channel {} not up, ignoring doorbell", self.id);
            return None;
        }
        self.rx.on_interrupt(
            &self.queue,
            |msg| self.adapter.screen(msg),
            |msg| self.adapter.on_dropped(msg),
        )
    }

    /// Hand one packet, given as consecutive segments, to the peer.
    ///
    /// Spins on the mailbox; only `Backpressure` (or a rejected payload)
    /// comes back to the caller.
    pub fn submit_outgoing(&self, channel_index: u8, segments: &[&[u8]]) -> Result<()> {
        self.ensure_up()?;
        self.adapter.on_send_request(channel_index, segments)
    }

    /// Like [`Channel::submit_outgoing`], but leave the mailbox to the
    /// send-dispatch task. Never spins.
    pub fn defer_outgoing(&self, channel_index: u8, segments: &[&[u8]]) -> Result<()> {
        self.ensure_up()?;
        let msg = self.adapter.prepare_send(channel_index, segments)?;
        if let Err(err) = self.dispatcher().defer(msg) {
            log::warn!("send dispatch queue full, dropping packet for interface {}", channel_index);
            self.adapter.abandon(&msg);
            self.ctx().stats.record_tx_backpressure();
            return Err(err);
        }
        Ok(())
    }

    /// Post a raw message, bypassing the buffer pools
    pub fn send_message(&self, msg: WireMessage) -> Result<()> {
        self.ensure_up()?;
        self.ctx().post(msg)
    }

    /// Dispatch everything queued by the interrupt handler
    pub fn run_dispatch(&self) -> usize {
        let dispatched = self.queue.dequeue_all(|msg| dispatch(&*self.adapter, msg));
        self.adapter.idle();
        dispatched
    }

    /// Post everything parked by [`Channel::defer_outgoing`] or by the
    /// interrupt handler
    pub fn run_send_dispatch(&self) -> usize {
        let posted = self.dispatcher().drain(|msg| match self.ctx().post(msg) {
            Ok(()) if msg.event() == EventKind::BufferReleased => self.ctx().stats.record_release_sent(),
            Ok(()) => {}
            Err(err) => {
                log::warn!(
                    "dropping deferred {:?} for interface {}: {}",
                    msg.event(),
                    msg.channel_index(),
                    err
                );
                self.adapter.abandon(&msg);
                if msg.event() != EventKind::BufferReleased {
                    self.ctx().stats.record_tx_backpressure();
                }
            }
        });
        self.adapter.idle();
        posted
    }

    /// Block until the interrupt handler queued something
    pub fn wait_for_work(&self) {
        self.queue.wait();
    }

    /// Block until something was deferred
    pub fn wait_for_send_work(&self) {
        self.dispatcher().wait();
    }

    /// Wake both dispatch tasks
    pub fn wake_workers(&self) {
        self.queue.wake();
        self.dispatcher().wake();
    }

    /// Invoke `transmit_ready` for stalled interfaces if capacity is back
    pub fn poll_transmit_capacity(&self) {
        self.adapter.idle();
    }

    /// Bring logical interface `index` up or down
    pub fn set_interface_active(&self, index: u8, active: bool) {
        log::debug!(
            "channel {} interface {} {}",
            self.id,
            index,
            if active { "up" } else { "down" }
        );
        self.ctx().interfaces.set_active(index, active);
    }

    /// Whether logical interface `index` is up
    pub fn is_interface_active(&self, index: u8) -> bool {
        self.ctx().interfaces.is_active(index)
    }

    /// Channel id
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Which core this side runs on
    pub fn role(&self) -> Role {
        self.role
    }

    /// Configuration the channel was built with
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Placement of the slots and pools in the shared window
    pub fn layout(&self) -> &ShmLayout {
        &self.layout
    }

    /// Current status flags
    pub fn flags(&self) -> ChannelFlags {
        self.ctx().status.get()
    }

    /// Traffic and failure counters
    pub fn stats(&self) -> &ChannelStats {
        &self.ctx().stats
    }

    /// Inbound message queue
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Outbound mailbox
    pub fn mailbox(&self) -> &MailboxTx {
        &self.ctx().tx
    }

    /// Buffers of this side's pool the peer still holds
    pub fn buffer_usage(&self) -> BufferUsage {
        self.adapter.buffer_usage()
    }
}

impl core::fmt::Debug for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("flags", &self.flags())
            .field("queue", &self.queue)
            .finish()
    }
}

/// Registry of channels by id
#[derive(Default)]
pub struct ChannelManager {
    channels: spin::Mutex<BTreeMap<u8, Arc<Channel>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `channel`
    pub fn register(&self, channel: Channel) -> Result<Arc<Channel>> {
        let mut channels = self.channels.lock();
        if channels.contains_key(&channel.id()) {
            return Err(Error::AlreadyInitialized);
        }
        let channel = Arc::new(channel);
        channels.insert(channel.id(), channel.clone());
        Ok(channel)
    }

    /// Channel `id`, if registered
    pub fn get(&self, id: u8) -> Option<Arc<Channel>> {
        self.channels.lock().get(&id).cloned()
    }

    /// Shut down and forget channel `id`
    pub fn unregister(&self, id: u8) -> Option<Arc<Channel>> {
        let channel = self.channels.lock().remove(&id)?;
        channel.shutdown();
        Some(channel)
    }

    fn all(&self) -> Vec<Arc<Channel>> {
        self.channels.lock().values().cloned().collect()
    }

    /// Initialize every channel not yet up
    pub fn init_all(&self) -> Result<()> {
        for channel in self.all() {
            match channel.init() {
                Ok(()) | Err(Error::AlreadyInitialized) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Shut down channel `id` but keep it registered
    pub fn shutdown(&self, id: u8) -> Result<()> {
        self.get(id).ok_or(Error::NotInitialized)?.shutdown();
        Ok(())
    }

    pub fn shutdown_all(&self) {
        for channel in self.all() {
            channel.shutdown();
        }
    }

    /// Submit a packet on interface `channel_index` of channel `id`
    pub fn submit_outgoing(&self, id: u8, channel_index: u8, segments: &[&[u8]]) -> Result<()> {
        self.get(id)
            .ok_or(Error::NotInitialized)?
            .submit_outgoing(channel_index, segments)
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }
}
