//! Both sides of a transport in one address space
//!
//! Host and device channels share a heap window. Each side's doorbell runs
//! the peer's interrupt entry point synchronously on the ringing thread, the
//! way a real doorbell preempts the peer core. A doorbell can be muted to
//! model a peer that stops servicing interrupts.

use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, Ordering};

use soc_hal::{Architecture, Coherent, Doorbell, SpinDelay};

use crate::adapter::Upstream;
use crate::channel::{Channel, Platform};
use crate::config::TransportConfig;
use crate::error::Result;
use crate::layout::HeapWindow;

// Lay out for the offload core's line size even though the heap is coherent.
const LINE_SIZE: usize = Architecture::ARMv7M.cache_line_size();

/// Software doorbell calling straight into the peer channel
pub struct LoopbackDoorbell {
    peer: spin::Once<Weak<Channel>>,
    muted: AtomicBool,
}

impl LoopbackDoorbell {
    fn new() -> Self {
        Self {
            peer: spin::Once::new(),
            muted: AtomicBool::new(false),
        }
    }

    fn connect(&self, peer: &Arc<Channel>) {
        self.peer.call_once(|| Arc::downgrade(peer));
    }

    /// Drop rings instead of delivering them
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }
}

impl Doorbell for LoopbackDoorbell {
    fn ring(&self) {
        if self.muted.load(Ordering::Acquire) {
            return;
        }
        if let Some(peer) = self.peer.get().and_then(Weak::upgrade) {
            peer.on_doorbell();
        }
    }
}

/// Host and device channel wired back to back
pub struct LoopbackPair {
    pub host: Arc<Channel>,
    pub device: Arc<Channel>,
    host_doorbell: Arc<LoopbackDoorbell>,
    device_doorbell: Arc<LoopbackDoorbell>,
}

impl LoopbackPair {
    /// Build both channels over a fresh window; neither is initialized yet
    pub fn new(
        config: TransportConfig,
        host_upstream: Arc<dyn Upstream>,
        device_upstream: Arc<dyn Upstream>,
    ) -> Result<Self> {
        let window = HeapWindow::for_config(&config, LINE_SIZE)?;
        let host_doorbell = Arc::new(LoopbackDoorbell::new());
        let device_doorbell = Arc::new(LoopbackDoorbell::new());

        let platform = |doorbell: &Arc<LoopbackDoorbell>| Platform {
            cache: Arc::new(Coherent::new(LINE_SIZE)),
            doorbell: doorbell.clone(),
            delay: Arc::new(SpinDelay::new(1)),
        };

        let host = Arc::new(Channel::host(
            0,
            window.clone(),
            config,
            platform(&host_doorbell),
            host_upstream,
        )?);
        let device = Arc::new(Channel::device(
            0,
            window,
            config,
            platform(&device_doorbell),
            device_upstream,
        )?);

        host_doorbell.connect(&device);
        device_doorbell.connect(&host);

        Ok(Self {
            host,
            device,
            host_doorbell,
            device_doorbell,
        })
    }

    /// Initialize both sides
    pub fn init(&self) -> Result<()> {
        self.host.init()?;
        self.device.init()
    }

    /// Bring interface `index` up or down on both sides
    pub fn set_interface_active(&self, index: u8, active: bool) {
        self.host.set_interface_active(index, active);
        self.device.set_interface_active(index, active);
    }

    /// Host rings stop reaching the device
    pub fn mute_host_doorbell(&self, muted: bool) {
        self.host_doorbell.set_muted(muted);
    }

    /// Device rings stop reaching the host
    pub fn mute_device_doorbell(&self, muted: bool) {
        self.device_doorbell.set_muted(muted);
    }
}
