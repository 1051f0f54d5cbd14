#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use offload_ipc::{LoopbackPair, TransportConfig, Upstream};
use parking_lot::Mutex;

/// Network stack stand-in recording deliveries and capacity callbacks
#[derive(Default)]
pub struct Recorder {
    pub delivered: Mutex<Vec<(u8, Vec<u8>)>>,
    pub ready: Mutex<Vec<u8>>,
    pub out_of_memory: AtomicBool,
}

impl Recorder {
    pub fn packets(&self) -> Vec<(u8, Vec<u8>)> {
        self.delivered.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn set_out_of_memory(&self, oom: bool) {
        self.out_of_memory.store(oom, Ordering::Relaxed);
    }
}

impl Upstream for Recorder {
    fn alloc_packet(&self, len: usize) -> Option<Vec<u8>> {
        if self.out_of_memory.load(Ordering::Relaxed) {
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

pub struct Harness {
    pub pair: LoopbackPair,
    pub host_stack: Arc<Recorder>,
    pub device_stack: Arc<Recorder>,
}

/// Initialized loopback pair with interface 1 up on both sides
pub fn harness(config: TransportConfig) -> Harness {
    let host_stack = Arc::new(Recorder::default());
    let device_stack = Arc::new(Recorder::default());
    let pair = LoopbackPair::new(config, host_stack.clone(), device_stack.clone()).unwrap();
    pair.init().unwrap();
    pair.set_interface_active(1, true);
    Harness {
        pair,
        host_stack,
        device_stack,
    }
}

/// Payload whose bytes encode its sequence number and length
pub fn pattern(seq: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| (seq * 31 + i * 7) as u8).collect()
}
