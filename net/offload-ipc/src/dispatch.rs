//! Deferred send dispatch
//!
//! Producers that must not spin on the mailbox (interrupt handlers, the
//! offload core's radio receive path) prepare and publish a buffer, then
//! park the resulting message here. The send-dispatch task posts parked
//! messages in order.

use alloc::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::error::{Error, Result};
use crate::sync::WakeSignal;
use crate::wire::WireMessage;

/// Bounded lock-free queue of prepared messages
pub struct SendDispatcher {
    pending: ArrayQueue<WireMessage>,
    ready: Arc<dyn WakeSignal>,
}

impl SendDispatcher {
    pub fn new(depth: usize, ready: Arc<dyn WakeSignal>) -> Self {
        Self {
            pending: ArrayQueue::new(depth),
            ready,
        }
    }

    /// Park `msg` for the send-dispatch task. Interrupt safe.
    ///
    /// Fails with `Backpressure` when the queue is full; the caller still
    /// owns the buffer `msg` references.
    pub fn defer(&self, msg: WireMessage) -> Result<()> {
        self.pending.push(msg).map_err(|_| Error::Backpressure)?;
        self.ready.notify();
        Ok(())
    }

    /// Hand every parked message to `post` in FIFO order
    pub fn drain(&self, mut post: impl FnMut(WireMessage)) -> usize {
        let mut posted = 0;
        while let Some(msg) = self.pending.pop() {
            post(msg);
            posted += 1;
        }
        posted
    }

    /// Block until a message may be parked
    pub fn wait(&self) {
        self.ready.wait();
    }

    /// Wake the send-dispatch task without parking anything
    pub fn wake(&self) {
        self.ready.notify();
    }

    /// Parked messages
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
