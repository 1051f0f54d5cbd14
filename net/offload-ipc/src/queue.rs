//! Bounded message queue
//!
//! Fixed pool of nodes linked into a free list and a FIFO list. The
//! interrupt handler moves one node from free to FIFO per incoming message;
//! the receive-dispatch task moves nodes back and runs the handler with the
//! lock released. Nothing allocates after construction.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use soc_hal::critical_section::IrqMutex;

use crate::error::{Error, Result};
use crate::sync::WakeSignal;
use crate::wire::{FlowStatus, WireMessage};

/// Pool entry
#[derive(Debug, Clone, Copy)]
struct QueueNode {
    msg: WireMessage,
    in_use: bool,
    next: Option<usize>,
}

#[derive(Debug)]
struct QueueState {
    nodes: Box<[QueueNode]>,
    free_head: Option<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    free_count: usize,
    in_use_count: usize,
}

impl QueueState {
    fn new(depth: usize) -> Self {
        let nodes: Vec<QueueNode> = (0..depth)
            .map(|i| QueueNode {
                msg: WireMessage::acknowledged(FlowStatus::Ok),
                in_use: false,
                next: if i + 1 < depth { Some(i + 1) } else { None },
            })
            .collect();
        Self {
            nodes: nodes.into_boxed_slice(),
            free_head: if depth > 0 { Some(0) } else { None },
            head: None,
            tail: None,
            free_count: depth,
            in_use_count: 0,
        }
    }

    fn push(&mut self, msg: WireMessage) -> Result<()> {
        let index = self.free_head.ok_or(Error::Backpressure)?;
        let node = &mut self.nodes[index];
        self.free_head = node.next;
        node.msg = msg;
        node.in_use = true;
        node.next = None;

        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.free_count -= 1;
        self.in_use_count += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<WireMessage> {
        let index = self.head?;
        let node = &mut self.nodes[index];
        let msg = node.msg;
        self.head = node.next;
        if self.head.is_none() {
            self.tail = None;
        }
        node.in_use = false;
        node.next = self.free_head;
        self.free_head = Some(index);
        self.free_count += 1;
        self.in_use_count -= 1;
        Some(msg)
    }
}

/// Fixed-depth FIFO between interrupt and task context
pub struct MessageQueue {
    state: IrqMutex<QueueState>,
    depth: usize,
    warning: usize,
    ready: Arc<dyn WakeSignal>,
}

impl MessageQueue {
    /// Create a queue of `depth` nodes reporting `QueueLow` once no more than
    /// `warning` nodes are free
    pub fn new(depth: usize, warning: usize, ready: Arc<dyn WakeSignal>) -> Self {
        Self {
            state: IrqMutex::new(QueueState::new(depth)),
            depth,
            warning,
            ready,
        }
    }

    /// Copy `msg` into a free node and wake the dispatcher.
    ///
    /// Interrupt safe. Fails with `Backpressure` when every node is in use;
    /// the message is not stored.
    pub fn enqueue(&self, msg: WireMessage) -> Result<()> {
        self.state.lock(|state| state.push(msg))?;
        self.ready.notify();
        Ok(())
    }

    /// Take the oldest message, if any
    pub fn pop(&self) -> Option<WireMessage> {
        self.state.lock(|state| state.pop())
    }

    /// Dispatch every queued message in FIFO order.
    ///
    /// The lock is held only to unlink each node; `handler` runs with it
    /// released, so it may enqueue or send. Returns the number dispatched.
    pub fn dequeue_all(&self, mut handler: impl FnMut(WireMessage)) -> usize {
        let mut dispatched = 0;
        while let Some(msg) = self.pop() {
            handler(msg);
            dispatched += 1;
        }
        dispatched
    }

    /// Drop every queued message; returns how many were discarded
    pub fn clear(&self) -> usize {
        self.state.lock(|state| {
            let mut dropped = 0;
            while state.pop().is_some() {
                dropped += 1;
            }
            dropped
        })
    }

    /// Block until a message may be available
    pub fn wait(&self) {
        self.ready.wait();
    }

    /// Wake the dispatcher without queuing anything
    pub fn wake(&self) {
        self.ready.notify();
    }

    /// Free nodes
    pub fn free_count(&self) -> usize {
        self.state.lock(|state| state.free_count)
    }

    /// Queued nodes
    pub fn in_use_count(&self) -> usize {
        self.state.lock(|state| state.in_use_count)
    }

    /// Total nodes
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Low-water mark
    pub fn warning(&self) -> usize {
        self.warning
    }

    /// Whether the free count is at or below the low-water mark
    pub fn is_low(&self) -> bool {
        self.free_count() <= self.warning
    }

    /// Status to piggyback on the next acknowledgement
    pub fn flow_status(&self) -> FlowStatus {
        if self.is_low() {
            FlowStatus::QueueLow
        } else {
            FlowStatus::Ok
        }
    }

    #[cfg(test)]
    fn check_invariant(&self) {
        self.state.lock(|state| {
            assert_eq!(state.free_count + state.in_use_count, self.depth);
            let flagged = state.nodes.iter().filter(|n| n.in_use).count();
            assert_eq!(flagged, state.in_use_count);
        });
    }
}

impl core::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("depth", &self.depth)
            .field("warning", &self.warning)
            .field("free", &self.free_count())
            .finish()
    }
}
