//! Transport configuration

use crate::error::{Error, Result};

/// Default Bounded Message Queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 20;
/// Default free-node count at or below which acks carry `QueueLow`
pub const DEFAULT_QUEUE_WARNING: usize = 4;
/// Default number of round-robin send slots
pub const DEFAULT_SEND_POOL_DEPTH: usize = 16;
/// Default number of receive buffers owned by the offload side
pub const DEFAULT_RECEIVE_POOL_DEPTH: usize = 16;
/// Default payload capacity per buffer (Ethernet MTU plus link headers)
pub const DEFAULT_BUFFER_SIZE: usize = 1536;
/// Default number of acknowledgement polls before a send gives up
pub const DEFAULT_ACK_POLL_LIMIT: u32 = 100_000;
/// Default delay between acknowledgement polls
pub const DEFAULT_ACK_POLL_INTERVAL_US: u32 = 2;
/// Default delay inserted after the peer reported `QueueLow`
pub const DEFAULT_QUEUE_LOW_BACKOFF_US: u32 = 1_000;
/// Default depth of the deferred send queue
pub const DEFAULT_SEND_DISPATCH_DEPTH: usize = 16;

/// What `send` does when the previous message is never acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckTimeoutPolicy {
    /// Leave the slot untouched and fail with `Error::Timeout`
    Reject,
    /// Log, overwrite the unacknowledged slot and report success
    ForcePost,
}

/// Transport configuration
///
/// Both cores must be built with the same configuration: the shared-memory
/// layout is derived from it.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Queue node pool depth
    pub queue_depth: usize,
    /// Low-water mark for the queue's free node count
    pub queue_warning: usize,
    /// Send slots in the application core's pool
    pub send_pool_depth: usize,
    /// Receive buffers in the offload core's pool
    pub receive_pool_depth: usize,
    /// Payload bytes per buffer
    pub buffer_size: usize,
    /// Acknowledgement polls before a send times out
    pub ack_poll_limit: u32,
    /// Delay between acknowledgement polls
    pub ack_poll_interval_us: u32,
    /// Delay applied before sending after a `QueueLow` acknowledgement
    pub queue_low_backoff_us: u32,
    /// Behaviour on acknowledgement timeout
    pub ack_timeout_policy: AckTimeoutPolicy,
    /// Deferred send queue depth
    pub send_dispatch_depth: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            queue_warning: DEFAULT_QUEUE_WARNING,
            send_pool_depth: DEFAULT_SEND_POOL_DEPTH,
            receive_pool_depth: DEFAULT_RECEIVE_POOL_DEPTH,
            buffer_size: DEFAULT_BUFFER_SIZE,
            ack_poll_limit: DEFAULT_ACK_POLL_LIMIT,
            ack_poll_interval_us: DEFAULT_ACK_POLL_INTERVAL_US,
            queue_low_backoff_us: DEFAULT_QUEUE_LOW_BACKOFF_US,
            ack_timeout_policy: AckTimeoutPolicy::Reject,
            send_dispatch_depth: DEFAULT_SEND_DISPATCH_DEPTH,
        }
    }
}

impl TransportConfig {
    /// Check the configuration for values the transport cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(Error::InvalidConfig("queue_depth must be non-zero"));
        }
        if self.queue_depth > u16::MAX as usize {
            return Err(Error::InvalidConfig("queue_depth exceeds u16::MAX"));
        }
        if self.queue_warning >= self.queue_depth {
            return Err(Error::InvalidConfig("queue_warning must be below queue_depth"));
        }
        if self.send_pool_depth == 0 {
            return Err(Error::InvalidConfig("send_pool_depth must be non-zero"));
        }
        if self.receive_pool_depth == 0 {
            return Err(Error::InvalidConfig("receive_pool_depth must be non-zero"));
        }
        if self.buffer_size == 0 {
            return Err(Error::InvalidConfig("buffer_size must be non-zero"));
        }
        if self.buffer_size > u32::MAX as usize {
            return Err(Error::InvalidConfig("buffer_size exceeds u32::MAX"));
        }
        if self.ack_poll_limit == 0 {
            return Err(Error::InvalidConfig("ack_poll_limit must be non-zero"));
        }
        if self.send_dispatch_depth == 0 {
            return Err(Error::InvalidConfig("send_dispatch_depth must be non-zero"));
        }
        Ok(())
    }
}
