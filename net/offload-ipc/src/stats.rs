//! Per-channel transport statistics
//!
//! Lock-free counters updated from interrupt and task context alike. The
//! counters are word-sized so they stay lock-free on 32-bit cores.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Transport counters for one channel
#[derive(Debug, Default)]
pub struct ChannelStats {
    // Mailbox
    messages_sent: AtomicUsize,
    messages_received: AtomicUsize,
    ack_timeouts: AtomicUsize,
    forced_posts: AtomicUsize,

    // Flow control
    queue_drops: AtomicUsize,
    queue_low_acks: AtomicUsize,
    queue_low_backoffs: AtomicUsize,
    tx_backpressure: AtomicUsize,

    // Packets and buffers
    packets_delivered: AtomicUsize,
    inactive_discards: AtomicUsize,
    releases_sent: AtomicUsize,
    release_failures: AtomicUsize,
    duplicate_releases: AtomicUsize,
    memory_shortages: AtomicUsize,
    native_alloc_failures: AtomicUsize,
}

/// Point-in-time copy of [`ChannelStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub ack_timeouts: u64,
    pub forced_posts: u64,
    pub queue_drops: u64,
    pub queue_low_acks: u64,
    pub queue_low_backoffs: u64,
    pub tx_backpressure: u64,
    pub packets_delivered: u64,
    pub inactive_discards: u64,
    pub releases_sent: u64,
    pub release_failures: u64,
    pub duplicate_releases: u64,
    pub memory_shortages: u64,
    pub native_alloc_failures: u64,
}

macro_rules! counters {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl ChannelStats {
            $(
                #[inline]
                pub(crate) fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Copy every counter
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed) as u64,)*
                }
            }

            /// Reset every counter to zero
            pub fn reset(&self) {
                $(self.$field.store(0, Ordering::Relaxed);)*
            }
        }
    };
}

counters! {
    record_sent => messages_sent,
    record_received => messages_received,
    record_ack_timeout => ack_timeouts,
    record_forced_post => forced_posts,
    record_queue_drop => queue_drops,
    record_queue_low_ack => queue_low_acks,
    record_queue_low_backoff => queue_low_backoffs,
    record_tx_backpressure => tx_backpressure,
    record_delivered => packets_delivered,
    record_inactive_discard => inactive_discards,
    record_release_sent => releases_sent,
    record_release_failure => release_failures,
    record_duplicate_release => duplicate_releases,
    record_memory_shortage => memory_shortages,
    record_native_alloc_failure => native_alloc_failures,
}
