//! Cache bridge
//!
//! Every write that the peer will read must be published (cache clean) before
//! it is signalled, and every region written by the peer must be acquired
//! (cache invalidate) before it is read. The bridge makes that structural:
//! buffers can only be referenced across the core boundary from a
//! [`Published`] handle, and peer-owned buffers can only be read through an
//! [`Acquired`] handle.

use alloc::sync::Arc;
use core::ops::Deref;

use soc_hal::cache::{CacheMaintenance, Coherent};

/// Memory range subject to cache maintenance
pub trait Region {
    /// First byte of the range
    fn addr(&self) -> usize;

    /// Length of the range in bytes
    fn len(&self) -> usize;
}

/// A region whose writes have been cleaned to memory
#[derive(Debug)]
#[must_use = "a published region must be handed to the peer or it is wasted"]
pub struct Published<R> {
    region: R,
}

impl<R> Published<R> {
    pub(crate) fn into_inner(self) -> R {
        self.region
    }
}

impl<R> Deref for Published<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.region
    }
}

/// A region whose stale cache lines have been discarded
#[derive(Debug)]
pub struct Acquired<R> {
    region: R,
}

impl<R> Acquired<R> {
    pub(crate) fn into_inner(self) -> R {
        self.region
    }
}

impl<R> Deref for Acquired<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.region
    }
}

/// Publish/acquire operations over the platform cache
#[derive(Clone)]
pub struct CacheBridge {
    ops: Arc<dyn CacheMaintenance>,
}

impl CacheBridge {
    /// Wrap the platform's cache maintenance
    pub fn new(ops: Arc<dyn CacheMaintenance>) -> Self {
        Self { ops }
    }

    /// Bridge for coherent interconnects, with the given nominal line size
    pub fn coherent(line_size: usize) -> Self {
        Self::new(Arc::new(Coherent::new(line_size)))
    }

    /// Cache line size of the underlying platform
    pub fn line_size(&self) -> usize {
        self.ops.line_size()
    }

    /// Clean `region` so the peer observes its contents
    pub fn publish<R: Region>(&self, region: R) -> Published<R> {
        self.ops.clean(region.addr(), region.len());
        Published { region }
    }

    /// Invalidate `region` so this core observes the peer's writes
    pub fn acquire<R: Region>(&self, region: R) -> Acquired<R> {
        self.ops.invalidate(region.addr(), region.len());
        Acquired { region }
    }

    pub(crate) fn clean_raw(&self, addr: usize, len: usize) {
        self.ops.clean(addr, len);
    }

    pub(crate) fn invalidate_raw(&self, addr: usize, len: usize) {
        self.ops.invalidate(addr, len);
    }
}

impl core::fmt::Debug for CacheBridge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheBridge")
            .field("line_size", &self.ops.line_size())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloc::vec::Vec;
    use spin::Mutex;

    /// Records every maintenance call for ordering assertions
    #[derive(Default)]
    pub(crate) struct RecordingCache {
        pub(crate) ops: Mutex<Vec<(char, usize, usize)>>,
    }

    impl CacheMaintenance for RecordingCache {
        fn line_size(&self) -> usize {
            32
        }

        fn clean(&self, addr: usize, len: usize) {
            self.ops.lock().push(('c', addr, len));
        }

        fn invalidate(&self, addr: usize, len: usize) {
            self.ops.lock().push(('i', addr, len));
        }
    }

    struct Span(usize, usize);

    impl Region for Span {
        fn addr(&self) -> usize {
            self.0
        }

        fn len(&self) -> usize {
            self.1
        }
    }

    #[test]
    fn publish_cleans_and_acquire_invalidates() {
        let cache = Arc::new(RecordingCache::default());
        let bridge = CacheBridge::new(cache.clone());

        let published = bridge.publish(Span(0x100, 64));
        assert_eq!(published.addr(), 0x100);
        let acquired = bridge.acquire(Span(0x200, 32));
        assert_eq!(acquired.len(), 32);

        assert_eq!(*cache.ops.lock(), [('c', 0x100, 64), ('i', 0x200, 32)]);
    }
}
