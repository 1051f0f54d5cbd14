//! Shared-memory layout
//!
//! Both cores carve the same window the same way:
//!
//! ```text
//! base ─► ┌──────────────────────────────┐
//!         │ host → device mailbox slot   │  one line
//!         ├──────────────────────────────┤
//!         │ device → host mailbox slot   │  one line
//!         ├──────────────────────────────┤
//!         │ send pool                    │  send_pool_depth × (header + data)
//!         │   owned by the host          │
//!         ├──────────────────────────────┤
//!         │ receive pool                 │  receive_pool_depth × (header + data)
//!         │   owned by the device        │
//!         └──────────────────────────────┘
//! ```
//!
//! Every object starts on its own line so that cache maintenance on one never
//! touches another.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::sync::Arc;
use core::ptr::NonNull;
use core::sync::atomic::AtomicU32;

use soc_hal::MemoryWindow;
use static_assertions::const_assert;

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::wire::{CrossCoreRef, SlotCell, WIRE_MESSAGE_SIZE};

/// Buffer header, the first line of every pool slot.
///
/// `state` is the only word the non-owning side may write (send slots: the
/// peer clears `busy`). The header sits alone in its line so that write
/// never races with payload data.
#[repr(C, align(32))]
pub(crate) struct BufferHeader {
    pub(crate) state: AtomicU32,
    pub(crate) len: AtomicU32,
    pub(crate) channel_index: AtomicU32,
}

const_assert!(core::mem::size_of::<BufferHeader>() <= WIRE_MESSAGE_SIZE);

const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Backing allocation of a [`HeapWindow`]
struct HeapRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The region is plain memory; all access goes through atomics or the
// ownership protocol.
unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Memory window reserved for the transport.
///
/// Cheap to clone; clones keep a heap-backed window alive.
#[derive(Clone)]
pub struct SharedWindow {
    window: MemoryWindow,
    _backing: Option<Arc<HeapRegion>>,
}

impl SharedWindow {
    /// Reserve a platform-provided window for the transport
    ///
    /// # Safety
    ///
    /// The range must be mapped read/write at the same address on this core
    /// for as long as any channel uses it, must be used by nothing but the
    /// transport, and must be zero-filled or initialized by both sides'
    /// `init` before the peer reads it.
    pub unsafe fn new(window: MemoryWindow) -> Self {
        Self {
            window,
            _backing: None,
        }
    }

    /// Window bounds
    pub fn window(&self) -> MemoryWindow {
        self.window
    }

    pub(crate) fn base(&self) -> usize {
        self.window.base()
    }
}

impl core::fmt::Debug for SharedWindow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedWindow")
            .field("base", &format_args!("{:#x}", self.window.base()))
            .field("size", &self.window.size())
            .finish()
    }
}

/// Zeroed, line-aligned heap memory standing in for the shared window.
///
/// Used when both sides run in one address space: hosted simulation, tests
/// and the loopback pair.
pub struct HeapWindow;

impl HeapWindow {
    /// Allocate `size` bytes aligned to `align`
    pub fn allocate(size: usize, align: usize) -> Result<SharedWindow> {
        let layout = Layout::from_size_align(size, align.max(WIRE_MESSAGE_SIZE))
            .map_err(|_| Error::InvalidConfig("window size or alignment"))?;
        if layout.size() == 0 {
            return Err(Error::InvalidConfig("window size must be non-zero"));
        }
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(Error::Backpressure)?;
        let window = MemoryWindow::new(ptr.as_ptr() as usize, size)?;
        Ok(SharedWindow {
            window,
            _backing: Some(Arc::new(HeapRegion { ptr, layout })),
        })
    }

    /// Allocate a window sized for `config`
    pub fn for_config(config: &TransportConfig, line_size: usize) -> Result<SharedWindow> {
        Self::allocate(ShmLayout::required_size(config, line_size), line_size)
    }
}

/// Array of equally sized buffer slots inside the window
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolRegion {
    base: usize,
    depth: usize,
    stride: usize,
    header_len: usize,
    capacity: usize,
}

impl PoolRegion {
    fn new(base: usize, depth: usize, line: usize, buffer_size: usize) -> Self {
        let header_len = round_up(core::mem::size_of::<BufferHeader>(), line);
        let data_len = round_up(buffer_size, line);
        Self {
            base,
            depth,
            stride: header_len + data_len,
            header_len,
            capacity: buffer_size,
        }
    }

    fn span(&self) -> usize {
        self.depth * self.stride
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    /// Payload bytes per slot
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn header_len(&self) -> usize {
        self.header_len
    }

    pub(crate) fn slot_addr(&self, index: usize) -> usize {
        debug_assert!(index < self.depth);
        self.base + index * self.stride
    }

    pub(crate) fn data_addr(&self, index: usize) -> usize {
        self.slot_addr(index) + self.header_len
    }

    pub(crate) fn slot_ref(&self, index: usize) -> CrossCoreRef {
        CrossCoreRef::from_addr(self.slot_addr(index))
    }

    /// Map a reference back to a slot index, rejecting anything that is not
    /// exactly the start of a slot of this pool
    pub(crate) fn index_of(&self, r: CrossCoreRef) -> Result<usize> {
        let addr = r.addr();
        if addr < self.base {
            return Err(Error::InvalidRef);
        }
        let offset = addr - self.base;
        if offset % self.stride != 0 || offset / self.stride >= self.depth {
            return Err(Error::InvalidRef);
        }
        Ok(offset / self.stride)
    }

    /// Header of slot `index`
    ///
    /// # Safety
    ///
    /// The pool must lie inside a live [`SharedWindow`] and `index < depth`.
    pub(crate) unsafe fn header(&self, index: usize) -> &BufferHeader {
        &*(self.slot_addr(index) as *const BufferHeader)
    }

    pub(crate) fn data_ptr(&self, index: usize) -> *mut u8 {
        self.data_addr(index) as *mut u8
    }
}

/// Positions of every transport object inside the shared window
#[derive(Debug, Clone, Copy)]
pub struct ShmLayout {
    line: usize,
    host_to_device: usize,
    device_to_host: usize,
    send_pool: PoolRegion,
    receive_pool: PoolRegion,
}

impl ShmLayout {
    fn align_for(line_size: usize) -> usize {
        line_size.max(WIRE_MESSAGE_SIZE).next_power_of_two()
    }

    /// Bytes of shared memory the transport needs for `config`
    pub fn required_size(config: &TransportConfig, line_size: usize) -> usize {
        let line = Self::align_for(line_size);
        let send = PoolRegion::new(0, config.send_pool_depth, line, config.buffer_size);
        let receive = PoolRegion::new(0, config.receive_pool_depth, line, config.buffer_size);
        2 * line + send.span() + receive.span()
    }

    /// Lay the transport out over `window`
    pub fn new(window: &SharedWindow, config: &TransportConfig, line_size: usize) -> Result<Self> {
        config.validate()?;
        let line = Self::align_for(line_size);
        if !window.window().is_aligned(line) {
            return Err(Error::Hal(soc_hal::Error::Misaligned));
        }
        let required = Self::required_size(config, line_size);
        if window.window().size() < required {
            return Err(Error::Hal(soc_hal::Error::OutOfRange));
        }

        let base = window.base();
        let send_pool = PoolRegion::new(base + 2 * line, config.send_pool_depth, line, config.buffer_size);
        let receive_pool = PoolRegion::new(
            base + 2 * line + send_pool.span(),
            config.receive_pool_depth,
            line,
            config.buffer_size,
        );
        Ok(Self {
            line,
            host_to_device: base,
            device_to_host: base + line,
            send_pool,
            receive_pool,
        })
    }

    /// Alignment unit used for every object
    pub fn line(&self) -> usize {
        self.line
    }

    pub(crate) fn host_to_device_slot(&self) -> NonNull<SlotCell> {
        slot_ptr(self.host_to_device)
    }

    pub(crate) fn device_to_host_slot(&self) -> NonNull<SlotCell> {
        slot_ptr(self.device_to_host)
    }

    pub(crate) fn send_pool(&self) -> PoolRegion {
        self.send_pool
    }

    pub(crate) fn receive_pool(&self) -> PoolRegion {
        self.receive_pool
    }
}

fn slot_ptr(addr: usize) -> NonNull<SlotCell> {
    // Window addresses are never null: MemoryWindow rejects wrapping ranges
    // and the slot sits at or after the base.
    NonNull::new(addr as *mut SlotCell).unwrap_or(NonNull::dangling())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> TransportConfig {
        TransportConfig {
            send_pool_depth: 2,
            receive_pool_depth: 3,
            buffer_size: 100,
            ..TransportConfig::default()
        }
    }

    #[test]
    fn regions_are_line_aligned_and_disjoint() {
        let config = small_config();
        let window = HeapWindow::for_config(&config, 32).unwrap();
        let layout = ShmLayout::new(&window, &config, 32).unwrap();

        let base = window.base();
        assert_eq!(layout.host_to_device, base);
        assert_eq!(layout.device_to_host, base + 32);
        // header 32 + data rounded up from 100 to 128
        assert_eq!(layout.send_pool.stride, 160);
        assert_eq!(layout.send_pool.slot_addr(0), base + 64);
        assert_eq!(layout.receive_pool.slot_addr(0), base + 64 + 2 * 160);
        assert_eq!(ShmLayout::required_size(&config, 32), 64 + 5 * 160);
        for index in 0..3 {
            assert_eq!(layout.receive_pool.slot_addr(index) % 32, 0);
            assert_eq!(layout.receive_pool.data_addr(index) % 32, 0);
        }
    }

    #[test]
    fn wide_lines_widen_every_object() {
        let config = small_config();
        let window = HeapWindow::for_config(&config, 64).unwrap();
        let layout = ShmLayout::new(&window, &config, 64).unwrap();
        assert_eq!(layout.line(), 64);
        assert_eq!(layout.device_to_host - layout.host_to_device, 64);
        assert_eq!(layout.send_pool.stride, 64 + 128);
    }

    #[test]
    fn undersized_window_rejected() {
        let config = small_config();
        let window = HeapWindow::allocate(256, 32).unwrap();
        assert_eq!(
            ShmLayout::new(&window, &config, 32).err(),
            Some(Error::Hal(soc_hal::Error::OutOfRange))
        );
    }

    #[test]
    fn index_of_rejects_foreign_addresses() {
        let config = small_config();
        let window = HeapWindow::for_config(&config, 32).unwrap();
        let layout = ShmLayout::new(&window, &config, 32).unwrap();
        let pool = layout.send_pool();

        assert_eq!(pool.index_of(pool.slot_ref(1)), Ok(1));
        let inside = CrossCoreRef::from_raw(pool.slot_addr(1) + 8);
        assert_eq!(pool.index_of(inside), Err(Error::InvalidRef));
        let past = CrossCoreRef::from_raw(pool.slot_addr(1) + pool.stride);
        assert_eq!(pool.index_of(past), Err(Error::InvalidRef));
        assert_eq!(pool.index_of(CrossCoreRef::NULL), Err(Error::InvalidRef));
        let receive = layout.receive_pool();
        assert_eq!(pool.index_of(receive.slot_ref(0)), Err(Error::InvalidRef));
    }
}
