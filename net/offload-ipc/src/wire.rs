//! Wire message format
//!
//! One [`WireMessage`] describes one transport event. In shared memory it is
//! stored in a [`SlotCell`], a single cache line of plain words so that a
//! clean or invalidate of the slot never touches neighbouring data and a
//! value written by the peer can be validated before it is trusted.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use static_assertions::const_assert_eq;

use crate::error::{Error, Result};

/// Size and alignment of a wire message
pub const WIRE_MESSAGE_SIZE: usize = 32;

/// Transport event kind
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The receiver copied the previous message out; the slot is free
    Acknowledged = 0,
    /// Application core hands a send slot to the offload core
    TransmitPackets = 1,
    /// Offload core lends a receive buffer to the application core
    ReceivePackets = 2,
    /// Application core returns a receive buffer to its owner
    BufferReleased = 3,
    /// Offload core could not allocate a native packet for a transmit
    MemoryShortage = 4,
}

impl TryFrom<u32> for EventKind {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(EventKind::Acknowledged),
            1 => Ok(EventKind::TransmitPackets),
            2 => Ok(EventKind::ReceivePackets),
            3 => Ok(EventKind::BufferReleased),
            4 => Ok(EventKind::MemoryShortage),
            other => Err(Error::UnknownEvent(other)),
        }
    }
}

impl EventKind {
    /// Whether the event carries a buffer reference
    pub const fn carries_buffer(&self) -> bool {
        matches!(
            self,
            EventKind::TransmitPackets | EventKind::ReceivePackets | EventKind::BufferReleased
        )
    }
}

/// Receiver queue state piggybacked on acknowledgements
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowStatus {
    /// Queue has room
    #[default]
    Ok = 0,
    /// Queue is at or below its low-water mark; slow down
    QueueLow = 1,
}

impl From<u32> for FlowStatus {
    fn from(raw: u32) -> Self {
        // Advisory only: anything but an explicit Ok is treated as low.
        if raw == 0 {
            FlowStatus::Ok
        } else {
            FlowStatus::QueueLow
        }
    }
}

/// Opaque reference to a buffer in the shared window.
///
/// The value is an address meaningful only to the buffer's owner. It has no
/// way to be dereferenced directly: the side holding the matching pool view
/// must `acquire` it, which validates the address and invalidates the cache
/// lines first.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CrossCoreRef(usize);

impl CrossCoreRef {
    /// No buffer
    pub const NULL: CrossCoreRef = CrossCoreRef(0);

    pub(crate) const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    /// Rebuild a reference from its wire value
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Wire value of the reference
    pub const fn to_raw(self) -> usize {
        self.0
    }

    /// Check for [`CrossCoreRef::NULL`]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub(crate) const fn addr(self) -> usize {
        self.0
    }
}

impl core::fmt::Display for CrossCoreRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// One transport event
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireMessage {
    event: EventKind,
    flow_status: FlowStatus,
    channel_index: u8,
    buffer_ref: CrossCoreRef,
}

const_assert_eq!(core::mem::size_of::<WireMessage>(), WIRE_MESSAGE_SIZE);
const_assert_eq!(core::mem::align_of::<WireMessage>(), WIRE_MESSAGE_SIZE);

impl WireMessage {
    /// Build a message
    pub const fn new(event: EventKind, buffer_ref: CrossCoreRef, channel_index: u8) -> Self {
        Self {
            event,
            flow_status: FlowStatus::Ok,
            channel_index,
            buffer_ref,
        }
    }

    /// Acknowledgement carrying the receiver's queue state
    pub const fn acknowledged(flow_status: FlowStatus) -> Self {
        Self {
            event: EventKind::Acknowledged,
            flow_status,
            channel_index: 0,
            buffer_ref: CrossCoreRef::NULL,
        }
    }

    /// Send slot handed to the offload core
    pub const fn transmit(buffer_ref: CrossCoreRef, channel_index: u8) -> Self {
        Self::new(EventKind::TransmitPackets, buffer_ref, channel_index)
    }

    /// Receive buffer lent to the application core
    pub const fn receive(buffer_ref: CrossCoreRef, channel_index: u8) -> Self {
        Self::new(EventKind::ReceivePackets, buffer_ref, channel_index)
    }

    /// Receive buffer returned to its owner
    pub const fn released(buffer_ref: CrossCoreRef, channel_index: u8) -> Self {
        Self::new(EventKind::BufferReleased, buffer_ref, channel_index)
    }

    /// Offload core ran out of native packet memory
    pub const fn memory_shortage(channel_index: u8) -> Self {
        Self::new(EventKind::MemoryShortage, CrossCoreRef::NULL, channel_index)
    }

    /// Event kind
    pub const fn event(&self) -> EventKind {
        self.event
    }

    /// Receiver queue state (meaningful on acknowledgements)
    pub const fn flow_status(&self) -> FlowStatus {
        self.flow_status
    }

    /// Logical interface index
    pub const fn channel_index(&self) -> u8 {
        self.channel_index
    }

    /// Referenced buffer
    pub const fn buffer_ref(&self) -> CrossCoreRef {
        self.buffer_ref
    }

    /// Copy with a different flow status
    pub const fn with_flow_status(mut self, flow_status: FlowStatus) -> Self {
        self.flow_status = flow_status;
        self
    }
}

/// Shared-memory image of a wire message.
///
/// Every field is a plain word so a half-written or corrupted slot can be
/// read without undefined behaviour; [`SlotCell::load`] validates it.
#[repr(C, align(32))]
pub(crate) struct SlotCell {
    event: AtomicU32,
    flow_status: AtomicU32,
    channel_index: AtomicU32,
    _reserved: u32,
    buffer_ref: AtomicUsize,
}

const_assert_eq!(core::mem::size_of::<SlotCell>(), WIRE_MESSAGE_SIZE);

impl SlotCell {
    /// Write `msg`; the event word goes last so a reader that observes it
    /// also observes the payload words.
    pub(crate) fn store(&self, msg: &WireMessage) {
        self.buffer_ref.store(msg.buffer_ref.to_raw(), Ordering::Relaxed);
        self.channel_index.store(msg.channel_index as u32, Ordering::Relaxed);
        self.flow_status.store(msg.flow_status as u32, Ordering::Relaxed);
        self.event.store(msg.event as u32, Ordering::Release);
    }

    /// Read the raw event word
    pub(crate) fn raw_event(&self) -> u32 {
        self.event.load(Ordering::Acquire)
    }

    /// Read and validate the slot contents
    pub(crate) fn load(&self) -> Result<WireMessage> {
        let event = EventKind::try_from(self.raw_event())?;
        let channel_index = self.channel_index.load(Ordering::Relaxed);
        Ok(WireMessage {
            event,
            flow_status: FlowStatus::from(self.flow_status.load(Ordering::Relaxed)),
            channel_index: channel_index as u8,
            buffer_ref: CrossCoreRef::from_raw(self.buffer_ref.load(Ordering::Relaxed)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed_cell() -> SlotCell {
        SlotCell {
            event: AtomicU32::new(0),
            flow_status: AtomicU32::new(0),
            channel_index: AtomicU32::new(0),
            _reserved: 0,
            buffer_ref: AtomicUsize::new(0),
        }
    }

    #[test]
    fn event_kind_decoding() {
        assert_eq!(EventKind::try_from(2), Ok(EventKind::ReceivePackets));
        assert_eq!(EventKind::try_from(9), Err(Error::UnknownEvent(9)));
        assert!(EventKind::TransmitPackets.carries_buffer());
        assert!(!EventKind::MemoryShortage.carries_buffer());
    }

    #[test]
    fn zeroed_slot_reads_as_acknowledged() {
        let cell = zeroed_cell();
        assert_eq!(cell.load(), Ok(WireMessage::acknowledged(FlowStatus::Ok)));
    }

    #[test]
    fn slot_preserves_message() {
        let cell = zeroed_cell();
        let msg = WireMessage::transmit(CrossCoreRef::from_raw(0x2000_0440), 3);
        cell.store(&msg);
        assert_eq!(cell.load(), Ok(msg));

        let ack = WireMessage::acknowledged(FlowStatus::QueueLow);
        cell.store(&ack);
        assert_eq!(cell.load().map(|m| m.flow_status()), Ok(FlowStatus::QueueLow));
    }

    #[test]
    fn corrupted_event_is_rejected() {
        let cell = zeroed_cell();
        cell.event.store(0xdead, Ordering::Relaxed);
        assert_eq!(cell.load(), Err(Error::UnknownEvent(0xdead)));
    }
}
