//! Shared-memory transport between an application core and a network-offload
//! core
//!
//! The two cores share a small memory window but no coherent cache and no
//! allocator. This crate moves control messages and zero-copy packet
//! buffers across that boundary.
//!
//! # Architecture
//!
//! ```text
//!         application core                      offload core
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │ Upstream (network stack)     │   │ Upstream (radio / MAC)       │
//! ├──────────────────────────────┤   ├──────────────────────────────┤
//! │ HostAdapter                  │   │ DeviceAdapter                │
//! │   SendPool ─────── TransmitPackets ───────► PeerSendPool        │
//! │   PeerReceivePool ◄─── ReceivePackets ──── ReceivePool          │
//! │                  ─── BufferReleased ─────►                      │
//! ├──────────────────────────────┤   ├──────────────────────────────┤
//! │ MessageQueue  ◄─ MailboxRx   │   │ MailboxRx ─► MessageQueue    │
//! │               MailboxTx ─────┼───┼──► one slot per direction    │
//! └──────────────┬───────────────┘   └──────────────┬───────────────┘
//!                └────── CacheBridge + doorbell ─────┘
//! ```
//!
//! - [`wire`]: the fixed 32-byte message
//! - [`cache`]: publish/acquire typing over cache maintenance
//! - [`mailbox`]: single-slot rendezvous with acknowledgement
//! - [`queue`]: bounded ISR-to-task message queue
//! - [`buffer`]: send slots and receive buffers
//! - [`adapter`]: the two role-specific sides
//! - [`channel`]: lifecycle and the channel manager

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod adapter;
pub mod buffer;
pub mod cache;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod layout;
pub mod loopback;
pub mod mailbox;
pub mod queue;
pub mod stats;
pub mod status;
pub mod sync;
pub mod wire;

#[cfg(feature = "std")]
pub mod worker;

pub use adapter::{BufferUsage, DeviceAdapter, HostAdapter, SideAdapter, Upstream};
pub use buffer::{OwnedReceiveBuffer, PayloadView, ReleaseOutcome, SendSlot, SlotOwnership};
pub use cache::{Acquired, CacheBridge, Published, Region};
pub use channel::{Channel, ChannelManager, Platform, Role};
pub use config::{AckTimeoutPolicy, TransportConfig};
pub use error::{Error, Result};
pub use layout::{HeapWindow, SharedWindow, ShmLayout};
pub use loopback::LoopbackPair;
pub use mailbox::{Admission, Deadline, SlotState};
pub use queue::MessageQueue;
pub use stats::{ChannelStats, StatsSnapshot};
pub use status::{ChannelFlags, InterfaceTable};
pub use wire::{CrossCoreRef, EventKind, FlowStatus, WireMessage, WIRE_MESSAGE_SIZE};

#[cfg(feature = "std")]
pub use worker::Workers;
