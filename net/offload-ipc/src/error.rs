//! Error types for transport operations

use core::fmt;

/// Transport result type
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Transport error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Buffer pool or message queue exhausted; retry later or drop
    Backpressure,
    /// Mailbox acknowledgement not observed within the poll bound
    Timeout,
    /// Logical interface is not running
    ChannelInactive,
    /// Payload does not fit a transport buffer
    PayloadTooLarge {
        /// Bytes offered
        len: usize,
        /// Bytes a buffer can hold
        capacity: usize,
    },
    /// Cross-core reference does not name a buffer of the expected pool
    InvalidRef,
    /// Raw event value not understood by this side
    UnknownEvent(u32),
    /// Channel not initialized
    NotInitialized,
    /// Channel already initialized or registered
    AlreadyInitialized,
    /// Rejected configuration value
    InvalidConfig(&'static str),
    /// Hardware boundary error
    Hal(soc_hal::Error),
}

impl From<soc_hal::Error> for Error {
    fn from(err: soc_hal::Error) -> Self {
        Error::Hal(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Backpressure => write!(f, "Transport backpressure"),
            Error::Timeout => write!(f, "Mailbox acknowledgement timeout"),
            Error::ChannelInactive => write!(f, "Channel inactive"),
            Error::PayloadTooLarge { len, capacity } => {
                write!(f, "Payload of {} bytes exceeds buffer capacity {}", len, capacity)
            }
            Error::InvalidRef => write!(f, "Invalid cross-core reference"),
            Error::UnknownEvent(raw) => write!(f, "Unknown event {:#x}", raw),
            Error::NotInitialized => write!(f, "Not initialized"),
            Error::AlreadyInitialized => write!(f, "Already initialized"),
            Error::InvalidConfig(what) => write!(f, "Invalid configuration: {}", what),
            Error::Hal(err) => write!(f, "HAL error: {}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Backpressure => defmt::write!(f, "Backpressure"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::ChannelInactive => defmt::write!(f, "ChannelInactive"),
            Error::PayloadTooLarge { len, capacity } => {
                defmt::write!(f, "PayloadTooLarge({=usize}/{=usize})", len, capacity)
            }
            Error::InvalidRef => defmt::write!(f, "InvalidRef"),
            Error::UnknownEvent(raw) => defmt::write!(f, "UnknownEvent({=u32:#x})", raw),
            Error::NotInitialized => defmt::write!(f, "NotInitialized"),
            Error::AlreadyInitialized => defmt::write!(f, "AlreadyInitialized"),
            Error::InvalidConfig(what) => defmt::write!(f, "InvalidConfig({=str})", what),
            Error::Hal(err) => defmt::write!(f, "Hal({})", err),
        }
    }
}
