//! Error types for HAL operations

use core::fmt;

/// HAL result type
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// HAL error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid parameter
    InvalidParameter,
    /// Address not aligned to the required boundary
    Misaligned,
    /// Address range outside the described window
    OutOfRange,
    /// Address arithmetic overflowed
    Overflow,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidParameter => write!(f, "Invalid parameter"),
            Error::Misaligned => write!(f, "Misaligned address"),
            Error::OutOfRange => write!(f, "Address out of range"),
            Error::Overflow => write!(f, "Address overflow"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "{}",
            match self {
                Error::InvalidParameter => "InvalidParameter",
                Error::Misaligned => "Misaligned",
                Error::OutOfRange => "OutOfRange",
                Error::Overflow => "Overflow",
            }
        );
    }
}
