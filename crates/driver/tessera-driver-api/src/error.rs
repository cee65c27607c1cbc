//! Protocol status codes.

use core::fmt;

/// Errors returned by PCI protocol operations and the kernel calls behind
/// them.
///
/// Each variant has a stable raw code (see [`Status::into_raw`]) shared with
/// the kernel channel. Codes the protocol does not interpret are carried
/// through unchanged as [`Status::Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation or mode is not implemented on this platform or device.
    NotSupported,
    /// The kernel could not allocate memory for the request.
    NoMemory,
    /// Bad caller input.
    InvalidArgs,
    /// The handle is stale, closed, or names a removed device.
    BadHandle,
    /// The operation is invalid for the kind of object it was applied to.
    WrongType,
    /// An offset or index lies outside the addressable range.
    OutOfRange,
    /// The object is not in a state that permits the operation.
    BadState,
    /// The requested object (e.g. an unimplemented BAR) does not exist.
    NotFound,
    /// A blocking wait was cancelled by closing the handle being waited on.
    Canceled,
    /// The handle lacks the rights required for the operation.
    AccessDenied,
    /// The device or bus reported an I/O failure.
    Io,
    /// A channel error code with no dedicated variant, passed through as-is.
    Channel(i32),
}

impl Status {
    /// Returns the raw wire code for this status. Always negative for
    /// errors produced by this crate.
    #[must_use]
    pub const fn into_raw(self) -> i32 {
        match self {
            Self::NotSupported => -2,
            Self::NoMemory => -4,
            Self::InvalidArgs => -10,
            Self::BadHandle => -11,
            Self::WrongType => -12,
            Self::OutOfRange => -14,
            Self::BadState => -20,
            Self::Canceled => -23,
            Self::NotFound => -25,
            Self::AccessDenied => -30,
            Self::Io => -40,
            Self::Channel(code) => code,
        }
    }

    /// Interprets a raw wire code: `0` is success, anything else an error.
    ///
    /// # Errors
    ///
    /// Returns the decoded [`Status`] for every non-zero code.
    pub const fn check(code: i32) -> Result<(), Self> {
        match code {
            0 => Ok(()),
            -2 => Err(Self::NotSupported),
            -4 => Err(Self::NoMemory),
            -10 => Err(Self::InvalidArgs),
            -11 => Err(Self::BadHandle),
            -12 => Err(Self::WrongType),
            -14 => Err(Self::OutOfRange),
            -20 => Err(Self::BadState),
            -23 => Err(Self::Canceled),
            -25 => Err(Self::NotFound),
            -30 => Err(Self::AccessDenied),
            -40 => Err(Self::Io),
            other => Err(Self::Channel(other)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSupported => f.write_str("operation not supported"),
            Self::NoMemory => f.write_str("out of memory"),
            Self::InvalidArgs => f.write_str("invalid arguments"),
            Self::BadHandle => f.write_str("bad handle"),
            Self::WrongType => f.write_str("wrong object type"),
            Self::OutOfRange => f.write_str("out of range"),
            Self::BadState => f.write_str("bad state"),
            Self::Canceled => f.write_str("wait canceled"),
            Self::NotFound => f.write_str("not found"),
            Self::AccessDenied => f.write_str("access denied"),
            Self::Io => f.write_str("I/O error"),
            Self::Channel(code) => write!(f, "channel error {code}"),
        }
    }
}

impl core::error::Error for Status {}
