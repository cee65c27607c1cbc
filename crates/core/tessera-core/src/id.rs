//! Kernel handle newtype.
//!
//! Every resource this layer touches (the bound PCI function, memory
//! objects, interrupt objects) is named by a kernel-granted [`Handle`].

use core::fmt;

/// Opaque access token for a kernel-managed object.
///
/// A `Handle` carries no ownership by itself; closing it is the job of
/// whoever was handed it. Value `0` is reserved as the invalid sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Handle(u32);

impl Handle {
    /// The invalid handle sentinel. Never names a live object.
    pub const INVALID: Self = Self(0);

    /// Creates a new `Handle` from its raw value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw `u32` value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns `true` unless this is [`Handle::INVALID`].
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "h{:#x}", self.0)
        } else {
            f.write_str("h<invalid>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_sentinel() {
        assert!(!Handle::INVALID.is_valid());
        assert_eq!(Handle::INVALID.as_u32(), 0);
        assert!(Handle::new(7).is_valid());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Handle::new(0x1f)), "h0x1f");
        assert_eq!(format!("{}", Handle::INVALID), "h<invalid>");
    }
}
