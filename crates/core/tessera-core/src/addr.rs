//! Typed virtual and physical address wrappers and page rounding.
//!
//! Provides the [`VirtAddr`] newtype for mapping addresses handed back to
//! drivers, plus [`page_align_up`] used by the memory mapper to round mapping
//! lengths to the page granularity.

use core::fmt;
use core::ops::{Add, Sub};

/// A canonical 64-bit virtual address.
///
/// Canonical form sign-extends bit 47 into bits 48..63, which covers both
/// x86_64 4-level paging and aarch64 48-bit VA layouts.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(u64);

impl VirtAddr {
    /// Creates a new `VirtAddr`. Panics if the address is not canonical.
    #[inline]
    pub const fn new(addr: u64) -> Self {
        let canonical = Self::new_truncate(addr);
        assert!(
            canonical.0 == addr,
            "VirtAddr::new: address is not canonical"
        );
        canonical
    }

    /// Creates a new `VirtAddr`, truncating to canonical form by
    /// sign-extending from bit 47.
    #[inline]
    pub const fn new_truncate(addr: u64) -> Self {
        Self(((addr << 16) as i64 >> 16) as u64)
    }

    /// Returns the zero address.
    #[inline]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns the raw `u64` value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Converts this address to a raw pointer.
    #[inline]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Converts this address to a raw mutable pointer.
    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Returns `true` if the address is aligned to `align`.
    ///
    /// `align` must be a power of two.
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        self.0 & (align - 1) == 0
    }
}

impl Add<u64> for VirtAddr {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self::new_truncate(self.0 + rhs)
    }
}

impl Sub<VirtAddr> for VirtAddr {
    type Output = u64;

    #[inline]
    fn sub(self, rhs: VirtAddr) -> u64 {
        self.0 - rhs.0
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Rounds `size` up to the next multiple of `page_size`.
///
/// `page_size` must be a power of two. Returns `None` if the rounded value
/// does not fit in a `u64`.
#[inline]
pub const fn page_align_up(size: u64, page_size: u64) -> Option<u64> {
    debug_assert!(page_size.is_power_of_two(), "page size must be a power of two");
    let mask = page_size - 1;
    match size.checked_add(mask) {
        Some(padded) => Some(padded & !mask),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virt_addr_canonical() {
        assert_eq!(VirtAddr::new_truncate(0x0000_8000_0000_0000).as_u64(), 0xFFFF_8000_0000_0000);
        assert_eq!(VirtAddr::new(0x1000).as_u64(), 0x1000);
    }

    #[test]
    #[should_panic(expected = "not canonical")]
    fn virt_addr_rejects_non_canonical() {
        let _ = VirtAddr::new(0x0000_8000_0000_0000);
    }

    #[test]
    fn virt_addr_arithmetic() {
        let a = VirtAddr::new(0x4000);
        let b = a + 0x2000;
        assert_eq!(b.as_u64(), 0x6000);
        assert_eq!(b - a, 0x2000);
        assert!(a.is_aligned(0x1000));
        assert!(!(a + 1).is_aligned(0x1000));
    }

    #[test]
    fn page_align_up_rounds() {
        assert_eq!(page_align_up(0, 0x1000), Some(0));
        assert_eq!(page_align_up(1, 0x1000), Some(0x1000));
        assert_eq!(page_align_up(0x1000, 0x1000), Some(0x1000));
        assert_eq!(page_align_up(0x1001, 0x1000), Some(0x2000));
        assert_eq!(page_align_up(0x100, 0x10000), Some(0x10000));
    }

    #[test]
    fn page_align_up_overflow() {
        assert_eq!(page_align_up(u64::MAX, 0x1000), None);
        assert_eq!(page_align_up(u64::MAX - 0xFFF, 0x1000), Some(u64::MAX - 0xFFF));
    }
}
