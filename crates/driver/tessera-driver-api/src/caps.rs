//! Bounded iteration over a function's capability list.
//!
//! The list lives in config space and is controlled by the device, so it may
//! be malformed or cyclic. Every walk stops after
//! [`CAPABILITY_WALK_LIMIT`] records.

use tessera_core::config::CAPABILITY_WALK_LIMIT;

use crate::pci::regs;
use crate::protocol::PciProtocol;

/// A raw PCI capability header: capability ID and its config-space offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCapability {
    /// PCI capability ID (e.g., 0x05 for MSI, 0x11 for MSI-X).
    pub id: u8,
    /// Config-space offset of this capability header.
    pub offset: u8,
}

/// Iterator over the capability records of a function.
///
/// Lazy: the link of a record is only read when the iterator is advanced
/// past it, so a search that stops at a match issues exactly the reads a
/// hand-written walk would.
pub struct CapabilityIter<'a, P: PciProtocol + ?Sized> {
    pci: &'a P,
    next: u8,
    /// Offset of the last yielded record whose link is still unread.
    pending: Option<u8>,
    remaining: u32,
}

impl<'a, P: PciProtocol + ?Sized> CapabilityIter<'a, P> {
    /// Starts a walk at the record at `offset`. Offset `0` is the empty list.
    pub fn new(pci: &'a P, offset: u8) -> Self {
        Self {
            pci,
            next: offset,
            pending: None,
            remaining: CAPABILITY_WALK_LIMIT,
        }
    }

    /// Starts a walk at the capabilities pointer of the standard header.
    pub fn from_header(pci: &'a P) -> Self {
        Self::new(pci, pci.config_read8(regs::CAPABILITIES_PTR))
    }
}

impl<P: PciProtocol + ?Sized> Iterator for CapabilityIter<'_, P> {
    type Item = RawCapability;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(prev) = self.pending.take() {
            self.next = self.pci.config_read8(u16::from(prev) + 1);
        }
        if self.next == 0 || self.remaining == 0 {
            self.next = 0;
            return None;
        }
        self.remaining -= 1;

        let offset = self.next;
        let id = self.pci.config_read8(u16::from(offset));
        self.pending = Some(offset);
        Some(RawCapability { id, offset })
    }
}

impl<P: PciProtocol + ?Sized> core::iter::FusedIterator for CapabilityIter<'_, P> {}
