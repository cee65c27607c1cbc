//! PCI capability list walking and capability parsing.
//!
//! The walker follows the record chain in config space one byte read at a
//! time, bounded by [`CAPABILITY_WALK_LIMIT`] so that a malformed or cyclic
//! chain cannot hang the caller. MSI and MSI-X capabilities can be parsed
//! once located.

use tessera_driver_api::PciProtocol;

pub use tessera_core::config::CAPABILITY_WALK_LIMIT;
pub use tessera_driver_api::{CapabilityIter, RawCapability, cap_id};

/// Returns the offset of the first capability of `cap_type`, examining the
/// record at `offset` first.
///
/// `None` covers both the end of the list and an exhausted walk bound.
pub fn find_capability<P: PciProtocol + ?Sized>(
    pci: &P,
    offset: u8,
    cap_type: u8,
) -> Option<u8> {
    CapabilityIter::new(pci, offset)
        .find(|cap| cap.id == cap_type)
        .map(|cap| cap.offset)
}

// ---------------------------------------------------------------------------
// MSI-X capability
// ---------------------------------------------------------------------------

/// Parsed MSI-X capability from PCI config space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsixCapability {
    /// Config-space offset of the MSI-X capability header.
    pub cap_offset: u8,
    /// Number of MSI-X table entries minus one, as encoded in hardware.
    pub table_size: u16,
    /// BAR index containing the MSI-X table.
    pub table_bar: u8,
    /// Byte offset of the MSI-X table within the BAR.
    pub table_offset: u32,
    /// BAR index containing the PBA (Pending Bit Array).
    pub pba_bar: u8,
    /// Byte offset of the PBA within the BAR.
    pub pba_offset: u32,
    /// MSI-X enable bit of message control.
    pub enabled: bool,
}

impl MsixCapability {
    /// Number of vectors in the table.
    #[must_use]
    pub const fn vectors(&self) -> u32 {
        self.table_size as u32 + 1
    }
}

/// Reads an MSI-X capability at the given config-space offset.
pub fn read_msix_capability<P: PciProtocol + ?Sized>(pci: &P, cap_offset: u8) -> MsixCapability {
    let base = u16::from(cap_offset);
    let msg_control = pci.config_read16(base + 2);
    let table_bir_offset = pci.config_read32(base + 4);
    let pba_bir_offset = pci.config_read32(base + 8);

    // BIR = bits 2:0, offset = bits 31:3.
    MsixCapability {
        cap_offset,
        table_size: msg_control & 0x7FF,
        table_bar: (table_bir_offset & 0x7) as u8,
        table_offset: table_bir_offset & !0x7,
        pba_bar: (pba_bir_offset & 0x7) as u8,
        pba_offset: pba_bir_offset & !0x7,
        enabled: msg_control & (1 << 15) != 0,
    }
}

// ---------------------------------------------------------------------------
// MSI capability
// ---------------------------------------------------------------------------

/// Parsed MSI capability from PCI config space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsiCapability {
    /// Config-space offset of the MSI capability header.
    pub cap_offset: u8,
    /// Number of vectors the function can request (1, 2, 4, ... 32).
    pub max_vectors: u8,
    /// The message address register is 64 bits wide.
    pub is_64bit: bool,
    /// The function supports masking individual vectors.
    pub per_vector_masking: bool,
    /// MSI enable bit of message control.
    pub enabled: bool,
}

/// Reads an MSI capability at the given config-space offset.
pub fn read_msi_capability<P: PciProtocol + ?Sized>(pci: &P, cap_offset: u8) -> MsiCapability {
    let msg_control = pci.config_read16(u16::from(cap_offset) + 2);

    // Multiple Message Capable, bits 3:1, log2 encoded. Values above 5 are
    // reserved.
    let mmc = ((msg_control >> 1) & 0x7).min(5);

    MsiCapability {
        cap_offset,
        max_vectors: 1 << mmc,
        is_64bit: msg_control & (1 << 7) != 0,
        per_vector_masking: msg_control & (1 << 8) != 0,
        enabled: msg_control & 1 != 0,
    }
}
