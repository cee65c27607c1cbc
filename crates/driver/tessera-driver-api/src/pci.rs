//! PCI data model shared by the bus kernel, the protocol, and drivers.

use core::fmt;

use tessera_core::{Handle, static_assert};

use crate::error::Status;

// ---------------------------------------------------------------------------
// Device identity
// ---------------------------------------------------------------------------

/// PCI bus/device/function address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PciAddress {
    /// Bus number (0-255).
    pub bus: u8,
    /// Device number (0-31).
    pub device: u8,
    /// Function number (0-7).
    pub function: u8,
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }
}

/// Identification snapshot of a bound PCI function.
///
/// Captured once when the device is bound and handed out by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PciDeviceInfo {
    /// Bus/device/function address.
    pub address: PciAddress,
    /// Vendor ID.
    pub vendor_id: u16,
    /// Device ID.
    pub device_id: u16,
    /// Revision ID.
    pub revision: u8,
    /// Base class code.
    pub class: u8,
    /// Subclass code.
    pub subclass: u8,
    /// Programming interface byte.
    pub prog_if: u8,
    /// Subsystem vendor ID.
    pub subsystem_vendor_id: u16,
    /// Subsystem device ID.
    pub subsystem_device_id: u16,
}

// ---------------------------------------------------------------------------
// Resource ids
// ---------------------------------------------------------------------------

/// Abstract resource id a driver asks the bus for.
///
/// The raw numbering is a wire contract: BARs occupy `0..=5` contiguously
/// and the configuration space follows at `6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceId {
    /// Base Address Register `0..=5`.
    Bar(u8),
    /// The function's configuration space.
    Config,
}

impl ResourceId {
    /// Raw id of BAR 0.
    pub const BAR_0: u32 = 0;
    /// Raw id of BAR 5, the last BAR.
    pub const BAR_5: u32 = 5;
    /// Raw id of the configuration space.
    pub const CONFIG: u32 = 6;
    /// Number of resource ids; every valid raw id is below this.
    pub const COUNT: u32 = 7;

    /// Decodes a raw resource id.
    ///
    /// # Errors
    ///
    /// Returns [`Status::InvalidArgs`] if `raw >= ResourceId::COUNT`.
    pub const fn from_raw(raw: u32) -> Result<Self, Status> {
        match raw {
            Self::BAR_0..=Self::BAR_5 => Ok(Self::Bar(raw as u8)),
            Self::CONFIG => Ok(Self::Config),
            _ => Err(Status::InvalidArgs),
        }
    }

    /// Returns the raw wire id.
    #[must_use]
    pub const fn into_raw(self) -> u32 {
        match self {
            Self::Bar(index) => index as u32,
            Self::Config => Self::CONFIG,
        }
    }

    /// Returns `true` for BAR ids.
    #[must_use]
    pub const fn is_bar(self) -> bool {
        matches!(self, Self::Bar(_))
    }
}

static_assert!(ResourceId::BAR_0 == 0, "BAR 0's id is not 0");
static_assert!(ResourceId::BAR_5 == 5, "BAR 5's id is not 5");
static_assert!(ResourceId::CONFIG > ResourceId::BAR_5, "resource id order is wrong");
static_assert!(ResourceId::COUNT == ResourceId::CONFIG + 1);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bar(index) => write!(f, "BAR{index}"),
            Self::Config => f.write_str("CONFIG"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resource descriptors
// ---------------------------------------------------------------------------

/// Kind of a hardware resource window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Memory-mapped I/O.
    Mmio,
    /// Port-mapped I/O, reachable only through I/O instructions.
    Pio,
}

/// A resolved hardware resource window.
///
/// Produced fresh on every resolution and never cached. The `vmo` of an
/// [`PciResource::Mmio`] is owned by whoever received the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciResource {
    /// Memory-mapped window backed by a memory object.
    Mmio {
        /// Physical base address.
        base: u64,
        /// Size in bytes.
        size: u64,
        /// Memory object handle backing the window.
        vmo: Handle,
    },
    /// I/O port window.
    Pio {
        /// First port.
        base: u64,
        /// Number of ports.
        size: u64,
    },
}

impl PciResource {
    /// Returns the kind of this window.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Mmio { .. } => ResourceKind::Mmio,
            Self::Pio { .. } => ResourceKind::Pio,
        }
    }

    /// Returns the base physical address or first port.
    #[must_use]
    pub const fn base(&self) -> u64 {
        match *self {
            Self::Mmio { base, .. } | Self::Pio { base, .. } => base,
        }
    }

    /// Returns the size of the window in bytes (or ports).
    #[must_use]
    pub const fn size(&self) -> u64 {
        match *self {
            Self::Mmio { size, .. } | Self::Pio { size, .. } => size,
        }
    }

    /// Returns the backing memory object, if any.
    #[must_use]
    pub const fn vmo(&self) -> Option<Handle> {
        match *self {
            Self::Mmio { vmo, .. } => Some(vmo),
            Self::Pio { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Cache policy
// ---------------------------------------------------------------------------

/// Cache policy applied to a BAR's memory object before it is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CachePolicy {
    /// Normal write-back cached memory.
    Cached = 0,
    /// Uncached.
    Uncached = 1,
    /// Uncached, strongly ordered device memory.
    UncachedDevice = 2,
    /// Write-combining.
    WriteCombining = 3,
}

impl CachePolicy {
    /// Decodes a raw cache policy.
    ///
    /// # Errors
    ///
    /// Returns [`Status::InvalidArgs`] for unknown values.
    pub const fn from_raw(raw: u32) -> Result<Self, Status> {
        match raw {
            0 => Ok(Self::Cached),
            1 => Ok(Self::Uncached),
            2 => Ok(Self::UncachedDevice),
            3 => Ok(Self::WriteCombining),
            _ => Err(Status::InvalidArgs),
        }
    }
}

// ---------------------------------------------------------------------------
// Interrupt modes
// ---------------------------------------------------------------------------

/// Interrupt delivery mode of a PCI function. Modes are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum IrqMode {
    /// No interrupts delivered.
    Disabled = 0,
    /// Legacy INTx line-based interrupt.
    Legacy = 1,
    /// Message-signaled interrupts.
    Msi = 2,
    /// Extended message-signaled interrupts.
    MsiX = 3,
}

impl IrqMode {
    /// Decodes a raw interrupt mode.
    ///
    /// # Errors
    ///
    /// Returns [`Status::InvalidArgs`] for unknown values.
    pub const fn from_raw(raw: u32) -> Result<Self, Status> {
        match raw {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::Legacy),
            2 => Ok(Self::Msi),
            3 => Ok(Self::MsiX),
            _ => Err(Status::InvalidArgs),
        }
    }
}

impl fmt::Display for IrqMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("disabled"),
            Self::Legacy => f.write_str("legacy"),
            Self::Msi => f.write_str("MSI"),
            Self::MsiX => f.write_str("MSI-X"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config-space access width
// ---------------------------------------------------------------------------

/// Width of a configuration-space access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWidth {
    /// 8-bit access.
    Byte,
    /// 16-bit access.
    Word,
    /// 32-bit access.
    Dword,
}

impl ConfigWidth {
    /// Returns the width in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Byte => 8,
            Self::Word => 16,
            Self::Dword => 32,
        }
    }

    /// Returns the width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u16 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Dword => 4,
        }
    }

    /// Returns the value mask for this width.
    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Dword => 0xFFFF_FFFF,
        }
    }

    /// Decodes a width given in bits.
    ///
    /// # Errors
    ///
    /// Returns [`Status::InvalidArgs`] unless `bits` is 8, 16, or 32.
    pub const fn from_bits(bits: u32) -> Result<Self, Status> {
        match bits {
            8 => Ok(Self::Byte),
            16 => Ok(Self::Word),
            32 => Ok(Self::Dword),
            _ => Err(Status::InvalidArgs),
        }
    }
}

// ---------------------------------------------------------------------------
// Standard header layout
// ---------------------------------------------------------------------------

/// Standard PCI configuration space register offsets.
pub mod regs {
    /// Vendor ID (16-bit, offset 0x00).
    pub const VENDOR_ID: u16 = 0x00;
    /// Device ID (16-bit, offset 0x02).
    pub const DEVICE_ID: u16 = 0x02;
    /// Command register (16-bit, offset 0x04).
    pub const COMMAND: u16 = 0x04;
    /// Status register (16-bit, offset 0x06).
    pub const STATUS: u16 = 0x06;
    /// Revision ID (8-bit, offset 0x08).
    pub const REVISION: u16 = 0x08;
    /// Programming Interface (8-bit, offset 0x09).
    pub const PROG_IF: u16 = 0x09;
    /// Subclass code (8-bit, offset 0x0A).
    pub const SUBCLASS: u16 = 0x0A;
    /// Class code (8-bit, offset 0x0B).
    pub const CLASS: u16 = 0x0B;
    /// Header type (8-bit, offset 0x0E). Bit 7 = multi-function.
    pub const HEADER_TYPE: u16 = 0x0E;
    /// Base Address Register 0 (32-bit, offset 0x10). BAR1-5 at +4 intervals.
    pub const BAR0: u16 = 0x10;
    /// Subsystem Vendor ID (16-bit, offset 0x2C).
    pub const SUBSYSTEM_VENDOR_ID: u16 = 0x2C;
    /// Subsystem Device ID (16-bit, offset 0x2E).
    pub const SUBSYSTEM_DEVICE_ID: u16 = 0x2E;
    /// Capabilities Pointer (8-bit, offset 0x34): pointer to first capability.
    pub const CAPABILITIES_PTR: u16 = 0x34;
    /// Interrupt Line (8-bit, offset 0x3C).
    pub const INTERRUPT_LINE: u16 = 0x3C;
    /// Interrupt Pin (8-bit, offset 0x3D).
    pub const INTERRUPT_PIN: u16 = 0x3D;

    // -- Command register bits ------------------------------------------------

    /// I/O Space enable.
    pub const COMMAND_IO_SPACE: u16 = 1 << 0;
    /// Memory Space enable.
    pub const COMMAND_MEMORY_SPACE: u16 = 1 << 1;
    /// Bus Master enable.
    pub const COMMAND_BUS_MASTER: u16 = 1 << 2;

    // -- Status register bits -------------------------------------------------

    /// Bit 4 of the Status register: capabilities list present.
    pub const STATUS_CAPABILITIES_LIST: u16 = 1 << 4;
}

/// PCI capability IDs.
pub mod cap_id {
    /// Power management.
    pub const POWER_MANAGEMENT: u8 = 0x01;
    /// Message Signaled Interrupts.
    pub const MSI: u8 = 0x05;
    /// Vendor-specific (used by VirtIO PCI).
    pub const VENDOR: u8 = 0x09;
    /// PCI Express.
    pub const PCI_EXPRESS: u8 = 0x10;
    /// MSI-X.
    pub const MSIX: u8 = 0x11;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_decoding() {
        for raw in 0..ResourceId::COUNT + 4 {
            let decoded = ResourceId::from_raw(raw);
            if raw < ResourceId::COUNT {
                assert_eq!(decoded.map(ResourceId::into_raw), Ok(raw));
            } else {
                assert_eq!(decoded, Err(Status::InvalidArgs));
            }
        }
        assert_eq!(ResourceId::from_raw(u32::MAX), Err(Status::InvalidArgs));
    }

    #[test]
    fn resource_id_kinds() {
        for raw in ResourceId::BAR_0..=ResourceId::BAR_5 {
            assert!(ResourceId::from_raw(raw).unwrap().is_bar());
        }
        assert_eq!(ResourceId::from_raw(6), Ok(ResourceId::Config));
        assert!(!ResourceId::Config.is_bar());
    }

    #[test]
    fn resource_accessors() {
        let mmio = PciResource::Mmio {
            base: 0xFEB0_0000,
            size: 0x1000,
            vmo: Handle::new(9),
        };
        assert_eq!(mmio.kind(), ResourceKind::Mmio);
        assert_eq!(mmio.vmo(), Some(Handle::new(9)));

        let pio = PciResource::Pio {
            base: 0xC000,
            size: 0x20,
        };
        assert_eq!(pio.kind(), ResourceKind::Pio);
        assert_eq!(pio.base(), 0xC000);
        assert_eq!(pio.size(), 0x20);
        assert_eq!(pio.vmo(), None);
    }

    #[test]
    fn config_width_helpers() {
        assert_eq!(ConfigWidth::from_bits(16), Ok(ConfigWidth::Word));
        assert_eq!(ConfigWidth::from_bits(24), Err(Status::InvalidArgs));
        assert_eq!(ConfigWidth::Byte.mask(), 0xFF);
        assert_eq!(ConfigWidth::Dword.bytes(), 4);
        assert_eq!(ConfigWidth::Word.bits(), 16);
    }

    #[test]
    fn raw_mode_and_policy() {
        assert_eq!(IrqMode::from_raw(3), Ok(IrqMode::MsiX));
        assert_eq!(IrqMode::from_raw(4), Err(Status::InvalidArgs));
        assert_eq!(CachePolicy::from_raw(1), Ok(CachePolicy::Uncached));
        assert_eq!(CachePolicy::from_raw(9), Err(Status::InvalidArgs));
    }

    #[test]
    fn address_display() {
        let addr = PciAddress {
            bus: 0,
            device: 0x1f,
            function: 3,
        };
        assert_eq!(format!("{addr}"), "00:1f.3");
    }
}
