//! The PCI protocol operation table handed to device drivers.

use tessera_core::{Handle, VirtAddr};

use crate::caps::CapabilityIter;
use crate::error::Status;
use crate::pci::{CachePolicy, ConfigWidth, IrqMode, PciDeviceInfo, PciResource, regs};

/// A BAR or configuration space mapped into the driver's address space.
///
/// The driver owns both the virtual range and the backing memory object and
/// must release them explicitly with [`PciProtocol::unmap_resource`].
/// Dropping a `ResourceMapping` does not unmap anything.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a ResourceMapping must be released with unmap_resource"]
pub struct ResourceMapping {
    vaddr: VirtAddr,
    size: u64,
    mapped_len: u64,
    vmo: Handle,
}

impl ResourceMapping {
    /// Creates a mapping record. Used by protocol implementations.
    pub const fn new(vaddr: VirtAddr, size: u64, mapped_len: u64, vmo: Handle) -> Self {
        Self {
            vaddr,
            size,
            mapped_len,
            vmo,
        }
    }

    /// Start of the mapping.
    #[must_use]
    pub const fn vaddr(&self) -> VirtAddr {
        self.vaddr
    }

    /// Size of the underlying resource in bytes.
    ///
    /// This is the resource's own size, not the extent of the mapping; use
    /// [`mapped_len`](Self::mapped_len) for the latter.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Length of the virtual mapping, rounded up to the page granularity.
    #[must_use]
    pub const fn mapped_len(&self) -> u64 {
        self.mapped_len
    }

    /// Memory object backing the mapping.
    #[must_use]
    pub const fn vmo(&self) -> Handle {
        self.vmo
    }
}

/// Operations a bound PCI function exposes to its driver.
///
/// One implementation exists per host environment and is instantiated once
/// per bound device. The table is object safe so drivers can hold a
/// `&dyn PciProtocol`.
pub trait PciProtocol {
    /// Enables or disables bus mastering. Idempotent.
    ///
    /// # Errors
    ///
    /// Passes through kernel failures.
    fn enable_bus_master(&self, enable: bool) -> Result<(), Status>;

    /// Enables or disables port-I/O decoding. Idempotent.
    ///
    /// # Errors
    ///
    /// Passes through kernel failures.
    fn enable_pio(&self, enable: bool) -> Result<(), Status>;

    /// Issues a function-level reset.
    ///
    /// # Errors
    ///
    /// Passes through kernel failures.
    fn reset_device(&self) -> Result<(), Status>;

    /// Resolves a raw resource id (see [`ResourceId`](crate::pci::ResourceId))
    /// to a fresh descriptor, performing port-I/O bookkeeping where the
    /// platform requires it. The caller owns any `vmo` in the result.
    ///
    /// # Errors
    ///
    /// [`Status::InvalidArgs`] if `res_id >= ResourceId::COUNT`; otherwise
    /// kernel or bookkeeping failures.
    fn get_resource(&self, res_id: u32) -> Result<PciResource, Status>;

    /// Maps a BAR (read/write, with `cache_policy`) or the configuration
    /// space (read-only, policy ignored) into the driver's address space.
    ///
    /// # Errors
    ///
    /// [`Status::WrongType`] for port-I/O resources; anything from
    /// [`get_resource`](Self::get_resource); kernel failures while applying
    /// the policy or mapping. No handle or mapping survives an error.
    fn map_resource(&self, res_id: u32, cache_policy: CachePolicy)
    -> Result<ResourceMapping, Status>;

    /// Unmaps a mapping and closes its memory object.
    ///
    /// # Errors
    ///
    /// Passes through the first kernel failure. The memory object is closed
    /// even if unmapping fails.
    fn unmap_resource(&self, mapping: ResourceMapping) -> Result<(), Status>;

    /// Returns a waitable handle for interrupt `which_irq`. The caller owns
    /// the handle and must close it.
    ///
    /// # Errors
    ///
    /// [`Status::BadHandle`] once the device is unbound; otherwise kernel
    /// failures. No handle is produced on error.
    fn map_interrupt(&self, which_irq: u32) -> Result<Handle, Status>;

    /// Returns the maximum number of interrupts available in `mode`.
    ///
    /// # Errors
    ///
    /// [`Status::NotSupported`] if the device cannot use `mode`.
    fn query_irq_mode_caps(&self, mode: IrqMode) -> Result<u32, Status>;

    /// Switches the interrupt mode, tearing down the previous configuration.
    ///
    /// # Errors
    ///
    /// [`Status::InvalidArgs`] if `requested_count` exceeds the device's
    /// maximum for `mode` (the active mode is left unchanged); errors from
    /// [`query_irq_mode_caps`](Self::query_irq_mode_caps) and the kernel.
    fn set_irq_mode(&self, mode: IrqMode, requested_count: u32) -> Result<(), Status>;

    /// Returns the identification snapshot taken at bind time.
    fn get_device_info(&self) -> PciDeviceInfo;

    /// Reads a configuration register, zero-extended to 32 bits.
    ///
    /// # Panics
    ///
    /// A failed read means the hardware or the bus is broken; it is not
    /// recoverable and panics.
    fn config_read(&self, offset: u16, width: ConfigWidth) -> u32;

    /// Writes a configuration register.
    ///
    /// # Panics
    ///
    /// Same contract as [`config_read`](Self::config_read).
    fn config_write(&self, offset: u16, width: ConfigWidth, value: u32);

    /// Walks the capability list from `offset` and returns the offset of the
    /// first capability whose id is `cap_type`.
    ///
    /// Returns `None` when the list ends or the walk bound is exhausted; the
    /// two cases are deliberately indistinguishable.
    fn get_next_capability(&self, offset: u8, cap_type: u8) -> Option<u8>;

    // -- Provided helpers ----------------------------------------------------

    /// Reads an 8-bit configuration register.
    fn config_read8(&self, offset: u16) -> u8 {
        (self.config_read(offset, ConfigWidth::Byte) & ConfigWidth::Byte.mask()) as u8
    }

    /// Reads a 16-bit configuration register.
    fn config_read16(&self, offset: u16) -> u16 {
        (self.config_read(offset, ConfigWidth::Word) & ConfigWidth::Word.mask()) as u16
    }

    /// Reads a 32-bit configuration register.
    fn config_read32(&self, offset: u16) -> u32 {
        self.config_read(offset, ConfigWidth::Dword)
    }

    /// Writes an 8-bit configuration register.
    fn config_write8(&self, offset: u16, value: u8) {
        self.config_write(offset, ConfigWidth::Byte, u32::from(value));
    }

    /// Writes a 16-bit configuration register.
    fn config_write16(&self, offset: u16, value: u16) {
        self.config_write(offset, ConfigWidth::Word, u32::from(value));
    }

    /// Writes a 32-bit configuration register.
    fn config_write32(&self, offset: u16, value: u32) {
        self.config_write(offset, ConfigWidth::Dword, value);
    }

    /// Finds the first capability of `cap_type`, starting from the
    /// capabilities pointer in the standard header.
    fn get_first_capability(&self, cap_type: u8) -> Option<u8> {
        let first = self.config_read8(regs::CAPABILITIES_PTR);
        self.get_next_capability(first, cap_type)
    }

    /// Iterates the capability records starting at `offset`, bounded like
    /// [`get_next_capability`](Self::get_next_capability).
    fn capabilities_from(&self, offset: u8) -> CapabilityIter<'_, Self>
    where
        Self: Sized,
    {
        CapabilityIter::new(self, offset)
    }

    /// Iterates every capability record reachable from the capabilities
    /// pointer. Use [`CapabilityIter::from_header`] on a trait object.
    fn capabilities(&self) -> CapabilityIter<'_, Self>
    where
        Self: Sized,
    {
        CapabilityIter::from_header(self)
    }
}
