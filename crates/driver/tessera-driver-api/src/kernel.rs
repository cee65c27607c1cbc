//! Kernel contract consumed by the PCI protocol.
//!
//! [`BusKernel`] is everything the protocol needs from the bus-owning kernel
//! component: per-device PCI calls keyed by the device handle, the generic
//! virtual-memory and handle primitives, and the raw port-I/O grant. The
//! protocol never touches hardware directly.

use tessera_core::{Handle, VirtAddr, config};

use crate::error::Status;
use crate::pci::{CachePolicy, ConfigWidth, IrqMode, PciDeviceInfo, PciResource};

bitflags::bitflags! {
    /// Flags for [`BusKernel::vmar_map`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// Mapping is readable.
        const PERM_READ  = 1 << 0;
        /// Mapping is writable.
        const PERM_WRITE = 1 << 1;
        /// Commit the whole range up front instead of faulting it in.
        const MAP_RANGE  = 1 << 2;
    }
}

/// Services the bus-owning kernel provides to the PCI protocol.
///
/// Every fallible call reports failures as a [`Status`]. Handles returned by
/// the kernel (`vmo` handles inside [`PciResource::Mmio`], interrupt handles)
/// belong to the caller until passed to [`handle_close`](Self::handle_close).
pub trait BusKernel: Send + Sync {
    // -- Per-device PCI calls ------------------------------------------------

    /// Enables or disables bus mastering (DMA) for the device.
    fn pci_enable_bus_master(&self, device: Handle, enable: bool) -> Result<(), Status>;

    /// Enables or disables port-I/O decoding for the device.
    fn pci_enable_pio(&self, device: Handle, enable: bool) -> Result<(), Status>;

    /// Issues a function-level reset.
    fn pci_reset_device(&self, device: Handle) -> Result<(), Status>;

    /// Resolves BAR `index` (`0..=5`) to a fresh resource descriptor.
    fn pci_get_bar(&self, device: Handle, index: u32) -> Result<PciResource, Status>;

    /// Resolves the configuration space to a fresh resource descriptor.
    fn pci_get_config(&self, device: Handle) -> Result<PciResource, Status>;

    /// Reads a configuration register. The value is zero-extended.
    fn pci_config_read(&self, device: Handle, offset: u16, width: ConfigWidth)
    -> Result<u32, Status>;

    /// Writes a configuration register. Bits above `width` are ignored.
    fn pci_config_write(
        &self,
        device: Handle,
        offset: u16,
        width: ConfigWidth,
        value: u32,
    ) -> Result<(), Status>;

    /// Returns a waitable handle for interrupt `which_irq` of the active mode.
    fn pci_map_interrupt(&self, device: Handle, which_irq: u32) -> Result<Handle, Status>;

    /// Returns the maximum interrupt count for `mode`.
    fn pci_query_irq_mode_caps(&self, device: Handle, mode: IrqMode) -> Result<u32, Status>;

    /// Switches the interrupt mode, tearing down the previous configuration.
    fn pci_set_irq_mode(&self, device: Handle, mode: IrqMode, count: u32) -> Result<(), Status>;

    /// Returns the device identification snapshot.
    fn pci_get_device_info(&self, device: Handle) -> Result<PciDeviceInfo, Status>;

    // -- Virtual memory and handles ------------------------------------------

    /// Applies a cache policy to a memory object. Must precede any mapping.
    fn vmo_set_cache_policy(&self, vmo: Handle, policy: CachePolicy) -> Result<(), Status>;

    /// Maps `len` bytes of `vmo` starting at `offset` into the caller's
    /// address space. `len` must be a multiple of [`page_size`](Self::page_size).
    fn vmar_map(&self, vmo: Handle, offset: u64, len: u64, flags: MapFlags)
    -> Result<VirtAddr, Status>;

    /// Removes `len` bytes of mappings starting at `addr`.
    fn vmar_unmap(&self, addr: VirtAddr, len: u64) -> Result<(), Status>;

    /// Closes a handle. Closing an interrupt handle cancels pending waits.
    fn handle_close(&self, handle: Handle) -> Result<(), Status>;

    /// Grants the caller raw access to ports `[base, base + size)`.
    fn grant_port_io(&self, base: u64, size: u64) -> Result<(), Status>;

    // -- Interrupt objects ---------------------------------------------------

    /// Blocks until the interrupt fires. There is no timeout; closing the
    /// handle from another thread ends the wait with [`Status::Canceled`].
    fn interrupt_wait(&self, irq: Handle) -> Result<(), Status>;

    /// Re-arms an interrupt after a completed wait.
    fn interrupt_complete(&self, irq: Handle) -> Result<(), Status>;

    /// Page granularity of [`vmar_map`](Self::vmar_map). A power of two.
    fn page_size(&self) -> u64 {
        config::PAGE_SIZE
    }
}

impl<K: BusKernel + ?Sized> BusKernel for &K {
    fn pci_enable_bus_master(&self, device: Handle, enable: bool) -> Result<(), Status> {
        (**self).pci_enable_bus_master(device, enable)
    }

    fn pci_enable_pio(&self, device: Handle, enable: bool) -> Result<(), Status> {
        (**self).pci_enable_pio(device, enable)
    }

    fn pci_reset_device(&self, device: Handle) -> Result<(), Status> {
        (**self).pci_reset_device(device)
    }

    fn pci_get_bar(&self, device: Handle, index: u32) -> Result<PciResource, Status> {
        (**self).pci_get_bar(device, index)
    }

    fn pci_get_config(&self, device: Handle) -> Result<PciResource, Status> {
        (**self).pci_get_config(device)
    }

    fn pci_config_read(
        &self,
        device: Handle,
        offset: u16,
        width: ConfigWidth,
    ) -> Result<u32, Status> {
        (**self).pci_config_read(device, offset, width)
    }

    fn pci_config_write(
        &self,
        device: Handle,
        offset: u16,
        width: ConfigWidth,
        value: u32,
    ) -> Result<(), Status> {
        (**self).pci_config_write(device, offset, width, value)
    }

    fn pci_map_interrupt(&self, device: Handle, which_irq: u32) -> Result<Handle, Status> {
        (**self).pci_map_interrupt(device, which_irq)
    }

    fn pci_query_irq_mode_caps(&self, device: Handle, mode: IrqMode) -> Result<u32, Status> {
        (**self).pci_query_irq_mode_caps(device, mode)
    }

    fn pci_set_irq_mode(&self, device: Handle, mode: IrqMode, count: u32) -> Result<(), Status> {
        (**self).pci_set_irq_mode(device, mode, count)
    }

    fn pci_get_device_info(&self, device: Handle) -> Result<PciDeviceInfo, Status> {
        (**self).pci_get_device_info(device)
    }

    fn vmo_set_cache_policy(&self, vmo: Handle, policy: CachePolicy) -> Result<(), Status> {
        (**self).vmo_set_cache_policy(vmo, policy)
    }

    fn vmar_map(
        &self,
        vmo: Handle,
        offset: u64,
        len: u64,
        flags: MapFlags,
    ) -> Result<VirtAddr, Status> {
        (**self).vmar_map(vmo, offset, len, flags)
    }

    fn vmar_unmap(&self, addr: VirtAddr, len: u64) -> Result<(), Status> {
        (**self).vmar_unmap(addr, len)
    }

    fn handle_close(&self, handle: Handle) -> Result<(), Status> {
        (**self).handle_close(handle)
    }

    fn grant_port_io(&self, base: u64, size: u64) -> Result<(), Status> {
        (**self).grant_port_io(base, size)
    }

    fn interrupt_wait(&self, irq: Handle) -> Result<(), Status> {
        (**self).interrupt_wait(irq)
    }

    fn interrupt_complete(&self, irq: Handle) -> Result<(), Status> {
        (**self).interrupt_complete(irq)
    }

    fn page_size(&self) -> u64 {
        (**self).page_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_flags_distinct() {
        let all = [MapFlags::PERM_READ, MapFlags::PERM_WRITE, MapFlags::MAP_RANGE];
        for (i, a) in all.iter().enumerate() {
            for (j, b) in all.iter().enumerate() {
                if i != j {
                    assert!((*a & *b).is_empty(), "{a:?} and {b:?} share bits");
                }
            }
        }
    }

    #[test]
    fn map_flags_combination() {
        let flags = MapFlags::PERM_READ | MapFlags::MAP_RANGE;
        assert!(flags.contains(MapFlags::PERM_READ));
        assert!(!flags.contains(MapFlags::PERM_WRITE));
    }
}
