//! Bound PCI function and its protocol operation table.

use tessera_core::{Handle, kdebug, kinfo, kwarn};
use tessera_driver_api::{
    BusKernel, CachePolicy, ConfigWidth, IrqMode, OwnedHandle, PciDeviceInfo, PciProtocol,
    PciResource, ResourceMapping, Status,
};

use crate::caps;

/// A PCI function bound to its driver.
///
/// Owns the device handle for the bound lifetime and serves every
/// [`PciProtocol`] operation by delegating to the kernel. No operation takes
/// a lock: the driver is the single logical owner and serializes calls whose
/// ordering matters.
pub struct KpciDevice<K: BusKernel> {
    pub(crate) kernel: K,
    pub(crate) handle: Handle,
    pub(crate) info: PciDeviceInfo,
}

impl<K: BusKernel> KpciDevice<K> {
    /// Binds the function named by `handle`, taking ownership of the handle
    /// and capturing the device info snapshot.
    ///
    /// # Errors
    ///
    /// [`Status::BadHandle`] for the invalid handle; otherwise the kernel's
    /// failure to report device info, in which case `handle` is closed.
    pub fn bind(kernel: K, handle: Handle) -> Result<Self, Status> {
        if !handle.is_valid() {
            return Err(Status::BadHandle);
        }

        let (handle, info) = {
            let guard = OwnedHandle::new(&kernel, handle);
            let info = kernel.pci_get_device_info(guard.get())?;
            (guard.into_raw(), info)
        };

        kinfo!(
            "pci {}: bound {:04x}:{:04x} class {:02x}.{:02x}",
            info.address,
            info.vendor_id,
            info.device_id,
            info.class,
            info.subclass
        );

        Ok(Self {
            kernel,
            handle,
            info,
        })
    }

    /// Releases the device handle. Every later operation fails with
    /// [`Status::BadHandle`] (or is fatal for config access). Calling it
    /// again is a no-op.
    ///
    /// # Errors
    ///
    /// Passes through the kernel's failure to close the handle; the device
    /// is unbound regardless.
    pub fn unbind(&mut self) -> Result<(), Status> {
        let handle = core::mem::replace(&mut self.handle, Handle::INVALID);
        if !handle.is_valid() {
            return Ok(());
        }
        kdebug!("pci {}: unbinding", self.info.address);
        self.kernel.handle_close(handle)
    }

    /// Returns the device handle, or [`Handle::INVALID`] once unbound.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Returns `true` until [`unbind`](Self::unbind) is called.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.handle.is_valid()
    }

    /// Returns the kernel this device talks to.
    #[must_use]
    pub fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<K: BusKernel> Drop for KpciDevice<K> {
    fn drop(&mut self) {
        if let Err(status) = self.unbind() {
            kwarn!("pci {}: closing device handle failed: {}", self.info.address, status);
        }
    }
}

impl<K: BusKernel> PciProtocol for KpciDevice<K> {
    fn enable_bus_master(&self, enable: bool) -> Result<(), Status> {
        self.kernel.pci_enable_bus_master(self.handle, enable)
    }

    fn enable_pio(&self, enable: bool) -> Result<(), Status> {
        self.kernel.pci_enable_pio(self.handle, enable)
    }

    fn reset_device(&self) -> Result<(), Status> {
        self.kernel.pci_reset_device(self.handle)
    }

    fn get_resource(&self, res_id: u32) -> Result<PciResource, Status> {
        self.resolve_resource(res_id)
    }

    fn map_resource(
        &self,
        res_id: u32,
        cache_policy: CachePolicy,
    ) -> Result<ResourceMapping, Status> {
        self.map(res_id, cache_policy)
    }

    fn unmap_resource(&self, mapping: ResourceMapping) -> Result<(), Status> {
        self.unmap(mapping)
    }

    fn map_interrupt(&self, which_irq: u32) -> Result<Handle, Status> {
        self.interrupt(which_irq)
    }

    fn query_irq_mode_caps(&self, mode: IrqMode) -> Result<u32, Status> {
        self.irq_mode_caps(mode)
    }

    fn set_irq_mode(&self, mode: IrqMode, requested_count: u32) -> Result<(), Status> {
        self.switch_irq_mode(mode, requested_count)
    }

    fn get_device_info(&self) -> PciDeviceInfo {
        self.info
    }

    fn config_read(&self, offset: u16, width: ConfigWidth) -> u32 {
        self.read_config(offset, width)
    }

    fn config_write(&self, offset: u16, width: ConfigWidth, value: u32) {
        self.write_config(offset, width, value);
    }

    fn get_next_capability(&self, offset: u8, cap_type: u8) -> Option<u8> {
        caps::find_capability(self, offset, cap_type)
    }
}
