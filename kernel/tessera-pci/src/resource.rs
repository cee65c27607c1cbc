//! Resource id resolution.
//!
//! Maps the abstract resource ids (BARs `0..=5`, config space `6`) to fresh
//! descriptors from the kernel. Nothing is cached: every call goes back to
//! the kernel and hands the caller a new `vmo` for memory resources.

use tessera_core::kdebug;
use tessera_driver_api::{BusKernel, PciResource, ResourceId, Status};

use crate::device::KpciDevice;

/// Whether raw port access must be granted before a port window is usable.
const PORT_IO_GATED: bool = cfg!(target_arch = "x86_64");

impl<K: BusKernel> KpciDevice<K> {
    pub(crate) fn resolve_resource(&self, res_id: u32) -> Result<PciResource, Status> {
        let id = ResourceId::from_raw(res_id)?;
        let resource = match id {
            ResourceId::Bar(index) => self.kernel.pci_get_bar(self.handle, u32::from(index))?,
            ResourceId::Config => self.kernel.pci_get_config(self.handle)?,
        };
        self.resource_bookkeeping(id, &resource)?;
        Ok(resource)
    }

    /// Only port windows need bookkeeping, and they carry no handle, so a
    /// failure here has nothing to release.
    fn resource_bookkeeping(&self, id: ResourceId, resource: &PciResource) -> Result<(), Status> {
        match *resource {
            PciResource::Pio { base, size } if PORT_IO_GATED => {
                kdebug!(
                    "pci {}: {}: granting ports {:#x}..{:#x}",
                    self.info.address,
                    id,
                    base,
                    base.saturating_add(size)
                );
                self.kernel.grant_port_io(base, size)
            }
            _ => Ok(()),
        }
    }
}
