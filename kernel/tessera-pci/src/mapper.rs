//! Mapping BARs and config space into the driver's address space.

use tessera_core::addr::page_align_up;
use tessera_core::{kdebug, kwarn};
use tessera_driver_api::{
    BusKernel, CachePolicy, MapFlags, OwnedHandle, PciResource, ResourceId, ResourceMapping, Status,
};

use crate::device::KpciDevice;

impl<K: BusKernel> KpciDevice<K> {
    pub(crate) fn map(
        &self,
        res_id: u32,
        cache_policy: CachePolicy,
    ) -> Result<ResourceMapping, Status> {
        let id = ResourceId::from_raw(res_id)?;
        let (size, vmo) = match self.resolve_resource(res_id)? {
            PciResource::Mmio { size, vmo, .. } => (size, OwnedHandle::new(&self.kernel, vmo)),
            PciResource::Pio { .. } => return Err(Status::WrongType),
        };

        let mut flags = MapFlags::PERM_READ | MapFlags::MAP_RANGE;
        if id.is_bar() {
            flags |= MapFlags::PERM_WRITE;
            if let Err(status) = self.kernel.vmo_set_cache_policy(vmo.get(), cache_policy) {
                kwarn!(
                    "pci {}: {}: setting cache policy {:?} failed: {}",
                    self.info.address,
                    id,
                    cache_policy,
                    status
                );
                return Err(status);
            }
        }

        let mapped_len =
            page_align_up(size, self.kernel.page_size()).ok_or(Status::OutOfRange)?;
        let vaddr = match self.kernel.vmar_map(vmo.get(), 0, mapped_len, flags) {
            Ok(vaddr) => vaddr,
            Err(status) => {
                kwarn!(
                    "pci {}: {}: mapping {:#x} bytes failed: {}",
                    self.info.address,
                    id,
                    mapped_len,
                    status
                );
                return Err(status);
            }
        };

        kdebug!(
            "pci {}: {} mapped at {:?} ({:#x} bytes, {:?})",
            self.info.address,
            id,
            vaddr,
            size,
            flags
        );
        Ok(ResourceMapping::new(vaddr, size, mapped_len, vmo.into_raw()))
    }

    pub(crate) fn unmap(&self, mapping: ResourceMapping) -> Result<(), Status> {
        let vmo = OwnedHandle::new(&self.kernel, mapping.vmo());
        self.kernel.vmar_unmap(mapping.vaddr(), mapping.mapped_len())?;
        kdebug!("pci {}: unmapped {:?}", self.info.address, mapping.vaddr());
        self.kernel.handle_close(vmo.into_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{CONFIG_SPACE_SIZE, SimBar, SimBus, SimDevice};
    use tessera_driver_api::PciProtocol;

    fn bus() -> SimBus {
        SimBus::new(
            SimDevice::new(0x8086, 0x100E)
                .with_bar(0, SimBar::Mmio { base: 0xFEBC_0000, size: 0x2_0000 })
                .with_bar(1, SimBar::Mmio { base: 0xFEBE_0000, size: 0x1800 })
                .with_bar(2, SimBar::Pio { base: 0xC000, size: 0x40 }),
        )
    }

    #[test]
    fn bar_is_mapped_read_write_with_policy() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        let mapping = dev.map_resource(0, CachePolicy::UncachedDevice).unwrap();

        assert_eq!(mapping.size(), 0x2_0000);
        assert_eq!(mapping.mapped_len(), 0x2_0000);
        assert_eq!(
            bus.mapping_flags(mapping.vaddr()),
            Some(MapFlags::PERM_READ | MapFlags::PERM_WRITE | MapFlags::MAP_RANGE)
        );
        assert_eq!(bus.cache_policy_of(mapping.vmo()), Some(CachePolicy::UncachedDevice));
        dev.unmap_resource(mapping).unwrap();
    }

    #[test]
    fn config_is_mapped_read_only_without_policy() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        let mapping = dev
            .map_resource(ResourceId::CONFIG, CachePolicy::WriteCombining)
            .unwrap();

        assert_eq!(mapping.size(), CONFIG_SPACE_SIZE);
        assert_eq!(
            bus.mapping_flags(mapping.vaddr()),
            Some(MapFlags::PERM_READ | MapFlags::MAP_RANGE)
        );
        assert_eq!(bus.cache_policy_of(mapping.vmo()), Some(CachePolicy::Uncached));
        dev.unmap_resource(mapping).unwrap();
    }

    #[test]
    fn odd_sized_bar_spans_whole_pages() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        let mapping = dev.map_resource(1, CachePolicy::Uncached).unwrap();

        assert_eq!(mapping.size(), 0x1800);
        assert_eq!(mapping.mapped_len(), 0x2000);
        assert!(mapping.mapped_len() >= mapping.size());
        assert!(mapping.vaddr().is_aligned(bus.page_size()));
        assert_eq!(bus.live_mappings(), [(mapping.vaddr(), 0x2000)]);
        dev.unmap_resource(mapping).unwrap();
    }

    #[test]
    fn unmap_leaves_nothing_behind() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();

        let first = dev.map_resource(0, CachePolicy::Uncached).unwrap();
        let keep = dev.map_resource(1, CachePolicy::Uncached).unwrap();
        dev.unmap_resource(first).unwrap();
        assert_eq!(bus.live_mappings().len(), 1);
        assert_eq!(bus.open_handles(), 2);

        // A later mapping never overlaps a live one.
        let again = dev.map_resource(0, CachePolicy::Uncached).unwrap();
        let (a, b) = (again.vaddr().as_u64(), keep.vaddr().as_u64());
        assert!(a + again.mapped_len() <= b || b + keep.mapped_len() <= a);

        dev.unmap_resource(again).unwrap();
        dev.unmap_resource(keep).unwrap();
        assert!(bus.live_mappings().is_empty());
        assert_eq!(bus.open_handles(), 1);
    }

    #[test]
    fn port_resource_is_wrong_type() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        assert_eq!(
            dev.map_resource(2, CachePolicy::Uncached),
            Err(Status::WrongType)
        );
        assert!(bus.live_mappings().is_empty());
        assert_eq!(bus.open_handles(), 1);
    }

    #[test]
    fn invalid_id_maps_nothing() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        assert_eq!(
            dev.map_resource(ResourceId::COUNT, CachePolicy::Uncached),
            Err(Status::InvalidArgs)
        );
        assert_eq!(dev.map_resource(3, CachePolicy::Uncached), Err(Status::NotFound));
        assert_eq!(bus.open_handles(), 1);
    }

    #[test]
    fn cache_policy_failure_rolls_back() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        bus.fail_next_cache_policy(Status::NotSupported);
        assert_eq!(
            dev.map_resource(0, CachePolicy::WriteCombining),
            Err(Status::NotSupported)
        );
        assert!(bus.live_mappings().is_empty());
        assert_eq!(bus.open_handles(), 1);
    }

    #[test]
    fn map_failure_rolls_back() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        bus.fail_next_map(Status::NoMemory);
        assert_eq!(
            dev.map_resource(ResourceId::CONFIG, CachePolicy::Uncached),
            Err(Status::NoMemory)
        );
        assert!(bus.live_mappings().is_empty());
        assert_eq!(bus.open_handles(), 1);
    }

    #[test]
    fn exhausted_address_space_rolls_back() {
        let bus = SimBus::new(
            SimDevice::new(0x8086, 0x100E)
                .with_bar(0, SimBar::Mmio { base: 0xE000_0000, size: 1 << 40 }),
        );
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        assert_eq!(dev.map_resource(0, CachePolicy::Uncached), Err(Status::NoMemory));
        assert_eq!(bus.open_handles(), 1);
    }

    #[test]
    fn unmap_closes_vmo_even_on_failure() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        let mapping = dev.map_resource(0, CachePolicy::Uncached).unwrap();
        let bogus = ResourceMapping::new(
            mapping.vaddr() + 0x10_0000,
            mapping.size(),
            mapping.mapped_len(),
            mapping.vmo(),
        );
        assert_eq!(dev.unmap_resource(bogus), Err(Status::NotFound));
        assert_eq!(bus.open_handles(), 1);
        assert_eq!(bus.live_mappings().len(), 1);
    }
}
