//! Configuration-space access.
//!
//! Config reads and writes go through the kernel channel. A failed access
//! means the device or the bus is gone and there is nothing a driver could
//! do about it, so it is logged as fatal and the caller panics.

use tessera_core::{kfatal, ktrace};
use tessera_driver_api::{BusKernel, ConfigWidth, PciAddress, Status};

use crate::device::KpciDevice;

#[cold]
#[inline(never)]
fn config_access_failed(
    address: PciAddress,
    op: &str,
    offset: u16,
    width: ConfigWidth,
    status: Status,
) -> ! {
    kfatal!(
        "pci {}: config {} of {} bits at {:#05x} failed: {}",
        address,
        op,
        width.bits(),
        offset,
        status
    );
    panic!("pci config {op} at {offset:#05x} failed: {status}");
}

impl<K: BusKernel> KpciDevice<K> {
    pub(crate) fn read_config(&self, offset: u16, width: ConfigWidth) -> u32 {
        match self.kernel.pci_config_read(self.handle, offset, width) {
            Ok(value) => value & width.mask(),
            Err(status) => config_access_failed(self.info.address, "read", offset, width, status),
        }
    }

    pub(crate) fn write_config(&self, offset: u16, width: ConfigWidth, value: u32) {
        ktrace!(
            "pci {}: config write {:#05x} <- {:#x}",
            self.info.address,
            offset,
            value & width.mask()
        );
        if let Err(status) =
            self.kernel
                .pci_config_write(self.handle, offset, width, value & width.mask())
        {
            config_access_failed(self.info.address, "write", offset, width, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimDevice};
    use tessera_driver_api::{PciProtocol, regs};

    fn bus() -> SimBus {
        SimBus::new(
            SimDevice::new(0x10EC, 0x8139)
                .with_class(0x02, 0x00, 0x00)
                .with_config_bytes(0x40, &0xDEAD_BEEFu32.to_le_bytes()),
        )
    }

    #[test]
    fn reads_standard_header() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        assert_eq!(dev.config_read16(regs::VENDOR_ID), 0x10EC);
        assert_eq!(dev.config_read16(regs::DEVICE_ID), 0x8139);
        assert_eq!(dev.config_read8(regs::CLASS), 0x02);
        assert_eq!(dev.config_read32(regs::VENDOR_ID), 0x8139_10EC);
    }

    #[test]
    fn widths_are_zero_extended() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        assert_eq!(dev.config_read(0x40, ConfigWidth::Byte), 0xEF);
        assert_eq!(dev.config_read(0x40, ConfigWidth::Word), 0xBEEF);
        assert_eq!(dev.config_read(0x40, ConfigWidth::Dword), 0xDEAD_BEEF);
        assert_eq!(dev.config_read8(0x43), 0xDE);
    }

    #[test]
    fn writes_truncate_to_width() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        dev.config_write(0x40, ConfigWidth::Byte, 0x1234_5678);
        assert_eq!(dev.config_read32(0x40), 0xDEAD_BE78);
        dev.config_write16(0x42, 0xCAFE);
        assert_eq!(dev.config_read32(0x40), 0xCAFE_BE78);
        dev.config_write32(0x40, 0);
        assert_eq!(dev.config_read32(0x40), 0);
    }

    #[test]
    #[should_panic(expected = "pci config read")]
    fn read_past_config_space_is_fatal() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        let _ = dev.config_read32(0x1000);
    }

    #[test]
    #[should_panic(expected = "pci config write")]
    fn write_after_unbind_is_fatal() {
        let bus = bus();
        let mut dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        dev.unbind().unwrap();
        dev.config_write8(0x40, 1);
    }
}
