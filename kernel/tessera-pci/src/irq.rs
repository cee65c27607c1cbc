//! Interrupt mode negotiation and interrupt handles.
//!
//! Modes are mutually exclusive and switching tears down the previous mode's
//! configuration in the kernel. Requested counts are checked against the
//! device's reported maximum before the kernel is asked to switch, so an
//! invalid request leaves the active mode alone.

use tessera_core::{Handle, kdebug};
use tessera_driver_api::{BusKernel, IrqMode, Status};

use crate::device::KpciDevice;

impl<K: BusKernel> KpciDevice<K> {
    pub(crate) fn irq_mode_caps(&self, mode: IrqMode) -> Result<u32, Status> {
        self.kernel.pci_query_irq_mode_caps(self.handle, mode)
    }

    pub(crate) fn switch_irq_mode(&self, mode: IrqMode, requested_count: u32) -> Result<(), Status> {
        match mode {
            IrqMode::Disabled if requested_count != 0 => return Err(Status::InvalidArgs),
            IrqMode::Disabled => {}
            _ if requested_count == 0 => return Err(Status::InvalidArgs),
            _ => {
                let max = self.irq_mode_caps(mode)?;
                if requested_count > max {
                    kdebug!(
                        "pci {}: {} interrupts requested in {} mode, device supports {}",
                        self.info.address,
                        requested_count,
                        mode,
                        max
                    );
                    return Err(Status::InvalidArgs);
                }
            }
        }

        self.kernel
            .pci_set_irq_mode(self.handle, mode, requested_count)?;
        kdebug!(
            "pci {}: irq mode {} with {} interrupt(s)",
            self.info.address,
            mode,
            requested_count
        );
        Ok(())
    }

    pub(crate) fn interrupt(&self, which_irq: u32) -> Result<Handle, Status> {
        if !self.handle.is_valid() {
            return Err(Status::BadHandle);
        }
        self.kernel.pci_map_interrupt(self.handle, which_irq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimDevice};
    use tessera_driver_api::PciProtocol;

    fn bus() -> SimBus {
        SimBus::new(
            SimDevice::new(0x8086, 0x10D3)
                .with_irq_caps(IrqMode::Legacy, 1)
                .with_irq_caps(IrqMode::Msi, 4),
        )
    }

    #[test]
    fn query_reports_device_maximum() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        assert_eq!(dev.query_irq_mode_caps(IrqMode::Legacy), Ok(1));
        assert_eq!(dev.query_irq_mode_caps(IrqMode::Msi), Ok(4));
        assert_eq!(dev.query_irq_mode_caps(IrqMode::MsiX), Err(Status::NotSupported));
    }

    #[test]
    fn set_within_maximum() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        dev.set_irq_mode(IrqMode::Msi, 4).unwrap();
        assert_eq!(bus.irq_mode(), (IrqMode::Msi, 4));
        dev.set_irq_mode(IrqMode::Disabled, 0).unwrap();
        assert_eq!(bus.irq_mode(), (IrqMode::Disabled, 0));
    }

    #[test]
    fn over_maximum_leaves_mode_unchanged() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        dev.set_irq_mode(IrqMode::Legacy, 1).unwrap();

        assert_eq!(dev.set_irq_mode(IrqMode::Msi, 5), Err(Status::InvalidArgs));
        assert_eq!(bus.irq_mode(), (IrqMode::Legacy, 1));
        assert_eq!(bus.irq_mode_switches(), 1);
    }

    #[test]
    fn bad_counts_are_rejected() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        assert_eq!(dev.set_irq_mode(IrqMode::Msi, 0), Err(Status::InvalidArgs));
        assert_eq!(dev.set_irq_mode(IrqMode::Disabled, 1), Err(Status::InvalidArgs));
        assert_eq!(dev.set_irq_mode(IrqMode::MsiX, 1), Err(Status::NotSupported));
        assert_eq!(bus.irq_mode_switches(), 0);
    }

    #[test]
    fn interrupt_fires_and_rearms() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        dev.set_irq_mode(IrqMode::Msi, 2).unwrap();
        let irq = dev.map_interrupt(1).unwrap();

        bus.trigger_interrupt(1);
        bus.interrupt_wait(irq).unwrap();
        // Not re-armed yet.
        assert_eq!(bus.interrupt_wait(irq), Err(Status::BadState));
        bus.interrupt_complete(irq).unwrap();

        bus.trigger_interrupt(1);
        bus.interrupt_wait(irq).unwrap();
        bus.handle_close(irq).unwrap();
    }

    #[test]
    fn map_interrupt_outside_active_mode_fails() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        assert_eq!(dev.map_interrupt(0), Err(Status::BadState));
        dev.set_irq_mode(IrqMode::Msi, 2).unwrap();
        assert_eq!(dev.map_interrupt(2), Err(Status::InvalidArgs));
        assert_eq!(bus.open_handles(), 1);
    }

    #[test]
    fn map_interrupt_after_unbind_is_bad_handle() {
        let bus = bus();
        let mut dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        dev.set_irq_mode(IrqMode::Legacy, 1).unwrap();
        dev.unbind().unwrap();
        assert_eq!(dev.map_interrupt(0), Err(Status::BadHandle));
    }

    #[test]
    fn mode_switch_invalidates_old_interrupts() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        dev.set_irq_mode(IrqMode::Legacy, 1).unwrap();
        let irq = dev.map_interrupt(0).unwrap();
        dev.set_irq_mode(IrqMode::Msi, 1).unwrap();
        assert_eq!(bus.interrupt_wait(irq), Err(Status::BadHandle));
        bus.handle_close(irq).unwrap();
    }

    #[test]
    fn closing_handle_cancels_wait() {
        let bus = bus();
        let dev = KpciDevice::bind(&bus, bus.device_handle()).unwrap();
        dev.set_irq_mode(IrqMode::Legacy, 1).unwrap();
        let irq = dev.map_interrupt(0).unwrap();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| bus.interrupt_wait(irq));
            while bus.waiters(irq) == 0 {
                std::thread::yield_now();
            }
            bus.handle_close(irq).unwrap();
            assert_eq!(waiter.join().unwrap(), Err(Status::Canceled));
        });
        assert_eq!(bus.open_handles(), 1);
    }
}
