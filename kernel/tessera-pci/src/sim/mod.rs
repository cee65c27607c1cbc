//! Simulated bus kernel for host-side tests.
//!
//! [`SimBus`] implements [`BusKernel`] for a single PCI function described by
//! a [`SimDevice`]. It keeps a handle table, a page-granular address space,
//! a 4 KiB config-space image, and interrupt objects that can be triggered
//! from the test. Faults can be injected into individual kernel calls, and
//! the kernel-side state can be inspected to check that operations leave no
//! handles or mappings behind.

mod vmar;

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::vec::Vec;

use tessera_core::addr::page_align_up;
use tessera_core::{Handle, VirtAddr, kdebug};
use tessera_driver_api::{
    BusKernel, CachePolicy, ConfigWidth, IrqMode, MapFlags, PciAddress, PciDeviceInfo,
    PciResource, Status, regs,
};

use self::vmar::Vmar;

/// Size of the simulated configuration space (PCI Express extended).
pub const CONFIG_SPACE_SIZE: u64 = 4096;

/// Physical base of the simulated config window.
const CONFIG_PHYS_BASE: u64 = 0xE000_0000;

/// Simulated address space: 1 GiB starting at 256 GiB.
const VMAR_BASE: u64 = 0x40_0000_0000;
const VMAR_SIZE: u64 = 0x4000_0000;
const VMAR_FREE_LIST_CAP: usize = 64;

// ---------------------------------------------------------------------------
// Device description
// ---------------------------------------------------------------------------

/// A simulated BAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimBar {
    /// Memory BAR.
    Mmio {
        /// Physical base.
        base: u64,
        /// Size in bytes.
        size: u64,
    },
    /// I/O port BAR.
    Pio {
        /// First port.
        base: u64,
        /// Number of ports.
        size: u64,
    },
}

/// Builder for the PCI function behind a [`SimBus`].
#[derive(Debug, Clone)]
pub struct SimDevice {
    address: PciAddress,
    config: Vec<u8>,
    bars: [Option<SimBar>; 6],
    irq_caps: BTreeMap<IrqMode, u32>,
}

impl SimDevice {
    /// Creates a function with the given ids and an otherwise empty header.
    #[must_use]
    pub fn new(vendor_id: u16, device_id: u16) -> Self {
        let mut dev = Self {
            address: PciAddress::default(),
            config: std::vec![0; CONFIG_SPACE_SIZE as usize],
            bars: [None; 6],
            irq_caps: BTreeMap::new(),
        };
        dev.put(regs::VENDOR_ID, &vendor_id.to_le_bytes());
        dev.put(regs::DEVICE_ID, &device_id.to_le_bytes());
        dev
    }

    fn put(&mut self, offset: u16, bytes: &[u8]) {
        let start = usize::from(offset);
        self.config[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Sets the bus/device/function address.
    #[must_use]
    pub fn with_address(mut self, bus: u8, device: u8, function: u8) -> Self {
        self.address = PciAddress {
            bus,
            device,
            function,
        };
        self
    }

    /// Sets the class code triple.
    #[must_use]
    pub fn with_class(mut self, class: u8, subclass: u8, prog_if: u8) -> Self {
        self.put(regs::PROG_IF, &[prog_if, subclass, class]);
        self
    }

    /// Sets the revision id.
    #[must_use]
    pub fn with_revision(mut self, revision: u8) -> Self {
        self.put(regs::REVISION, &[revision]);
        self
    }

    /// Sets the subsystem ids.
    #[must_use]
    pub fn with_subsystem(mut self, vendor_id: u16, device_id: u16) -> Self {
        self.put(regs::SUBSYSTEM_VENDOR_ID, &vendor_id.to_le_bytes());
        self.put(regs::SUBSYSTEM_DEVICE_ID, &device_id.to_le_bytes());
        self
    }

    /// Installs BAR `index` and writes its base into the header.
    ///
    /// # Panics
    ///
    /// If `index > 5`.
    #[must_use]
    pub fn with_bar(mut self, index: usize, bar: SimBar) -> Self {
        let reg = regs::BAR0 + 4 * index as u16;
        let raw = match bar {
            SimBar::Mmio { base, .. } => (base as u32) & !0xF,
            SimBar::Pio { base, .. } => ((base as u32) & !0x3) | 0x1,
        };
        self.bars[index] = Some(bar);
        self.put(reg, &raw.to_le_bytes());
        self
    }

    /// Declares that the function supports `mode` with up to `max`
    /// interrupts. Undeclared modes report [`Status::NotSupported`].
    #[must_use]
    pub fn with_irq_caps(mut self, mode: IrqMode, max: u32) -> Self {
        self.irq_caps.insert(mode, max);
        self
    }

    /// Points the header's capabilities pointer at `offset` and sets the
    /// capabilities-list status bit.
    #[must_use]
    pub fn with_capabilities_ptr(mut self, offset: u8) -> Self {
        self.put(regs::CAPABILITIES_PTR, &[offset]);
        let status = u16::from_le_bytes([self.config[6], self.config[7]])
            | regs::STATUS_CAPABILITIES_LIST;
        self.put(regs::STATUS, &status.to_le_bytes());
        self
    }

    /// Writes a capability record `{id, next}` at `offset`.
    #[must_use]
    pub fn with_capability(mut self, offset: u8, id: u8, next: u8) -> Self {
        self.put(u16::from(offset), &[id, next]);
        self
    }

    /// Writes raw bytes into the config image.
    ///
    /// # Panics
    ///
    /// If the bytes do not fit in config space.
    #[must_use]
    pub fn with_config_bytes(mut self, offset: u16, bytes: &[u8]) -> Self {
        self.put(offset, bytes);
        self
    }
}

// ---------------------------------------------------------------------------
// Kernel state
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Object {
    Device,
    Vmo {
        size: u64,
        policy: CachePolicy,
        mappings: usize,
    },
    Interrupt {
        index: u32,
        /// Fired and not yet consumed by a wait.
        pending: bool,
        /// Cleared by a completed wait until re-armed.
        armed: bool,
        /// The mode it belonged to has been torn down.
        stale: bool,
        waiters: usize,
    },
}

#[derive(Debug)]
struct Mapping {
    len: u64,
    flags: MapFlags,
    vmo: Handle,
}

#[derive(Debug, Default)]
struct Faults {
    device_info: Option<Status>,
    cache_policy: Option<Status>,
    map: Option<Status>,
    port_grant: Option<Status>,
}

#[derive(Debug)]
struct State {
    device: SimDevice,
    device_handle: Handle,
    next_handle: u32,
    objects: BTreeMap<Handle, Object>,
    vmar: Vmar<VMAR_FREE_LIST_CAP>,
    mappings: BTreeMap<VirtAddr, Mapping>,
    irq_mode: (IrqMode, u32),
    irq_mode_switches: usize,
    port_grants: Vec<(u64, u64)>,
    config_reads: usize,
    resets: usize,
    faults: Faults,
}

impl State {
    fn insert(&mut self, object: Object) -> Handle {
        self.next_handle += 1;
        let handle = Handle::new(self.next_handle);
        self.objects.insert(handle, object);
        handle
    }

    fn check_device(&self, device: Handle) -> Result<(), Status> {
        match self.objects.get(&device) {
            Some(Object::Device) if device == self.device_handle => Ok(()),
            Some(_) => Err(Status::WrongType),
            None => Err(Status::BadHandle),
        }
    }

    fn command(&self) -> u16 {
        u16::from_le_bytes([self.device.config[4], self.device.config[5]])
    }

    fn set_command_bit(&mut self, bit: u16, enable: bool) {
        let command = if enable {
            self.command() | bit
        } else {
            self.command() & !bit
        };
        self.device.put(regs::COMMAND, &command.to_le_bytes());
    }

    fn read_u8(&self, offset: u16) -> u8 {
        self.device.config[usize::from(offset)]
    }

    fn read_u16(&self, offset: u16) -> u16 {
        let at = usize::from(offset);
        u16::from_le_bytes([self.device.config[at], self.device.config[at + 1]])
    }

    fn device_info(&self) -> PciDeviceInfo {
        PciDeviceInfo {
            address: self.device.address,
            vendor_id: self.read_u16(regs::VENDOR_ID),
            device_id: self.read_u16(regs::DEVICE_ID),
            revision: self.read_u8(regs::REVISION),
            class: self.read_u8(regs::CLASS),
            subclass: self.read_u8(regs::SUBCLASS),
            prog_if: self.read_u8(regs::PROG_IF),
            subsystem_vendor_id: self.read_u16(regs::SUBSYSTEM_VENDOR_ID),
            subsystem_device_id: self.read_u16(regs::SUBSYSTEM_DEVICE_ID),
        }
    }

    fn new_vmo(&mut self, base: u64, size: u64) -> PciResource {
        let vmo = self.insert(Object::Vmo {
            size,
            policy: CachePolicy::Uncached,
            mappings: 0,
        });
        PciResource::Mmio { base, size, vmo }
    }

    fn vmo_mut(&mut self, vmo: Handle) -> Result<(&mut u64, &mut CachePolicy, &mut usize), Status> {
        match self.objects.get_mut(&vmo) {
            Some(Object::Vmo {
                size,
                policy,
                mappings,
            }) => Ok((size, policy, mappings)),
            Some(_) => Err(Status::WrongType),
            None => Err(Status::BadHandle),
        }
    }

    /// Tears down the active interrupt configuration.
    fn retire_interrupts(&mut self) {
        for object in self.objects.values_mut() {
            if let Object::Interrupt { stale, .. } = object {
                *stale = true;
            }
        }
    }
}

/// A simulated bus kernel owning one PCI function.
///
/// Safe to share between threads; interrupt waits block on a condition
/// variable until the interrupt is triggered, its mode is torn down, or its
/// handle is closed.
#[derive(Debug)]
pub struct SimBus {
    state: Mutex<State>,
    irq_event: Condvar,
}

impl SimBus {
    /// Creates a bus with `device` attached and a device handle open for it.
    #[must_use]
    pub fn new(device: SimDevice) -> Self {
        let mut state = State {
            device,
            device_handle: Handle::INVALID,
            next_handle: 0,
            objects: BTreeMap::new(),
            vmar: Vmar::new(VMAR_BASE, VMAR_SIZE, tessera_core::config::PAGE_SIZE),
            mappings: BTreeMap::new(),
            irq_mode: (IrqMode::Disabled, 0),
            irq_mode_switches: 0,
            port_grants: Vec::new(),
            config_reads: 0,
            resets: 0,
            faults: Faults::default(),
        };
        state.device_handle = state.insert(Object::Device);
        Self {
            state: Mutex::new(state),
            irq_event: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- Test controls -------------------------------------------------------

    /// Handle naming the simulated function, to pass to
    /// [`KpciDevice::bind`](crate::KpciDevice::bind).
    #[must_use]
    pub fn device_handle(&self) -> Handle {
        self.lock().device_handle
    }

    /// Fires interrupt `index` of the active mode.
    pub fn trigger_interrupt(&self, index: u32) {
        let mut state = self.lock();
        for object in state.objects.values_mut() {
            if let Object::Interrupt {
                index: i,
                pending,
                stale: false,
                ..
            } = object
            {
                if *i == index {
                    *pending = true;
                }
            }
        }
        drop(state);
        self.irq_event.notify_all();
    }

    /// Makes the next `pci_get_device_info` fail with `status`.
    pub fn fail_next_device_info(&self, status: Status) {
        self.lock().faults.device_info = Some(status);
    }

    /// Makes the next `vmo_set_cache_policy` fail with `status`.
    pub fn fail_next_cache_policy(&self, status: Status) {
        self.lock().faults.cache_policy = Some(status);
    }

    /// Makes the next `vmar_map` fail with `status`.
    pub fn fail_next_map(&self, status: Status) {
        self.lock().faults.map = Some(status);
    }

    /// Makes the next `grant_port_io` fail with `status`.
    pub fn fail_next_port_grant(&self, status: Status) {
        self.lock().faults.port_grant = Some(status);
    }

    // -- Inspection ----------------------------------------------------------

    /// Number of open handles of any kind, including the device handle.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.lock().objects.len()
    }

    /// Live mappings as `(address, length)`, in address order.
    #[must_use]
    pub fn live_mappings(&self) -> Vec<(VirtAddr, u64)> {
        self.lock()
            .mappings
            .iter()
            .map(|(addr, m)| (*addr, m.len))
            .collect()
    }

    /// Flags of the mapping starting at `addr`.
    #[must_use]
    pub fn mapping_flags(&self, addr: VirtAddr) -> Option<MapFlags> {
        self.lock().mappings.get(&addr).map(|m| m.flags)
    }

    /// Memory object backing the mapping starting at `addr`.
    #[must_use]
    pub fn mapping_vmo(&self, addr: VirtAddr) -> Option<Handle> {
        self.lock().mappings.get(&addr).map(|m| m.vmo)
    }

    /// Cache policy of an open memory object.
    #[must_use]
    pub fn cache_policy_of(&self, vmo: Handle) -> Option<CachePolicy> {
        match self.lock().objects.get(&vmo) {
            Some(Object::Vmo { policy, .. }) => Some(*policy),
            _ => None,
        }
    }

    /// Whether the command register has bus mastering enabled.
    #[must_use]
    pub fn bus_master_enabled(&self) -> bool {
        self.lock().command() & regs::COMMAND_BUS_MASTER != 0
    }

    /// Whether the command register has I/O space decoding enabled.
    #[must_use]
    pub fn pio_enabled(&self) -> bool {
        self.lock().command() & regs::COMMAND_IO_SPACE != 0
    }

    /// Active interrupt mode and count.
    #[must_use]
    pub fn irq_mode(&self) -> (IrqMode, u32) {
        self.lock().irq_mode
    }

    /// Number of successful interrupt mode switches.
    #[must_use]
    pub fn irq_mode_switches(&self) -> usize {
        self.lock().irq_mode_switches
    }

    /// Port ranges granted so far, as `(base, size)`.
    #[must_use]
    pub fn port_grants(&self) -> Vec<(u64, u64)> {
        self.lock().port_grants.clone()
    }

    /// Number of config-space reads served.
    #[must_use]
    pub fn config_reads(&self) -> usize {
        self.lock().config_reads
    }

    /// Number of function-level resets issued.
    #[must_use]
    pub fn reset_count(&self) -> usize {
        self.lock().resets
    }

    /// Number of threads blocked waiting on `irq`.
    #[must_use]
    pub fn waiters(&self, irq: Handle) -> usize {
        match self.lock().objects.get(&irq) {
            Some(Object::Interrupt { waiters, .. }) => *waiters,
            _ => 0,
        }
    }
}

impl BusKernel for SimBus {
    fn pci_enable_bus_master(&self, device: Handle, enable: bool) -> Result<(), Status> {
        let mut state = self.lock();
        state.check_device(device)?;
        state.set_command_bit(regs::COMMAND_BUS_MASTER, enable);
        Ok(())
    }

    fn pci_enable_pio(&self, device: Handle, enable: bool) -> Result<(), Status> {
        let mut state = self.lock();
        state.check_device(device)?;
        state.set_command_bit(regs::COMMAND_IO_SPACE, enable);
        Ok(())
    }

    fn pci_reset_device(&self, device: Handle) -> Result<(), Status> {
        let mut state = self.lock();
        state.check_device(device)?;
        state.resets += 1;
        state.device.put(regs::COMMAND, &[0, 0]);
        if state.irq_mode.0 != IrqMode::Disabled {
            state.irq_mode = (IrqMode::Disabled, 0);
            state.retire_interrupts();
            drop(state);
            self.irq_event.notify_all();
        }
        Ok(())
    }

    fn pci_get_bar(&self, device: Handle, index: u32) -> Result<PciResource, Status> {
        let mut state = self.lock();
        state.check_device(device)?;
        let bar = usize::try_from(index)
            .ok()
            .and_then(|i| state.device.bars.get(i).copied())
            .ok_or(Status::InvalidArgs)?;
        match bar.ok_or(Status::NotFound)? {
            SimBar::Mmio { base, size } => Ok(state.new_vmo(base, size)),
            SimBar::Pio { base, size } => Ok(PciResource::Pio { base, size }),
        }
    }

    fn pci_get_config(&self, device: Handle) -> Result<PciResource, Status> {
        let mut state = self.lock();
        state.check_device(device)?;
        Ok(state.new_vmo(CONFIG_PHYS_BASE, CONFIG_SPACE_SIZE))
    }

    fn pci_config_read(
        &self,
        device: Handle,
        offset: u16,
        width: ConfigWidth,
    ) -> Result<u32, Status> {
        let mut state = self.lock();
        state.check_device(device)?;
        let start = usize::from(offset);
        let end = start + usize::from(width.bytes());
        let bytes = state
            .device
            .config
            .get(start..end)
            .ok_or(Status::OutOfRange)?;
        let value = bytes
            .iter()
            .rev()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
        state.config_reads += 1;
        Ok(value)
    }

    fn pci_config_write(
        &self,
        device: Handle,
        offset: u16,
        width: ConfigWidth,
        value: u32,
    ) -> Result<(), Status> {
        let mut state = self.lock();
        state.check_device(device)?;
        let start = usize::from(offset);
        let end = start + usize::from(width.bytes());
        let bytes = state
            .device
            .config
            .get_mut(start..end)
            .ok_or(Status::OutOfRange)?;
        bytes.copy_from_slice(&value.to_le_bytes()[..usize::from(width.bytes())]);
        Ok(())
    }

    fn pci_map_interrupt(&self, device: Handle, which_irq: u32) -> Result<Handle, Status> {
        let mut state = self.lock();
        state.check_device(device)?;
        match state.irq_mode {
            (IrqMode::Disabled, _) => Err(Status::BadState),
            (_, count) if which_irq >= count => Err(Status::InvalidArgs),
            _ => Ok(state.insert(Object::Interrupt {
                index: which_irq,
                pending: false,
                armed: true,
                stale: false,
                waiters: 0,
            })),
        }
    }

    fn pci_query_irq_mode_caps(&self, device: Handle, mode: IrqMode) -> Result<u32, Status> {
        let state = self.lock();
        state.check_device(device)?;
        match mode {
            IrqMode::Disabled => Ok(0),
            _ => state
                .device
                .irq_caps
                .get(&mode)
                .copied()
                .ok_or(Status::NotSupported),
        }
    }

    fn pci_set_irq_mode(&self, device: Handle, mode: IrqMode, count: u32) -> Result<(), Status> {
        let mut state = self.lock();
        state.check_device(device)?;
        if mode != IrqMode::Disabled {
            let max = state
                .device
                .irq_caps
                .get(&mode)
                .copied()
                .ok_or(Status::NotSupported)?;
            if count == 0 || count > max {
                return Err(Status::InvalidArgs);
            }
        }
        state.retire_interrupts();
        state.irq_mode = (mode, count);
        state.irq_mode_switches += 1;
        drop(state);
        self.irq_event.notify_all();
        kdebug!("sim: irq mode now {} x{}", mode, count);
        Ok(())
    }

    fn pci_get_device_info(&self, device: Handle) -> Result<PciDeviceInfo, Status> {
        let mut state = self.lock();
        state.check_device(device)?;
        if let Some(status) = state.faults.device_info.take() {
            return Err(status);
        }
        Ok(state.device_info())
    }

    fn vmo_set_cache_policy(&self, vmo: Handle, policy: CachePolicy) -> Result<(), Status> {
        let mut state = self.lock();
        if let Some(status) = state.faults.cache_policy.take() {
            return Err(status);
        }
        let (_, current, mappings) = state.vmo_mut(vmo)?;
        if *mappings != 0 {
            return Err(Status::BadState);
        }
        *current = policy;
        Ok(())
    }

    fn vmar_map(
        &self,
        vmo: Handle,
        offset: u64,
        len: u64,
        flags: MapFlags,
    ) -> Result<VirtAddr, Status> {
        let mut state = self.lock();
        if let Some(status) = state.faults.map.take() {
            return Err(status);
        }
        let page_size = self.page_size();
        let (size, _, _) = state.vmo_mut(vmo)?;
        let extent = page_align_up(*size, page_size).ok_or(Status::OutOfRange)?;
        if offset % page_size != 0 || offset.checked_add(len).is_none_or(|end| end > extent) {
            return Err(Status::OutOfRange);
        }

        let vaddr = state.vmar.allocate(len)?;
        let (_, _, mappings) = state.vmo_mut(vmo)?;
        *mappings += 1;
        state.mappings.insert(vaddr, Mapping { len, flags, vmo });
        Ok(vaddr)
    }

    fn vmar_unmap(&self, addr: VirtAddr, len: u64) -> Result<(), Status> {
        let mut state = self.lock();
        match state.mappings.get(&addr) {
            Some(m) if m.len == len => {}
            Some(_) => return Err(Status::InvalidArgs),
            None => return Err(Status::NotFound),
        }
        state.vmar.deallocate(addr, len)?;
        if let Some(mapping) = state.mappings.remove(&addr) {
            // The vmo handle may already be closed; the mapping outlives it.
            if let Ok((_, _, mappings)) = state.vmo_mut(mapping.vmo) {
                *mappings -= 1;
            }
        }
        Ok(())
    }

    fn handle_close(&self, handle: Handle) -> Result<(), Status> {
        let mut state = self.lock();
        let object = state.objects.remove(&handle).ok_or(Status::BadHandle)?;
        drop(state);
        if matches!(object, Object::Interrupt { .. }) {
            self.irq_event.notify_all();
        }
        Ok(())
    }

    fn grant_port_io(&self, base: u64, size: u64) -> Result<(), Status> {
        let mut state = self.lock();
        if let Some(status) = state.faults.port_grant.take() {
            return Err(status);
        }
        if base.checked_add(size).is_none_or(|end| end > 0x1_0000) {
            return Err(Status::OutOfRange);
        }
        state.port_grants.push((base, size));
        Ok(())
    }

    fn interrupt_wait(&self, irq: Handle) -> Result<(), Status> {
        let mut state = self.lock();
        match state.objects.get_mut(&irq) {
            Some(Object::Interrupt { stale: true, .. }) => return Err(Status::BadHandle),
            Some(Object::Interrupt { armed: false, .. }) => return Err(Status::BadState),
            Some(Object::Interrupt { waiters, .. }) => *waiters += 1,
            Some(_) => return Err(Status::WrongType),
            None => return Err(Status::BadHandle),
        }

        loop {
            match state.objects.get_mut(&irq) {
                None => return Err(Status::Canceled),
                Some(Object::Interrupt {
                    stale: true,
                    waiters,
                    ..
                }) => {
                    *waiters -= 1;
                    return Err(Status::BadHandle);
                }
                Some(Object::Interrupt {
                    pending,
                    armed,
                    waiters,
                    ..
                }) if *pending => {
                    *pending = false;
                    *armed = false;
                    *waiters -= 1;
                    return Ok(());
                }
                Some(_) => {}
            }
            state = self
                .irq_event
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn interrupt_complete(&self, irq: Handle) -> Result<(), Status> {
        let mut state = self.lock();
        match state.objects.get_mut(&irq) {
            Some(Object::Interrupt { stale: true, .. }) | None => Err(Status::BadHandle),
            Some(Object::Interrupt { armed, .. }) => {
                *armed = true;
                Ok(())
            }
            Some(_) => Err(Status::WrongType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> SimBus {
        SimBus::new(
            SimDevice::new(0x1234, 0x5678)
                .with_address(0, 3, 1)
                .with_class(0x01, 0x06, 0x01)
                .with_revision(2)
                .with_subsystem(0x1AF4, 0x1100)
                .with_bar(5, SimBar::Mmio { base: 0xFEBF_1000, size: 0x1000 }),
        )
    }

    #[test]
    fn header_reflects_builder() {
        let bus = bus();
        let info = bus.pci_get_device_info(bus.device_handle()).unwrap();
        assert_eq!(info.address.to_string(), "00:03.1");
        assert_eq!((info.vendor_id, info.device_id), (0x1234, 0x5678));
        assert_eq!((info.class, info.subclass, info.prog_if), (0x01, 0x06, 0x01));
        assert_eq!(info.revision, 2);
        assert_eq!(info.subsystem_vendor_id, 0x1AF4);

        let bar5 = bus
            .pci_config_read(bus.device_handle(), regs::BAR0 + 20, ConfigWidth::Dword)
            .unwrap();
        assert_eq!(bar5, 0xFEBF_1000);
    }

    #[test]
    fn stale_and_foreign_handles() {
        let bus = bus();
        assert_eq!(
            bus.pci_enable_pio(Handle::new(99), true),
            Err(Status::BadHandle)
        );
        let PciResource::Mmio { vmo, .. } = bus.pci_get_bar(bus.device_handle(), 5).unwrap()
        else {
            panic!("BAR 5 is memory");
        };
        assert_eq!(bus.pci_reset_device(vmo), Err(Status::WrongType));
        assert_eq!(bus.pci_get_bar(bus.device_handle(), 6), Err(Status::InvalidArgs));
        bus.handle_close(vmo).unwrap();
        assert_eq!(bus.handle_close(vmo), Err(Status::BadHandle));
    }

    #[test]
    fn policy_cannot_change_while_mapped() {
        let bus = bus();
        let PciResource::Mmio { vmo, .. } = bus.pci_get_bar(bus.device_handle(), 5).unwrap()
        else {
            panic!("BAR 5 is memory");
        };
        let flags = MapFlags::PERM_READ;
        let addr = bus.vmar_map(vmo, 0, 0x1000, flags).unwrap();
        assert_eq!(
            bus.vmo_set_cache_policy(vmo, CachePolicy::Cached),
            Err(Status::BadState)
        );
        assert_eq!(bus.vmar_map(vmo, 0, 0x2000, flags), Err(Status::OutOfRange));
        assert_eq!(bus.vmar_unmap(addr, 0x2000), Err(Status::InvalidArgs));
        bus.vmar_unmap(addr, 0x1000).unwrap();
        bus.vmo_set_cache_policy(vmo, CachePolicy::Cached).unwrap();
        bus.handle_close(vmo).unwrap();
    }

    #[test]
    fn mappings_outlive_their_vmo_handle() {
        let bus = bus();
        let PciResource::Mmio { vmo, .. } = bus.pci_get_bar(bus.device_handle(), 5).unwrap()
        else {
            panic!("BAR 5 is memory");
        };
        let addr = bus.vmar_map(vmo, 0, 0x1000, MapFlags::PERM_READ).unwrap();
        bus.handle_close(vmo).unwrap();
        assert_eq!(bus.mapping_vmo(addr), Some(vmo));
        bus.vmar_unmap(addr, 0x1000).unwrap();
        assert!(bus.live_mappings().is_empty());
    }

    #[test]
    fn port_grants_are_bounded() {
        let bus = bus();
        assert_eq!(bus.grant_port_io(0xFFF0, 0x20), Err(Status::OutOfRange));
        bus.grant_port_io(0xCF8, 8).unwrap();
        assert_eq!(bus.port_grants(), [(0xCF8, 8)]);
    }

    #[test]
    fn reset_tears_down_interrupts() {
        let bus = SimBus::new(SimDevice::new(1, 2).with_irq_caps(IrqMode::Legacy, 1));
        let dev = bus.device_handle();
        bus.pci_set_irq_mode(dev, IrqMode::Legacy, 1).unwrap();
        let irq = bus.pci_map_interrupt(dev, 0).unwrap();
        bus.pci_reset_device(dev).unwrap();
        assert_eq!(bus.irq_mode(), (IrqMode::Disabled, 0));
        assert_eq!(bus.interrupt_wait(irq), Err(Status::BadHandle));
        assert_eq!(bus.interrupt_complete(irq), Err(Status::BadHandle));
        bus.handle_close(irq).unwrap();
    }
}
