//! PCI protocol contracts between bus-owning kernels and device drivers.
//!
//! This crate defines both sides of the protocol:
//!
//! - [`BusKernel`] -- what the protocol consumes from the kernel component
//!   that owns the bus (per-device PCI calls, virtual memory, handles).
//! - [`PciProtocol`] -- the fixed operation table a bound device exposes to
//!   its driver.
//!
//! plus the shared data model ([`ResourceId`], [`PciResource`], [`IrqMode`],
//! ...), the [`Status`] error taxonomy, and [`OwnedHandle`] for scoped
//! handle release.

#![cfg_attr(not(test), no_std)]

pub mod caps;
pub mod error;
pub mod handle;
pub mod kernel;
pub mod pci;
pub mod protocol;

// Re-export all public types at the crate root for ergonomic imports.
pub use caps::{CapabilityIter, RawCapability};
pub use error::Status;
pub use handle::OwnedHandle;
pub use kernel::{BusKernel, MapFlags};
pub use pci::{
    CachePolicy, ConfigWidth, IrqMode, PciAddress, PciDeviceInfo, PciResource, ResourceId,
    ResourceKind, cap_id, regs,
};
pub use protocol::{PciProtocol, ResourceMapping};
pub use tessera_core::Handle;
