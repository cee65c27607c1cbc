//! Kernel-mediated PCI protocol implementation.
//!
//! [`KpciDevice`] is the single [`PciProtocol`] implementation: it binds one
//! PCI function's kernel handle and serves every protocol operation by
//! calling into a [`BusKernel`]. The pieces are split by concern:
//!
//! - [`resource`] -- resource id resolution and port-I/O bookkeeping.
//! - [`mapper`] -- page-granular mapping of BARs and config space.
//! - [`config`] -- config-space reads and writes.
//! - [`caps`] -- bounded capability-list walking and capability parsing.
//! - [`irq`] -- interrupt mode negotiation and interrupt handles.
//!
//! With the `sim` feature (always on for this crate's own tests), [`sim`]
//! provides a simulated bus kernel for host-side testing.
//!
//! [`PciProtocol`]: tessera_driver_api::PciProtocol
//! [`BusKernel`]: tessera_driver_api::BusKernel

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

#[cfg(all(feature = "sim", not(test)))]
extern crate std;

pub mod caps;
pub mod config;
pub mod device;
pub mod irq;
pub mod mapper;
pub mod resource;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use caps::{CapabilityIter, MsiCapability, MsixCapability, RawCapability};
pub use device::KpciDevice;
