//! Core types, logging, and build configuration for the Tessera PCI protocol.
//!
//! This crate holds the host-testable pieces shared by every other crate in
//! the workspace: kernel handle and address newtypes, the leveled logging
//! macros, compile-time configuration, and the [`static_assert!`] macro.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod addr;
pub mod config;
pub mod id;
pub mod log;
pub mod static_assert;

pub use addr::VirtAddr;
pub use id::Handle;
pub use log::LogLevel;
