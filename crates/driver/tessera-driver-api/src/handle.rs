//! Scoped ownership of kernel handles.

use tessera_core::{Handle, kwarn};

use crate::kernel::BusKernel;

/// A kernel handle that is closed when dropped.
///
/// Multi-step operations wrap every handle they acquire in an `OwnedHandle`
/// so that each early return releases it exactly once. On success the handle
/// is passed on with [`into_raw`](Self::into_raw), which disarms the guard.
#[must_use = "dropping an OwnedHandle closes the handle"]
pub struct OwnedHandle<'k, K: BusKernel + ?Sized> {
    kernel: &'k K,
    handle: Handle,
}

impl<'k, K: BusKernel + ?Sized> OwnedHandle<'k, K> {
    /// Takes ownership of `handle`, closing it through `kernel` on drop.
    pub fn new(kernel: &'k K, handle: Handle) -> Self {
        Self { kernel, handle }
    }

    /// Returns the wrapped handle without giving up ownership.
    #[must_use]
    pub fn get(&self) -> Handle {
        self.handle
    }

    /// Releases ownership and returns the raw handle. The handle stays open.
    #[must_use]
    pub fn into_raw(self) -> Handle {
        let handle = self.handle;
        core::mem::forget(self);
        handle
    }
}

impl<K: BusKernel + ?Sized> Drop for OwnedHandle<'_, K> {
    fn drop(&mut self) {
        if !self.handle.is_valid() {
            return;
        }
        if let Err(status) = self.kernel.handle_close(self.handle) {
            kwarn!("closing {} failed: {}", self.handle, status);
        }
    }
}

impl<K: BusKernel + ?Sized> core::fmt::Debug for OwnedHandle<'_, K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("OwnedHandle").field(&self.handle).finish()
    }
}
