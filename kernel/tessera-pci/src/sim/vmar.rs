//! Virtual address allocation for the simulated address space.
//!
//! Sorted free list with coalescing on a fixed-capacity [`ArrayVec`], plus a
//! bump watermark that retracts when the tail is freed.

use core::fmt;

use planck_noalloc::vec::ArrayVec;
use tessera_core::VirtAddr;
use tessera_driver_api::Status;

/// A contiguous free virtual address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRange {
    base: u64,
    size: u64,
}

/// Page-granular allocator over `[base, base + size)`.
pub(crate) struct Vmar<const N: usize> {
    base: u64,
    end: u64,
    page_size: u64,
    /// Free ranges, sorted by base address. Adjacent ranges are always coalesced.
    free_list: ArrayVec<FreeRange, N>,
    watermark: u64,
}

impl<const N: usize> Vmar<N> {
    pub(crate) fn new(base: u64, size: u64, page_size: u64) -> Self {
        debug_assert!(page_size.is_power_of_two());
        debug_assert!(base % page_size == 0 && size % page_size == 0);
        Self {
            base,
            end: base + size,
            page_size,
            free_list: ArrayVec::new(),
            watermark: base,
        }
    }

    /// First-fit from the free list, then from the watermark. `len` must be a
    /// non-zero multiple of the page size.
    pub(crate) fn allocate(&mut self, len: u64) -> Result<VirtAddr, Status> {
        if len == 0 || len % self.page_size != 0 {
            return Err(Status::InvalidArgs);
        }

        for i in 0..self.free_list.len() {
            let entry = self.free_list[i];
            if entry.size >= len {
                if entry.size == len {
                    self.free_list.remove(i);
                } else {
                    self.free_list[i] = FreeRange {
                        base: entry.base + len,
                        size: entry.size - len,
                    };
                }
                return Ok(VirtAddr::new(entry.base));
            }
        }

        match self.watermark.checked_add(len) {
            Some(end) if end <= self.end => {
                let base = self.watermark;
                self.watermark = end;
                Ok(VirtAddr::new(base))
            }
            _ => Err(Status::NoMemory),
        }
    }

    /// Returns `[addr, addr + len)` to the allocator. The range must have
    /// been handed out by [`allocate`](Self::allocate) with the same length.
    pub(crate) fn deallocate(&mut self, addr: VirtAddr, len: u64) -> Result<(), Status> {
        let base = addr.as_u64();
        let range_end = base + len;
        debug_assert!(base >= self.base && range_end <= self.watermark);

        if range_end == self.watermark {
            self.watermark = base;
            self.retract_watermark();
            return Ok(());
        }

        let idx = match self
            .free_list
            .as_slice()
            .binary_search_by_key(&base, |r| r.base)
        {
            Ok(_) => return Err(Status::BadState),
            Err(i) => i,
        };

        let merge_prev = idx > 0 && {
            let prev = self.free_list[idx - 1];
            prev.base + prev.size == base
        };
        let merge_next = idx < self.free_list.len() && self.free_list[idx].base == range_end;

        match (merge_prev, merge_next) {
            (true, true) => {
                let succ = self.free_list.remove(idx);
                self.free_list[idx - 1].size += len + succ.size;
            }
            (true, false) => self.free_list[idx - 1].size += len,
            (false, true) => {
                self.free_list[idx].base = base;
                self.free_list[idx].size += len;
            }
            (false, false) => {
                if self.free_list.is_full() {
                    return Err(Status::NoMemory);
                }
                self.free_list.insert(idx, FreeRange { base, size: len });
            }
        }

        self.retract_watermark();
        Ok(())
    }

    /// Bytes between the region base and the watermark.
    #[cfg(test)]
    pub(crate) fn watermark_used(&self) -> u64 {
        self.watermark - self.base
    }

    fn retract_watermark(&mut self) {
        while let Some(last) = self.free_list.last() {
            if last.base + last.size != self.watermark {
                break;
            }
            self.watermark = last.base;
            let _ = self.free_list.pop();
        }
    }
}

impl<const N: usize> fmt::Debug for Vmar<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vmar")
            .field("base", &format_args!("{:#x}", self.base))
            .field("end", &format_args!("{:#x}", self.end))
            .field("watermark", &format_args!("{:#x}", self.watermark))
            .field("free_ranges", &self.free_list.as_slice())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: u64 = 0x1000;

    fn vmar() -> Vmar<4> {
        Vmar::new(0x10_0000, 0x10 * PAGE, PAGE)
    }

    #[test]
    fn rejects_unaligned_lengths() {
        let mut v = vmar();
        assert_eq!(v.allocate(0), Err(Status::InvalidArgs));
        assert_eq!(v.allocate(PAGE + 1), Err(Status::InvalidArgs));
    }

    #[test]
    fn bump_then_exhaust() {
        let mut v = vmar();
        assert_eq!(v.allocate(8 * PAGE).unwrap().as_u64(), 0x10_0000);
        assert_eq!(v.allocate(8 * PAGE).unwrap().as_u64(), 0x10_8000);
        assert_eq!(v.allocate(PAGE), Err(Status::NoMemory));
    }

    #[test]
    fn tail_free_retracts_watermark() {
        let mut v = vmar();
        let a = v.allocate(PAGE).unwrap();
        let b = v.allocate(2 * PAGE).unwrap();
        v.deallocate(b, 2 * PAGE).unwrap();
        assert_eq!(v.watermark_used(), PAGE);
        v.deallocate(a, PAGE).unwrap();
        assert_eq!(v.watermark_used(), 0);
    }

    #[test]
    fn freed_hole_is_reused_first_fit() {
        let mut v = vmar();
        let a = v.allocate(2 * PAGE).unwrap();
        let _b = v.allocate(PAGE).unwrap();
        v.deallocate(a, 2 * PAGE).unwrap();
        assert_eq!(v.allocate(PAGE).unwrap(), a);
        assert_eq!(v.allocate(PAGE).unwrap(), a + PAGE);
        assert_eq!(v.watermark_used(), 3 * PAGE);
    }

    #[test]
    fn neighbours_coalesce_and_retract() {
        let mut v = vmar();
        let a = v.allocate(PAGE).unwrap();
        let b = v.allocate(PAGE).unwrap();
        let c = v.allocate(PAGE).unwrap();
        let _d = v.allocate(PAGE).unwrap();
        v.deallocate(a, PAGE).unwrap();
        v.deallocate(c, PAGE).unwrap();
        v.deallocate(b, PAGE).unwrap();
        // a..c is one hole of three pages.
        assert_eq!(v.allocate(3 * PAGE).unwrap(), a);
    }

    #[test]
    fn full_free_list_reports_no_memory() {
        let mut v: Vmar<1> = Vmar::new(0x10_0000, 0x10 * PAGE, PAGE);
        let a = v.allocate(PAGE).unwrap();
        let _ = v.allocate(PAGE).unwrap();
        let c = v.allocate(PAGE).unwrap();
        let _ = v.allocate(PAGE).unwrap();
        v.deallocate(a, PAGE).unwrap();
        assert_eq!(v.deallocate(c, PAGE), Err(Status::NoMemory));
    }
}
