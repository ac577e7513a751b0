//! Global bootstrap heap.
//!
//! Grounded on the teacher's `mm/heap.rs`: a lazily-initialized, `static`
//! `UnsafeCell<Option<_>>` wrapping the real allocator, with `init()`
//! required before any allocation and every accessor tolerating the
//! not-yet-initialized state by returning `None`/`0` rather than
//! panicking (there is no panic machinery to unwind into this early in
//! boot). The backing allocator here is `FreeListAllocator` rather than
//! the teacher's bare `BumpAllocator`, since this core needs variable-size
//! allocation for page-table-adjacent bookkeeping, not just whole pages.

use super::freelist::FreeListAllocator;
use super::region::Region;
use crate::platform::{HEAP_SIZE, HEAP_START};
use core::cell::UnsafeCell;

struct GlobalHeap {
    allocator: UnsafeCell<Option<FreeListAllocator>>,
}

unsafe impl Sync for GlobalHeap {}

static HEAP: GlobalHeap = GlobalHeap {
    allocator: UnsafeCell::new(None),
};

/// Initializes the global heap over `[HEAP_START, HEAP_START+HEAP_SIZE)`.
///
/// # Safety
/// Must be called exactly once, before any other function in this module,
/// and `[HEAP_START, HEAP_START+HEAP_SIZE)` must be memory owned
/// exclusively by the hypervisor for the remainder of its uptime.
pub unsafe fn init() {
    let region = unsafe { Region::new(HEAP_START, HEAP_START + HEAP_SIZE) };
    let mut alloc = FreeListAllocator::new();
    alloc.init(region);
    unsafe {
        *HEAP.allocator.get() = Some(alloc);
    }
}

/// Allocates at least `nbytes` from the global heap. Returns `None` if
/// `init()` hasn't run yet or the heap is exhausted.
pub fn malloc(nbytes: u64) -> Option<u64> {
    unsafe { (*HEAP.allocator.get()).as_mut().and_then(|a| a.malloc(nbytes)) }
}

/// Returns a block previously obtained from [`malloc`] to the heap.
///
/// # Safety
/// `addr` must have come from `malloc` on this heap and not already be
/// freed.
pub unsafe fn free(addr: u64) {
    unsafe {
        if let Some(a) = (*HEAP.allocator.get()).as_mut() {
            a.free(addr);
        }
    }
}
