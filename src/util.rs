use crate::sync::AtomicI32;

/// Allocates a zeroed array of `len` cells.
///
/// An `AtomicI32` is a plain `i32` in memory and the all-zero pattern is
/// the valid empty state for every cell, so the array can come straight
/// from the zeroing allocator without per-cell stores.
#[cfg(not(loom))]
pub(crate) fn zeroed_cells(len: usize) -> Box<[AtomicI32]> {
    use std::alloc::{alloc_zeroed, handle_alloc_error, Layout};

    // We unwrap here because an invalid layout is a bug, not a recoverable
    // condition.
    let layout = Layout::array::<AtomicI32>(len).unwrap();
    unsafe {
        let ptr = alloc_zeroed(layout) as *mut AtomicI32;
        if ptr.is_null() {
            handle_alloc_error(layout);
        }
        Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len))
    }
}

/// Loom's atomics carry model-tracking state and cannot be materialized
/// from zeroed memory, so model runs build the array cell by cell.
#[cfg(loom)]
pub(crate) fn zeroed_cells(len: usize) -> Box<[AtomicI32]> {
    (0..len).map(|_| AtomicI32::new(0)).collect()
}
