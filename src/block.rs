//! Combined allocation: one block holding the managed region and its hub.
//!
//! ## Layout
//!
//! ```text
//! ┌───────────────────────────────┬─────────┐
//! │ T  (or [T; len])              │   Hub   │
//! └───────────────────────────────┴─────────┘
//! base                            base + hub_offset
//! ```
//!
//! The object region comes first, the hub is co-located behind it, and a
//! single aligned allocation covers both. The hub's dealloc strategy frees
//! the whole block, so the hub's own storage lives exactly as long as the
//! last observer of the allocation.
//!
//! These constructors are the only way a hub ever ends up embedded in a
//! managed block; callers go through `Shared` / `SharedArray`.

use std::alloc::{self, Layout};
use std::mem;
use std::ptr::{self, NonNull};

use tracing::trace;

use crate::error::AllocError;
use crate::hub::Hub;
use crate::stats;

/// Compute the combined block layout and the hub's byte offset within it.
pub(crate) fn combined_layout<T>(len: usize) -> Result<(Layout, usize), AllocError> {
    let overflow = || AllocError::Layout {
        elements: len,
        type_name: std::any::type_name::<T>(),
    };
    let region = Layout::array::<T>(len).map_err(|_| overflow())?;
    let (layout, hub_offset) = region.extend(Layout::new::<Hub>()).map_err(|_| overflow())?;
    Ok((layout.pad_to_align(), hub_offset))
}

fn alloc_block(layout: Layout) -> Result<NonNull<u8>, AllocError> {
    // The layout always includes a `Hub`, so its size is nonzero.
    let ptr = unsafe { alloc::alloc(layout) };
    NonNull::new(ptr).ok_or(AllocError::Exhausted {
        size: layout.size(),
        align: layout.align(),
    })
}

/// Allocate a combined block for a single object and construct both the
/// object and its hub in place. Returns the managed and hub pointers with
/// the strong count at 1.
pub(crate) fn try_new_single<T>(value: T) -> Result<(NonNull<T>, NonNull<Hub>), AllocError> {
    let (layout, hub_offset) = combined_layout::<T>(1)?;
    let base = alloc_block(layout)?;
    unsafe {
        let managed = base.as_ptr().cast::<T>();
        // Moving the already-constructed value in cannot fail, so no
        // unwind handling is needed on this path.
        ptr::write(managed, value);
        let hub = base.as_ptr().add(hub_offset).cast::<Hub>();
        ptr::write(
            hub,
            Hub::new(
                managed.cast(),
                base.as_ptr(),
                1,
                destroy_in_place::<T>,
                dealloc_combined::<T>,
            ),
        );
        stats::record_hub_allocated(true);
        trace!(bytes = layout.size(), "allocated combined block");
        Ok((NonNull::new_unchecked(managed), NonNull::new_unchecked(hub)))
    }
}

/// Allocate a combined block for `len` elements and construct each with
/// `init(index)`, then construct the hub in place.
///
/// If `init` panics after building a prefix, the constructed elements are
/// destroyed in reverse order and the block is freed before the panic
/// propagates; no hub exists for a partially built array.
pub(crate) fn try_new_array<T>(
    len: usize,
    mut init: impl FnMut(usize) -> T,
) -> Result<(NonNull<T>, NonNull<Hub>), AllocError> {
    let (layout, hub_offset) = combined_layout::<T>(len)?;
    let base = alloc_block(layout)?;
    let elems = base.as_ptr().cast::<T>();

    struct InitGuard<T> {
        base: *mut u8,
        layout: Layout,
        elems: *mut T,
        built: usize,
    }

    impl<T> Drop for InitGuard<T> {
        fn drop(&mut self) {
            unsafe {
                while self.built > 0 {
                    self.built -= 1;
                    ptr::drop_in_place(self.elems.add(self.built));
                }
                alloc::dealloc(self.base, self.layout);
            }
        }
    }

    let mut guard = InitGuard {
        base: base.as_ptr(),
        layout,
        elems,
        built: 0,
    };
    for index in 0..len {
        let value = init(index);
        unsafe { ptr::write(elems.add(index), value) };
        guard.built += 1;
    }
    mem::forget(guard);

    unsafe {
        let hub = base.as_ptr().add(hub_offset).cast::<Hub>();
        ptr::write(
            hub,
            Hub::new(
                elems.cast(),
                base.as_ptr(),
                len,
                destroy_slice_in_place::<T>,
                dealloc_combined::<T>,
            ),
        );
        stats::record_hub_allocated(true);
        trace!(
            bytes = layout.size(),
            elements = len,
            "allocated combined array block"
        );
        Ok((NonNull::new_unchecked(elems), NonNull::new_unchecked(hub)))
    }
}

// ============================================================================
// Strategies for the combined-block path
// ============================================================================

/// Run the destructor of a single in-place object without freeing memory.
pub(crate) unsafe fn destroy_in_place<T>(managed: *mut u8, _len: usize) {
    ptr::drop_in_place(managed.cast::<T>());
}

/// Run the destructors of `len` in-place elements without freeing memory.
pub(crate) unsafe fn destroy_slice_in_place<T>(managed: *mut u8, len: usize) {
    ptr::drop_in_place(ptr::slice_from_raw_parts_mut(managed.cast::<T>(), len));
}

/// Free the whole combined block, hub storage included.
pub(crate) unsafe fn dealloc_combined<T>(hub: *mut Hub) {
    let base = (*hub).base();
    let len = (*hub).len();
    // Recomputation cannot fail: the same arithmetic succeeded when the
    // block was allocated.
    let (layout, _) = combined_layout::<T>(len).unwrap_unchecked();
    alloc::dealloc(base, layout);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_places_hub_behind_region() {
        let (layout, hub_offset) = combined_layout::<u64>(4).unwrap();
        assert!(hub_offset >= 4 * mem::size_of::<u64>());
        assert!(layout.size() >= hub_offset + mem::size_of::<Hub>());
        assert_eq!(layout.align() % mem::align_of::<Hub>(), 0);
    }

    #[test]
    fn test_layout_zero_len() {
        let (layout, hub_offset) = combined_layout::<u64>(0).unwrap();
        assert_eq!(hub_offset, 0);
        assert!(layout.size() >= mem::size_of::<Hub>());
    }

    #[test]
    fn test_layout_overflow_reported() {
        let err = combined_layout::<u64>(usize::MAX).unwrap_err();
        assert!(matches!(err, AllocError::Layout { .. }));
    }

    #[test]
    fn test_single_block_round_trip() {
        let (managed, hub) = try_new_single(41u64).unwrap();
        unsafe {
            assert_eq!(*managed.as_ptr(), 41);
            assert_eq!(hub.as_ref().strong_count(), 1);
            assert_eq!(hub.as_ref().len(), 1);
            Hub::decrement_strong(hub.as_ptr());
        }
    }

    #[test]
    fn test_array_block_element_placement() {
        let (managed, hub) = try_new_array(5, |i| (i * 10) as u64).unwrap();
        unsafe {
            for i in 0..5 {
                assert_eq!(*managed.as_ptr().add(i), (i * 10) as u64);
            }
            assert_eq!(hub.as_ref().len(), 5);
            Hub::decrement_strong(hub.as_ptr());
        }
    }
}
