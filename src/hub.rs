//! The control hub: shared bookkeeping behind `Shared` and `Weak` handles.
//!
//! ## Design
//!
//! One non-generic `Hub` serves every managed shape. Type knowledge lives
//! in two monomorphized function pointers installed at construction time:
//!
//! - a **destroy** strategy that runs the destructor(s) for the managed
//!   object or array,
//! - a **dealloc** strategy that releases the allocation root, which is
//!   either the boxed hub itself (separate-allocation path) or the whole
//!   combined block the hub is embedded in (fast path, see `block`).
//!
//! ## Release protocol
//!
//! Release is two-phase. The strong count reaching zero destroys the
//! managed object and clears the managed pointer; the hub's own storage
//! survives so weak observers report "expired" instead of dangling. The
//! strong cohort collectively holds one implicit weak reference, released
//! after the destroy phase, so whichever count reaches zero *last* frees
//! the storage exactly once.
//!
//! Increments use relaxed ordering. The decrement that can trigger a
//! release uses release ordering plus an acquire fence on the final
//! transition, so the destructor observes every write made through other
//! handles, and the freeing thread observes the destructor's effects.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{fence, AtomicUsize, Ordering};

use tracing::trace;

use crate::stats;

/// Destructor strategy. Receives the managed pointer and element count.
pub(crate) type DestroyFn = unsafe fn(*mut u8, usize);

/// Storage-release strategy. Receives the hub pointer; the hub's own
/// storage is part of what gets freed, so the pointer is dead afterwards.
pub(crate) type DeallocFn = unsafe fn(*mut Hub);

/// Reference-count hub for one managed allocation.
pub(crate) struct Hub {
    /// Number of live strong handles.
    strong: AtomicUsize,
    /// Weak handle count plus the strong cohort's implicit reference.
    weak: AtomicUsize,
    /// Managed object/array base. Cleared after the destroy phase.
    managed: UnsafeCell<*mut u8>,
    /// Allocation root handed to the dealloc strategy.
    base: *mut u8,
    /// Element count (1 for single objects).
    len: usize,
    destroy: DestroyFn,
    dealloc: DeallocFn,
}

impl Hub {
    /// Create a hub with one strong owner and the implicit weak reference.
    pub(crate) fn new(
        managed: *mut u8,
        base: *mut u8,
        len: usize,
        destroy: DestroyFn,
        dealloc: DeallocFn,
    ) -> Self {
        Self {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            managed: UnsafeCell::new(managed),
            base,
            len,
            destroy,
            dealloc,
        }
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.base
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn strong_count(&self) -> usize {
        self.strong.load(Ordering::Acquire)
    }

    /// Weak observer count, excluding the implicit reference.
    pub(crate) fn weak_count(&self) -> usize {
        let weak = self.weak.load(Ordering::Acquire);
        if self.strong.load(Ordering::Acquire) > 0 {
            weak - 1
        } else {
            weak
        }
    }

    pub(crate) fn increment_strong(&self) {
        let old = self.strong.fetch_add(1, Ordering::Relaxed);
        debug_assert!(old != 0, "strong count revived from zero");
    }

    pub(crate) fn increment_weak(&self) {
        let old = self.weak.fetch_add(1, Ordering::Relaxed);
        debug_assert!(old != 0, "weak count revived from zero");
    }

    /// Attempt to secure a strong reference for a weak observer.
    ///
    /// Compare-and-increment loop: the count is only raised if it is
    /// currently nonzero. An unconditional increment-then-check would open
    /// a window where a concurrent final decrement misreads a transient
    /// nonzero count and skips the free.
    pub(crate) fn try_upgrade(&self) -> bool {
        loop {
            let current = self.strong.load(Ordering::Acquire);
            if current == 0 {
                stats::record_failed_upgrade();
                trace!("weak upgrade failed: object already destroyed");
                return false;
            }
            if self
                .strong
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// True when the caller provably holds the only reference of any kind.
    ///
    /// `weak` is checked before `strong`: observing `weak == 1` (implicit
    /// only) while the caller exclusively borrows the sole strong handle
    /// means no new weak can appear, since creating one requires access to
    /// that handle.
    pub(crate) fn is_exclusive(&self) -> bool {
        self.weak.load(Ordering::Acquire) == 1 && self.strong.load(Ordering::Acquire) == 1
    }

    /// Drop one strong reference.
    ///
    /// On the 1 -> 0 transition this destroys the managed object, clears
    /// the managed pointer, and releases the implicit weak reference. The
    /// hub may be freed before this returns.
    ///
    /// # Safety
    ///
    /// `hub` must point to a live hub on which the caller owns one strong
    /// reference.
    pub(crate) unsafe fn decrement_strong(hub: *mut Hub) {
        let h = &*hub;
        let old = h.strong.fetch_sub(1, Ordering::Release);
        debug_assert!(old != 0, "strong count underflow");
        if old == 1 {
            // Synchronize with every prior count operation before running
            // the destructor.
            fence(Ordering::Acquire);
            let managed = *h.managed.get();
            if !managed.is_null() {
                trace!(elements = h.len, "destroying managed allocation");
                (h.destroy)(managed, h.len);
                *h.managed.get() = ptr::null_mut();
                stats::record_destroyed(h.len);
            }
            Hub::decrement_weak(hub);
        }
    }

    /// Drop one weak reference (implicit or observer).
    ///
    /// On the 1 -> 0 transition this releases the hub's storage; the hub
    /// pointer is dead afterwards.
    ///
    /// # Safety
    ///
    /// `hub` must point to a live hub on which the caller owns one weak
    /// reference.
    pub(crate) unsafe fn decrement_weak(hub: *mut Hub) {
        let h = &*hub;
        let old = h.weak.fetch_sub(1, Ordering::Release);
        debug_assert!(old != 0, "weak count underflow");
        if old == 1 {
            fence(Ordering::Acquire);
            trace!("releasing hub storage");
            let dealloc = h.dealloc;
            stats::record_hub_released();
            dealloc(hub);
        }
    }
}

// Safety: count mutation is atomic; `managed` is written only by the single
// thread that performs the 1 -> 0 strong transition.
unsafe impl Send for Hub {}
unsafe impl Sync for Hub {}

// ============================================================================
// Strategies for the separate-allocation path
// ============================================================================

/// Destroy a single object owned through `Box::into_raw`. The object's own
/// allocation is reclaimed here; the hub outlives it for weak observers.
pub(crate) unsafe fn destroy_boxed<T>(managed: *mut u8, _len: usize) {
    drop(Box::from_raw(managed.cast::<T>()));
}

/// Destroy a slice owned through `Box::into_raw`, dropping every element.
pub(crate) unsafe fn destroy_boxed_slice<T>(managed: *mut u8, len: usize) {
    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
        managed.cast::<T>(),
        len,
    )));
}

/// Release a hub that was allocated on its own via `Box`.
pub(crate) unsafe fn dealloc_boxed_hub(hub: *mut Hub) {
    drop(Box::from_raw(hub));
}
