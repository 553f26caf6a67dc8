//! Reference-counted ownership handles.
//!
//! [`Shared`] and [`SharedArray`] hold a `(managed pointer, hub pointer)`
//! pair. Every copy of a handle owns one strong reference on the hub;
//! dropping the last one destroys the managed object, and the hub's
//! storage survives until the last weak observer lets go (see `hub`).
//!
//! Two construction paths exist:
//!
//! - the **combined** fast path ([`Shared::new`], [`SharedArray::new`],
//!   [`SharedArray::from_fn`]) places the object(s) and the hub in one
//!   aligned block (see `block`),
//! - the **separate** path ([`Shared::from_box`],
//!   [`SharedArray::from_boxed_slice`], [`Shared::from_unique`]) adopts an
//!   existing allocation and boxes a fresh hub next to it.
//!
//! Copies of a handle may be used freely from different threads; a single
//! handle instance requires `&mut` for state changes and so cannot be
//! mutated from two threads at once.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr;
use std::slice;

use crate::block;
use crate::error::{self, AllocError};
use crate::hub::{self, Hub};
use crate::stats;
use crate::unique::{Unique, UniqueArray};
use crate::weak::{Weak, WeakArray};

/// Reference-counted handle to a single object.
pub struct Shared<T> {
    ptr: *mut T,
    hub: *mut Hub,
    _marker: PhantomData<T>,
}

impl<T> Shared<T> {
    /// Construct the object and its hub in one combined allocation.
    ///
    /// Allocation failure is fatal; use [`try_new`](Self::try_new) to
    /// handle it.
    pub fn new(value: T) -> Self {
        match Self::try_new(value) {
            Ok(handle) => handle,
            Err(err) => error::alloc_failure(err),
        }
    }

    /// Fallible variant of [`new`](Self::new).
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        let (ptr, hub) = block::try_new_single(value)?;
        Ok(Self {
            ptr: ptr.as_ptr(),
            hub: hub.as_ptr(),
            _marker: PhantomData,
        })
    }

    /// A handle owning nothing.
    pub fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
            hub: ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    /// Adopt a boxed object, allocating a separate hub for it.
    pub fn from_box(value: Box<T>) -> Self {
        let ptr = Box::into_raw(value);
        // Safety: the pointer came from `Box::into_raw` just above.
        unsafe { Self::from_raw(ptr) }
    }

    /// Adopt a raw object allocation, allocating a separate hub for it.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, originate from `Box::into_raw` (or an
    /// exclusive handle's `release`), and be owned by nothing else.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        debug_assert!(!ptr.is_null(), "adopted a null pointer");
        let hub = Box::into_raw(Box::new(Hub::new(
            ptr.cast(),
            ptr::null_mut(),
            1,
            hub::destroy_boxed::<T>,
            hub::dealloc_boxed_hub,
        )));
        stats::record_hub_allocated(false);
        Self {
            ptr,
            hub,
            _marker: PhantomData,
        }
    }

    /// Take over an exclusive handle's allocation.
    ///
    /// The exclusive handle releases its pointer without destroying and is
    /// left null; a fresh hub is wired to the same destruction strategy
    /// its element type demands.
    pub fn from_unique(mut handle: Unique<T>) -> Self {
        if handle.is_null() {
            return Self::null();
        }
        let raw = handle.release();
        // Safety: `release` relinquished a pointer that originated from
        // `Box::into_raw`.
        unsafe { Self::from_raw(raw) }
    }

    /// Assemble a handle from parts whose strong reference is already
    /// accounted for (combined construction, weak upgrade).
    pub(crate) fn from_parts(ptr: *mut T, hub: *mut Hub) -> Self {
        Self {
            ptr,
            hub,
            _marker: PhantomData,
        }
    }

    /// The raw pointer, without transferring ownership.
    pub fn get(&self) -> *mut T {
        self.ptr
    }

    /// Whether the handle owns nothing.
    pub fn is_null(&self) -> bool {
        self.hub.is_null()
    }

    /// Borrow the managed object, if any.
    pub fn as_ref(&self) -> Option<&T> {
        // Safety: while this handle holds a strong reference the object is
        // valid.
        unsafe { self.ptr.as_ref() }
    }

    /// Current strong count, 0 for a null handle.
    pub fn use_count(&self) -> usize {
        match unsafe { self.hub.as_ref() } {
            Some(hub) => hub.strong_count(),
            None => 0,
        }
    }

    /// True iff this is the only strong reference.
    pub fn is_unique(&self) -> bool {
        self.use_count() == 1
    }

    /// Current weak observer count, 0 for a null handle.
    pub fn weak_count(&self) -> usize {
        match unsafe { self.hub.as_ref() } {
            Some(hub) => hub.weak_count(),
            None => 0,
        }
    }

    /// Mutable access, granted only when this handle is provably the sole
    /// reference of any kind (one strong, no weak observers).
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let hub = unsafe { self.hub.as_ref() }?;
        if hub.is_exclusive() {
            // Safety: sole strong reference, no weak observers, and the
            // `&mut self` borrow excludes new ones appearing.
            Some(unsafe { &mut *self.ptr })
        } else {
            None
        }
    }

    /// Drop this handle's ownership and become null.
    pub fn reset(&mut self) {
        if !self.hub.is_null() {
            // Safety: this handle owns one strong reference.
            unsafe { Hub::decrement_strong(self.hub) };
            self.ptr = ptr::null_mut();
            self.hub = ptr::null_mut();
        }
    }

    /// Exchange state with `other` in constant time, no count traffic.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.ptr, &mut other.ptr);
        mem::swap(&mut self.hub, &mut other.hub);
    }

    /// Create a weak observer of this handle's hub.
    pub fn downgrade(&self) -> Weak<T> {
        match unsafe { self.hub.as_ref() } {
            Some(hub) => {
                hub.increment_weak();
                Weak::from_parts(self.ptr, self.hub)
            }
            None => Weak::new(),
        }
    }

    /// Whether two handles share the same hub (null handles compare
    /// equal to each other).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.hub == other.hub
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        if let Some(hub) = unsafe { self.hub.as_ref() } {
            hub.increment_strong();
        }
        Self {
            ptr: self.ptr,
            hub: self.hub,
            _marker: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        // Same hub (or both null): nothing to do. Skipping avoids the
        // transient decrement a naive drop-then-copy would perform on
        // self-assignment.
        if self.hub == source.hub {
            return;
        }
        *self = source.clone();
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if !self.hub.is_null() {
            // Safety: this handle owns one strong reference.
            unsafe { Hub::decrement_strong(self.hub) };
        }
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        assert!(!self.ptr.is_null(), "dereferenced a null Shared handle");
        // Safety: the strong reference keeps the object valid.
        unsafe { &*self.ptr }
    }
}

impl<T> From<Unique<T>> for Shared<T> {
    fn from(handle: Unique<T>) -> Self {
        Self::from_unique(handle)
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("ptr", &self.ptr)
            .field("use_count", &self.use_count())
            .finish()
    }
}

// Safety: same sharing model as `std::sync::Arc`; the managed object is
// reachable immutably from every thread holding a copy.
unsafe impl<T: Send + Sync> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

/// Reference-counted handle to an array.
///
/// The element count lives in the hub, so copies and weak observers agree
/// on it without carrying it around.
pub struct SharedArray<T> {
    ptr: *mut T,
    hub: *mut Hub,
    _marker: PhantomData<T>,
}

impl<T> SharedArray<T> {
    /// Construct `len` value-initialized elements and the hub in one
    /// combined allocation.
    ///
    /// Allocation failure is fatal; use [`try_new`](Self::try_new) to
    /// handle it.
    pub fn new(len: usize) -> Self
    where
        T: Default,
    {
        match Self::try_new(len) {
            Ok(handle) => handle,
            Err(err) => error::alloc_failure(err),
        }
    }

    /// Fallible variant of [`new`](Self::new).
    pub fn try_new(len: usize) -> Result<Self, AllocError>
    where
        T: Default,
    {
        Self::try_from_fn(len, |_| T::default())
    }

    /// Construct `len` elements from `init(index)` and the hub in one
    /// combined allocation.
    ///
    /// If `init` panics partway, the already-built elements are destroyed
    /// in reverse order and the block is freed before the panic
    /// propagates.
    pub fn from_fn(len: usize, init: impl FnMut(usize) -> T) -> Self {
        match Self::try_from_fn(len, init) {
            Ok(handle) => handle,
            Err(err) => error::alloc_failure(err),
        }
    }

    /// Fallible variant of [`from_fn`](Self::from_fn).
    pub fn try_from_fn(len: usize, init: impl FnMut(usize) -> T) -> Result<Self, AllocError> {
        let (ptr, hub) = block::try_new_array(len, init)?;
        Ok(Self {
            ptr: ptr.as_ptr(),
            hub: hub.as_ptr(),
            _marker: PhantomData,
        })
    }

    /// A handle owning nothing.
    pub fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
            hub: ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    /// Adopt a boxed slice, allocating a separate hub for it.
    pub fn from_boxed_slice(values: Box<[T]>) -> Self {
        let len = values.len();
        let ptr = Box::into_raw(values) as *mut T;
        let hub = Box::into_raw(Box::new(Hub::new(
            ptr.cast(),
            ptr::null_mut(),
            len,
            hub::destroy_boxed_slice::<T>,
            hub::dealloc_boxed_hub,
        )));
        stats::record_hub_allocated(false);
        Self {
            ptr,
            hub,
            _marker: PhantomData,
        }
    }

    /// Adopt a vector's elements, allocating a separate hub for them.
    pub fn from_vec(values: Vec<T>) -> Self {
        Self::from_boxed_slice(values.into_boxed_slice())
    }

    /// Take over an exclusive array handle's allocation.
    pub fn from_unique(mut handle: UniqueArray<T>) -> Self {
        if handle.is_null() {
            return Self::null();
        }
        let (ptr, len) = handle.release();
        // Safety: the parts came from a boxed slice released by the
        // exclusive handle.
        let values = unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len)) };
        Self::from_boxed_slice(values)
    }

    /// Assemble a handle from parts whose strong reference is already
    /// accounted for (weak upgrade).
    pub(crate) fn from_parts(ptr: *mut T, hub: *mut Hub) -> Self {
        Self {
            ptr,
            hub,
            _marker: PhantomData,
        }
    }

    /// The raw element pointer, without transferring ownership.
    pub fn get(&self) -> *mut T {
        self.ptr
    }

    /// Whether the handle owns nothing.
    pub fn is_null(&self) -> bool {
        self.hub.is_null()
    }

    /// Number of managed elements (0 when null).
    pub fn len(&self) -> usize {
        match unsafe { self.hub.as_ref() } {
            Some(hub) => hub.len(),
            None => 0,
        }
    }

    /// Whether the handle manages no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The managed elements as a slice; empty when null.
    pub fn as_slice(&self) -> &[T] {
        if self.hub.is_null() {
            &[]
        } else {
            // Safety: the strong reference keeps the elements valid.
            unsafe { slice::from_raw_parts(self.ptr, self.len()) }
        }
    }

    /// Borrow element `index`, if in bounds.
    pub fn get_element(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    /// Borrow element `index` without a bounds check.
    ///
    /// # Safety
    ///
    /// The handle must be non-null and `index < self.len()`.
    pub unsafe fn get_unchecked(&self, index: usize) -> &T {
        debug_assert!(index < self.len());
        &*self.ptr.add(index)
    }

    /// Current strong count, 0 for a null handle.
    pub fn use_count(&self) -> usize {
        match unsafe { self.hub.as_ref() } {
            Some(hub) => hub.strong_count(),
            None => 0,
        }
    }

    /// True iff this is the only strong reference.
    pub fn is_unique(&self) -> bool {
        self.use_count() == 1
    }

    /// Current weak observer count, 0 for a null handle.
    pub fn weak_count(&self) -> usize {
        match unsafe { self.hub.as_ref() } {
            Some(hub) => hub.weak_count(),
            None => 0,
        }
    }

    /// Mutable access to the elements, granted only when this handle is
    /// provably the sole reference of any kind.
    pub fn get_mut(&mut self) -> Option<&mut [T]> {
        let hub = unsafe { self.hub.as_ref() }?;
        if hub.is_exclusive() {
            // Safety: sole strong reference, no weak observers, and the
            // `&mut self` borrow excludes new ones appearing.
            Some(unsafe { slice::from_raw_parts_mut(self.ptr, hub.len()) })
        } else {
            None
        }
    }

    /// Drop this handle's ownership and become null.
    pub fn reset(&mut self) {
        if !self.hub.is_null() {
            // Safety: this handle owns one strong reference.
            unsafe { Hub::decrement_strong(self.hub) };
            self.ptr = ptr::null_mut();
            self.hub = ptr::null_mut();
        }
    }

    /// Exchange state with `other` in constant time, no count traffic.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.ptr, &mut other.ptr);
        mem::swap(&mut self.hub, &mut other.hub);
    }

    /// Create a weak observer of this handle's hub.
    pub fn downgrade(&self) -> WeakArray<T> {
        match unsafe { self.hub.as_ref() } {
            Some(hub) => {
                hub.increment_weak();
                WeakArray::from_parts(self.ptr, self.hub)
            }
            None => WeakArray::new(),
        }
    }

    /// Whether two handles share the same hub (null handles compare
    /// equal to each other).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.hub == other.hub
    }
}

impl<T> Default for SharedArray<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Clone for SharedArray<T> {
    fn clone(&self) -> Self {
        if let Some(hub) = unsafe { self.hub.as_ref() } {
            hub.increment_strong();
        }
        Self {
            ptr: self.ptr,
            hub: self.hub,
            _marker: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        if self.hub == source.hub {
            return;
        }
        *self = source.clone();
    }
}

impl<T> Drop for SharedArray<T> {
    fn drop(&mut self) {
        if !self.hub.is_null() {
            // Safety: this handle owns one strong reference.
            unsafe { Hub::decrement_strong(self.hub) };
        }
    }
}

impl<T> Deref for SharedArray<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        assert!(
            !self.hub.is_null(),
            "dereferenced a null SharedArray handle"
        );
        // Safety: the strong reference keeps the elements valid.
        unsafe { slice::from_raw_parts(self.ptr, self.len()) }
    }
}

impl<T> From<UniqueArray<T>> for SharedArray<T> {
    fn from(handle: UniqueArray<T>) -> Self {
        Self::from_unique(handle)
    }
}

impl<T> fmt::Debug for SharedArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedArray")
            .field("ptr", &self.ptr)
            .field("len", &self.len())
            .field("use_count", &self.use_count())
            .finish()
    }
}

// Safety: same sharing model as `std::sync::Arc`.
unsafe impl<T: Send + Sync> Send for SharedArray<T> {}
unsafe impl<T: Send + Sync> Sync for SharedArray<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_construction() {
        let handle = Shared::new(100u32);
        assert_eq!(*handle, 100);
        assert_eq!(handle.use_count(), 1);
        assert!(handle.is_unique());
    }

    #[test]
    fn test_clone_tracks_count() {
        let a = Shared::new(1u32);
        let b = a.clone();
        assert_eq!(a.use_count(), 2);
        assert_eq!(b.use_count(), 2);
        assert!(a.ptr_eq(&b));
        drop(b);
        assert_eq!(a.use_count(), 1);
    }

    #[test]
    fn test_clone_from_same_hub_is_noop() {
        let mut a = Shared::new(5u32);
        let alias = a.clone();
        a.clone_from(&alias);
        assert_eq!(a.use_count(), 2);
        assert!(a.ptr_eq(&alias));
    }

    #[test]
    fn test_clone_from_releases_old_hub() {
        let mut a = Shared::new(1u32);
        let b = Shared::new(2u32);
        a.clone_from(&b);
        assert_eq!(*a, 2);
        assert_eq!(b.use_count(), 2);
    }

    #[test]
    fn test_reset_null_is_noop() {
        let mut handle: Shared<u32> = Shared::default();
        handle.reset();
        assert!(handle.is_null());
        assert_eq!(handle.use_count(), 0);
    }

    #[test]
    fn test_from_box_separate_hub() {
        let handle = Shared::from_box(Box::new(200u32));
        assert_eq!(*handle, 200);
        assert_eq!(handle.use_count(), 1);
    }

    #[test]
    fn test_from_unique_transfers_ownership() {
        let mut unique = Unique::new(300u32);
        let addr = unique.get();
        let shared = Shared::from_unique(unique);
        assert_eq!(shared.get(), addr);
        assert_eq!(*shared, 300);
    }

    #[test]
    fn test_from_null_unique_is_null() {
        let shared = Shared::<u32>::from_unique(Unique::null());
        assert!(shared.is_null());
        assert_eq!(shared.use_count(), 0);
    }

    #[test]
    fn test_weak_count_reporting() {
        let handle = Shared::new(1u32);
        assert_eq!(handle.weak_count(), 0);
        let w1 = handle.downgrade();
        let w2 = w1.clone();
        assert_eq!(handle.weak_count(), 2);
        drop(w1);
        drop(w2);
        assert_eq!(handle.weak_count(), 0);
    }

    #[test]
    fn test_get_mut_requires_exclusivity() {
        let mut handle = Shared::new(1u32);
        assert!(handle.get_mut().is_some());

        let alias = handle.clone();
        assert!(handle.get_mut().is_none());
        drop(alias);

        let weak = handle.downgrade();
        assert!(handle.get_mut().is_none());
        drop(weak);

        *handle.get_mut().unwrap() = 9;
        assert_eq!(*handle, 9);
    }

    #[test]
    #[should_panic(expected = "null Shared handle")]
    fn test_null_deref_panics() {
        let handle: Shared<u32> = Shared::null();
        let _ = *handle;
    }

    #[test]
    fn test_array_from_fn_placement() {
        let handle = SharedArray::from_fn(5, |i| i as u32 * 10);
        assert_eq!(handle.len(), 5);
        assert_eq!(handle.as_slice(), &[0, 10, 20, 30, 40]);
        assert_eq!(handle.get_element(4), Some(&40));
        assert_eq!(handle.get_element(5), None);
    }

    #[test]
    fn test_array_get_mut() {
        let mut handle = SharedArray::<u32>::new(3);
        handle.get_mut().unwrap()[2] = 42;
        assert_eq!(handle[2], 42);
    }

    #[test]
    fn test_array_from_vec_separate_hub() {
        let handle = SharedArray::from_vec(vec![7u32, 8, 9]);
        assert_eq!(handle.len(), 3);
        assert_eq!(handle[1], 8);
        let alias = handle.clone();
        assert_eq!(alias.use_count(), 2);
    }

    #[test]
    fn test_array_swap_preserves_counts() {
        let mut a = SharedArray::from_fn(2, |i| i as u32);
        let mut b = SharedArray::from_fn(3, |i| i as u32 + 10);
        let (a_ptr, b_ptr) = (a.get(), b.get());
        a.swap(&mut b);
        assert_eq!(a.get(), b_ptr);
        assert_eq!(b.get(), a_ptr);
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 2);
        assert_eq!(a.use_count(), 1);
        assert_eq!(b.use_count(), 1);
    }

    #[test]
    fn test_empty_array() {
        let handle = SharedArray::<u32>::new(0);
        assert!(!handle.is_null());
        assert!(handle.is_empty());
        assert_eq!(handle.as_slice(), &[] as &[u32]);
    }
}
