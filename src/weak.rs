//! Non-owning observer handles.
//!
//! [`Weak`] and [`WeakArray`] watch a hub without keeping the managed
//! object alive. The pointer they carry is a snapshot that must never be
//! dereferenced directly; the only way through is a successful
//! [`upgrade`](Weak::upgrade), which secures a strong reference via the
//! hub's compare-and-increment loop and therefore can never resurrect an
//! object whose destructor has run or is running.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr;

use crate::hub::Hub;
use crate::shared::{Shared, SharedArray};

/// Weak observer of a single-object hub.
pub struct Weak<T> {
    ptr: *mut T,
    hub: *mut Hub,
    _marker: PhantomData<T>,
}

impl<T> Weak<T> {
    /// An observer watching nothing.
    pub fn new() -> Self {
        Self {
            ptr: ptr::null_mut(),
            hub: ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    /// Assemble an observer whose weak reference is already accounted for.
    pub(crate) fn from_parts(ptr: *mut T, hub: *mut Hub) -> Self {
        Self {
            ptr,
            hub,
            _marker: PhantomData,
        }
    }

    /// Attempt to obtain a strong handle. Returns `None` once the managed
    /// object has been destroyed (or the observer is null).
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let hub = unsafe { self.hub.as_ref() }?;
        if hub.try_upgrade() {
            Some(Shared::from_parts(self.ptr, self.hub))
        } else {
            None
        }
    }

    /// True iff the managed object no longer exists (or the observer is
    /// null).
    pub fn expired(&self) -> bool {
        match unsafe { self.hub.as_ref() } {
            Some(hub) => hub.strong_count() == 0,
            None => true,
        }
    }

    /// The hub's current strong count, 0 when null or expired.
    pub fn use_count(&self) -> usize {
        match unsafe { self.hub.as_ref() } {
            Some(hub) => hub.strong_count(),
            None => 0,
        }
    }

    /// Stop observing and become null.
    pub fn reset(&mut self) {
        if !self.hub.is_null() {
            // Safety: this observer owns one weak reference.
            unsafe { Hub::decrement_weak(self.hub) };
            self.ptr = ptr::null_mut();
            self.hub = ptr::null_mut();
        }
    }

    /// Exchange state with `other` in constant time, no count traffic.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.ptr, &mut other.ptr);
        mem::swap(&mut self.hub, &mut other.hub);
    }

    /// Whether two observers share the same hub (null observers compare
    /// equal to each other).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.hub == other.hub
    }
}

impl<T> Default for Weak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        if let Some(hub) = unsafe { self.hub.as_ref() } {
            hub.increment_weak();
        }
        Self {
            ptr: self.ptr,
            hub: self.hub,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for Weak<T> {
    fn drop(&mut self) {
        if !self.hub.is_null() {
            // Safety: this observer owns one weak reference.
            unsafe { Hub::decrement_weak(self.hub) };
        }
    }
}

impl<T> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Weak")
            .field("expired", &self.expired())
            .finish()
    }
}

// Safety: same sharing model as `std::sync::Weak`.
unsafe impl<T: Send + Sync> Send for Weak<T> {}
unsafe impl<T: Send + Sync> Sync for Weak<T> {}

/// Weak observer of an array hub.
pub struct WeakArray<T> {
    ptr: *mut T,
    hub: *mut Hub,
    _marker: PhantomData<T>,
}

impl<T> WeakArray<T> {
    /// An observer watching nothing.
    pub fn new() -> Self {
        Self {
            ptr: ptr::null_mut(),
            hub: ptr::null_mut(),
            _marker: PhantomData,
        }
    }

    /// Assemble an observer whose weak reference is already accounted for.
    pub(crate) fn from_parts(ptr: *mut T, hub: *mut Hub) -> Self {
        Self {
            ptr,
            hub,
            _marker: PhantomData,
        }
    }

    /// Attempt to obtain a strong handle. Returns `None` once the managed
    /// array has been destroyed (or the observer is null).
    pub fn upgrade(&self) -> Option<SharedArray<T>> {
        let hub = unsafe { self.hub.as_ref() }?;
        if hub.try_upgrade() {
            Some(SharedArray::from_parts(self.ptr, self.hub))
        } else {
            None
        }
    }

    /// True iff the managed array no longer exists (or the observer is
    /// null).
    pub fn expired(&self) -> bool {
        match unsafe { self.hub.as_ref() } {
            Some(hub) => hub.strong_count() == 0,
            None => true,
        }
    }

    /// The hub's current strong count, 0 when null or expired.
    pub fn use_count(&self) -> usize {
        match unsafe { self.hub.as_ref() } {
            Some(hub) => hub.strong_count(),
            None => 0,
        }
    }

    /// Stop observing and become null.
    pub fn reset(&mut self) {
        if !self.hub.is_null() {
            // Safety: this observer owns one weak reference.
            unsafe { Hub::decrement_weak(self.hub) };
            self.ptr = ptr::null_mut();
            self.hub = ptr::null_mut();
        }
    }

    /// Exchange state with `other` in constant time, no count traffic.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.ptr, &mut other.ptr);
        mem::swap(&mut self.hub, &mut other.hub);
    }

    /// Whether two observers share the same hub (null observers compare
    /// equal to each other).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.hub == other.hub
    }
}

impl<T> Default for WeakArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for WeakArray<T> {
    fn clone(&self) -> Self {
        if let Some(hub) = unsafe { self.hub.as_ref() } {
            hub.increment_weak();
        }
        Self {
            ptr: self.ptr,
            hub: self.hub,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for WeakArray<T> {
    fn drop(&mut self) {
        if !self.hub.is_null() {
            // Safety: this observer owns one weak reference.
            unsafe { Hub::decrement_weak(self.hub) };
        }
    }
}

impl<T> fmt::Debug for WeakArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakArray")
            .field("expired", &self.expired())
            .finish()
    }
}

// Safety: same sharing model as `std::sync::Weak`.
unsafe impl<T: Send + Sync> Send for WeakArray<T> {}
unsafe impl<T: Send + Sync> Sync for WeakArray<T> {}
