//! Shared, identity-bearing values.
//!
//! A [`Shared<T>`] is the unit of object identity in an encoded graph. Two
//! fields holding clones of the same `Shared<T>` point at one allocation, and
//! the [`ReferenceTrackingCodec`](crate::ReferenceTrackingCodec) preserves
//! that: the value is written once and the second occurrence becomes a short
//! reference id. Cycles are formed the same way.
//!
//! The value sits behind a [`parking_lot::RwLock`] because telemetry objects
//! are typically still being updated by the collecting thread while another
//! thread encodes them.

use std::{
    any::Any,
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A reference-counted, lockable value with stable identity.
pub struct Shared<T>(Arc<RwLock<T>>);

impl<T> Shared<T> {
    /// Allocates a new shared value.
    pub fn new(value: T) -> Self { Self(Arc::new(RwLock::new(value))) }

    /// Locks the value for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, T> { self.0.read() }

    /// Locks the value for reading even if this thread already holds a read
    /// lock on it, without waiting for queued writers.
    ///
    /// Encoders lock through this, since a value may be reached again from
    /// inside its own encoding.
    pub fn read_recursive(&self) -> RwLockReadGuard<'_, T> {
        self.0.read_recursive()
    }

    /// Locks the value for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> { self.0.write() }

    /// Returns `true` if both handles point at the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Creates a non-owning handle to the same allocation.
    #[must_use]
    pub fn downgrade(&self) -> WeakShared<T> {
        WeakShared(Arc::downgrade(&self.0))
    }

    /// Returns the number of strong handles to the allocation.
    #[must_use]
    pub fn strong_count(&self) -> usize { Arc::strong_count(&self.0) }

    /// The allocation address, used as the identity key while encoding.
    ///
    /// Only meaningful while the allocation is kept alive, which the
    /// reference table guarantees by pinning every value it assigns an id.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl<T: Send + Sync + 'static> Shared<T> {
    /// Type-erases the handle for storage in a reference table.
    pub(crate) fn erase(&self) -> Arc<dyn Any + Send + Sync> {
        self.0.clone()
    }

    /// Recovers a typed handle from an erased one.
    pub(crate) fn from_erased(
        erased: Arc<dyn Any + Send + Sync>,
    ) -> Option<Self> {
        erased.downcast::<RwLock<T>>().ok().map(Self)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self { Self::new(T::default()) }
}

// the contents are deliberately not printed; they may contain cycles
impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&Arc::as_ptr(&self.0)).finish()
    }
}

/// A non-owning handle to a [`Shared<T>`].
///
/// Used for back-pointers (for example a call-tree node's parent) that are
/// derivable after reading and therefore never written to the wire.
pub struct WeakShared<T>(Weak<RwLock<T>>);

impl<T> WeakShared<T> {
    /// Creates a handle that points at nothing.
    #[must_use]
    pub const fn new() -> Self { Self(Weak::new()) }

    /// Attempts to obtain a strong handle.
    #[must_use]
    pub fn upgrade(&self) -> Option<Shared<T>> { self.0.upgrade().map(Shared) }

    /// Returns `true` if this handle points at `shared`.
    #[must_use]
    pub fn points_to(&self, shared: &Shared<T>) -> bool {
        Weak::as_ptr(&self.0) == Arc::as_ptr(&shared.0)
    }
}

impl<T> Clone for WeakShared<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Default for WeakShared<T> {
    fn default() -> Self { Self::new() }
}

impl<T> fmt::Debug for WeakShared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakShared").field(&Weak::as_ptr(&self.0)).finish()
    }
}
