//! A small pool of ready encoder and context bundles.
//!
//! Each top-level operation needs a scratch [`Encoder`] and a fresh
//! [`SerializationContext`]. Allocating both per call is wasteful; sharing a
//! single pair is unsound, since a context must never be used by two
//! operations at once. The pool keeps a bounded number of bundles instead:
//! an operation borrows one, uses it to completion and hands it back.
//!
//! Borrowing never blocks. When the pool is empty a new bundle is allocated,
//! and when it is full a returned bundle is dropped.

use std::ops::{Deref, DerefMut};

use crossbeam::queue::ArrayQueue;

use crate::{context::SerializationContext, wire::Encoder};

/// An encoder and context used by one operation.
#[derive(Debug, Default)]
pub struct Bundle {
    /// Scratch buffer the record is assembled in.
    pub encoder: Encoder,

    /// The operation's bookkeeping.
    pub context: SerializationContext,
}

impl Bundle {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            encoder: Encoder::with_capacity(capacity),
            context: SerializationContext::new(),
        }
    }

    fn reset(&mut self) {
        self.encoder.clear();
        self.context.reset();
    }
}

/// A bounded, lock-free pool of [`Bundle`]s.
#[derive(Debug)]
pub struct ContextPool {
    bundles: ArrayQueue<Bundle>,
    buffer_capacity: usize,
}

impl ContextPool {
    /// Creates a pool holding at most `size` idle bundles (at least one).
    #[must_use]
    pub fn new(size: usize, buffer_capacity: usize) -> Self {
        Self { bundles: ArrayQueue::new(size.max(1)), buffer_capacity }
    }

    /// Borrows a fresh bundle.
    pub fn acquire(&self) -> PooledBundle<'_> {
        let bundle = self
            .bundles
            .pop()
            .unwrap_or_else(|| Bundle::with_capacity(self.buffer_capacity));

        PooledBundle { pool: self, bundle }
    }

    /// Returns the number of idle bundles.
    #[must_use]
    pub fn idle(&self) -> usize { self.bundles.len() }

    /// Returns the maximum number of idle bundles.
    #[must_use]
    pub fn capacity(&self) -> usize { self.bundles.capacity() }

    fn release(&self, mut bundle: Bundle) {
        // reset here rather than on acquire so that pinned objects are not
        // kept alive by an idle bundle
        bundle.reset();
        let _ = self.bundles.push(bundle);
    }
}

/// A [`Bundle`] borrowed from a [`ContextPool`], returned on drop.
#[derive(Debug)]
pub struct PooledBundle<'a> {
    pool: &'a ContextPool,
    bundle: Bundle,
}

impl PooledBundle<'_> {
    /// Splits the bundle into its encoder and context.
    pub fn parts(&mut self) -> (&mut Encoder, &mut SerializationContext) {
        (&mut self.bundle.encoder, &mut self.bundle.context)
    }
}

impl Deref for PooledBundle<'_> {
    type Target = Bundle;

    fn deref(&self) -> &Bundle { &self.bundle }
}

impl DerefMut for PooledBundle<'_> {
    fn deref_mut(&mut self) -> &mut Bundle { &mut self.bundle }
}

impl Drop for PooledBundle<'_> {
    fn drop(&mut self) {
        // an empty bundle allocates nothing
        self.pool.release(std::mem::take(&mut self.bundle));
    }
}

#[cfg(test)]
mod test;
