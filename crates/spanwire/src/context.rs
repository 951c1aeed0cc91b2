//! Per-operation serialization state.
//!
//! A [`SerializationContext`] holds the bookkeeping for exactly one top-level
//! serialize or deserialize call:
//!
//! - which record types have already had their field-marker header written
//!   (or read), so a header appears once per type rather than once per
//!   instance;
//! - the reference tables mapping shared objects to ids and back;
//! - the set of types currently being snapshotted by a
//!   [`CloningCodec`](crate::CloningCodec);
//! - how deeply each tracked type is nested in the current read, so that
//!   post-read fixups run once, on the outermost value.
//!
//! Ids and headers are only meaningful inside the operation that produced
//! them. Reusing a context across operations without [`reset`] corrupts the
//! results, which is why pooled contexts are reset whenever they are
//! returned.
//!
//! [`reset`]: SerializationContext::reset

use std::{
    any::{Any, TypeId},
    sync::Arc,
};

use fxhash::{FxHashMap, FxHashSet};

use crate::{
    error::{InvalidReferenceFault, SerializationFault},
    field_codec::HeaderEntry,
};

/// Bookkeeping for a single top-level operation.
#[derive(Default)]
pub struct SerializationContext {
    headers_written: FxHashSet<TypeId>,
    headers_read: FxHashMap<TypeId, Arc<[HeaderEntry]>>,

    /// Allocation address to assigned id.
    written: FxHashMap<usize, u32>,

    /// Keeps every object that was assigned an id alive until the context is
    /// reset, so that its address cannot be reused by another allocation
    /// while the operation runs.
    pins: Vec<Arc<dyn Any + Send + Sync>>,

    /// Objects in the order they were read; id `n` is at index `n - 1`.
    read: Vec<Arc<dyn Any + Send + Sync>>,

    cloning: FxHashSet<TypeId>,
    read_depth: FxHashMap<TypeId, usize>,
}

impl SerializationContext {
    /// Creates a fresh context.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Creates a fresh context for a nested operation that inherits this
    /// context's clone guards.
    ///
    /// Headers and references are not inherited; the nested operation
    /// produces a self-contained byte stream.
    #[must_use]
    pub fn nested(&self) -> Self {
        Self { cloning: self.cloning.clone(), ..Self::default() }
    }

    /// Returns the context to its freshly created state, keeping allocated
    /// capacity.
    pub fn reset(&mut self) {
        self.headers_written.clear();
        self.headers_read.clear();
        self.written.clear();
        self.pins.clear();
        self.read.clear();
        self.cloning.clear();
        self.read_depth.clear();
    }

    /// Returns `true` if nothing has been recorded since creation or the
    /// last [`reset`](Self::reset).
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.headers_written.is_empty()
            && self.headers_read.is_empty()
            && self.written.is_empty()
            && self.pins.is_empty()
            && self.read.is_empty()
            && self.cloning.is_empty()
            && self.read_depth.is_empty()
    }

    // ---------------------------------------------------------------------
    // headers
    // ---------------------------------------------------------------------

    /// Marks the header of `type_id` as written, returning `true` if the
    /// caller must write it now.
    pub(crate) fn begin_header(&mut self, type_id: TypeId) -> bool {
        self.headers_written.insert(type_id)
    }

    pub(crate) fn read_header(
        &self,
        type_id: TypeId,
    ) -> Option<Arc<[HeaderEntry]>> {
        self.headers_read.get(&type_id).cloned()
    }

    pub(crate) fn store_read_header(
        &mut self,
        type_id: TypeId,
        header: Arc<[HeaderEntry]>,
    ) {
        self.headers_read.insert(type_id, header);
    }

    // ---------------------------------------------------------------------
    // references
    // ---------------------------------------------------------------------

    /// Returns the id already assigned to the object at `identity`.
    pub(crate) fn written_id(&self, identity: usize) -> Option<u32> {
        self.written.get(&identity).copied()
    }

    /// Assigns the next id to the object at `identity`.
    pub(crate) fn register_written(
        &mut self,
        identity: usize,
        pin: Arc<dyn Any + Send + Sync>,
    ) -> Result<u32, SerializationFault> {
        let id = next_id(self.pins.len())?;
        self.written.insert(identity, id);
        self.pins.push(pin);
        Ok(id)
    }

    /// Assigns the next id to a freshly allocated object being read.
    pub(crate) fn register_read(
        &mut self,
        object: Arc<dyn Any + Send + Sync>,
    ) -> Result<u32, SerializationFault> {
        let id = next_id(self.read.len())?;
        self.read.push(object);
        Ok(id)
    }

    /// Looks up an object read earlier in this context.
    pub(crate) fn resolve_read(
        &self,
        id: u32,
    ) -> Result<Arc<dyn Any + Send + Sync>, InvalidReferenceFault> {
        usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| self.read.get(index))
            .cloned()
            .ok_or(InvalidReferenceFault { id })
    }

    /// Returns the number of objects that were assigned an id while writing.
    #[must_use]
    pub fn written_references(&self) -> usize { self.pins.len() }

    /// Returns the number of objects that were assigned an id while reading.
    #[must_use]
    pub fn read_references(&self) -> usize { self.read.len() }

    // ---------------------------------------------------------------------
    // clone guard
    // ---------------------------------------------------------------------

    /// Returns `true` if a value of `type_id` is currently being cloned.
    #[must_use]
    pub fn is_cloning(&self, type_id: TypeId) -> bool {
        self.cloning.contains(&type_id)
    }

    /// Sets the clone guard for `type_id`, returning `false` if it was
    /// already set.
    pub(crate) fn begin_clone(&mut self, type_id: TypeId) -> bool {
        self.cloning.insert(type_id)
    }

    pub(crate) fn end_clone(&mut self, type_id: TypeId) {
        self.cloning.remove(&type_id);
    }

    // ---------------------------------------------------------------------
    // read nesting
    // ---------------------------------------------------------------------

    /// Records entry into a read of `type_id`.
    pub(crate) fn enter_read(&mut self, type_id: TypeId) {
        *self.read_depth.entry(type_id).or_default() += 1;
    }

    /// Records completion of a read of `type_id`, returning `true` if it was
    /// the outermost one.
    pub(crate) fn exit_read(&mut self, type_id: TypeId) -> bool {
        let Some(depth) = self.read_depth.get_mut(&type_id) else {
            return true;
        };

        *depth = depth.saturating_sub(1);
        if *depth == 0 {
            self.read_depth.remove(&type_id);
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for SerializationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializationContext")
            .field("headers_written", &self.headers_written.len())
            .field("headers_read", &self.headers_read.len())
            .field("written_references", &self.pins.len())
            .field("read_references", &self.read.len())
            .field("cloning", &self.cloning.len())
            .finish_non_exhaustive()
    }
}

/// Ids start at 1; 0 is the "new object follows" sentinel.
fn next_id(assigned: usize) -> Result<u32, SerializationFault> {
    assigned
        .checked_add(1)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| {
            SerializationFault::OutOfRange(
                "too many shared objects in one operation".to_owned(),
            )
        })
}
