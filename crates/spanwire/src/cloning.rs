//! Snapshot-before-encode for values under concurrent mutation.
//!
//! Telemetry collectors keep updating objects (a timer's running sums, a call
//! tree still growing) while a sender thread encodes them. The
//! [`CloningCodec`] takes a snapshot through an injected [`CloneStrategy`]
//! under a short read lock and encodes the snapshot, so the bytes reflect one
//! consistent state and the collector is blocked only for the duration of
//! the clone, not of the encoding.
//!
//! Cloning never fails the operation. If the strategy reports a
//! [`CloneFailure`] or panics, the original value is encoded directly.
//!
//! Shared values keep their identity the same way they do under the
//! [`ReferenceTrackingCodec`](crate::ReferenceTrackingCodec): the first
//! occurrence of an object is written as `0` followed by its snapshot, later
//! occurrences (back-edges of cycles included) as its reference id. The id
//! belongs to the original object, not to the snapshot.
//!
//! A strategy may itself encode values (see [`CloneViaRoundTrip`]), which
//! can reach this codec again for the same type. A per-type guard in the
//! [`SerializationContext`] stops that recursion: while a type is being
//! cloned, nested values of the same type are encoded without cloning. The
//! guard is inherited by the nested contexts a strategy creates through its
//! [`CloneScope`].

use std::{
    any::{Any, TypeId},
    fmt,
    panic::{self, AssertUnwindSafe},
};

use crate::{
    context::SerializationContext,
    error::{CloneFailure, SerializationFault},
    field::Record,
    field_codec::FieldCodec,
    reference::shared_name,
    registry::{Codec, TypeRegistry, downcast},
    shared::Shared,
    wire::{Decoder, Encoder},
};

/// Produces a snapshot of a value.
pub trait CloneStrategy<T: Record>: Send + Sync {
    /// Returns a copy of `value` that is unaffected by later mutation of the
    /// original.
    ///
    /// # Errors
    ///
    /// Returns a [`CloneFailure`] if no snapshot can be made; the caller then
    /// encodes the original.
    fn clone_value(
        &self,
        value: &T,
        scope: &CloneScope<'_, T>,
    ) -> Result<T, CloneFailure>;
}

impl<T, F> CloneStrategy<T> for F
where
    T: Record,
    F: Fn(&T) -> Result<T, CloneFailure> + Send + Sync,
{
    fn clone_value(
        &self,
        value: &T,
        _scope: &CloneScope<'_, T>,
    ) -> Result<T, CloneFailure> {
        self(value)
    }
}

/// Snapshots with [`Clone`].
///
/// Shared values inside the record are copied as handles, so the snapshot
/// still observes mutation of the objects they point to.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneViaClone;

impl<T: Record + Clone> CloneStrategy<T> for CloneViaClone {
    fn clone_value(
        &self,
        value: &T,
        _scope: &CloneScope<'_, T>,
    ) -> Result<T, CloneFailure> {
        Ok(value.clone())
    }
}

/// Snapshots by encoding the value into a scratch buffer and reading it back.
///
/// The copy is deep: shared values inside the record become fresh objects
/// with the same identity structure.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneViaRoundTrip;

impl<T: Record> CloneStrategy<T> for CloneViaRoundTrip {
    fn clone_value(
        &self,
        value: &T,
        scope: &CloneScope<'_, T>,
    ) -> Result<T, CloneFailure> {
        scope.round_trip(value).map_err(|fault| {
            CloneFailure::new(T::TYPE_NAME, fault.to_string())
        })
    }
}

/// What a [`CloneStrategy`] may use while taking a snapshot.
pub struct CloneScope<'a, T: Record> {
    codec: &'a FieldCodec<T>,
    registry: &'a TypeRegistry,
    parent: &'a SerializationContext,
}

impl<'a, T: Record> CloneScope<'a, T> {
    /// The registry of the running operation.
    #[must_use]
    pub const fn registry(&self) -> &'a TypeRegistry { self.registry }

    /// The field codec the snapshot will be encoded with.
    #[must_use]
    pub const fn codec(&self) -> &'a FieldCodec<T> { self.codec }

    /// Creates a context for a nested operation that inherits the running
    /// operation's clone guards.
    #[must_use]
    pub fn nested_context(&self) -> SerializationContext {
        self.parent.nested()
    }

    /// Copies `value` by encoding it and reading it back in nested contexts.
    ///
    /// # Errors
    ///
    /// Returns the fault raised while encoding or decoding the copy.
    pub fn round_trip(&self, value: &T) -> Result<T, SerializationFault> {
        let mut encoder = Encoder::new();
        let mut context = self.nested_context();
        self.codec.write_fields(
            value,
            &mut encoder,
            self.registry,
            &mut context,
        )?;

        let mut copy = T::default();
        let mut context = self.nested_context();
        self.codec.read_into(
            &mut copy,
            &mut Decoder::new(encoder.as_bytes()),
            self.registry,
            &mut context,
        )?;

        Ok(copy)
    }
}

impl<T: Record> fmt::Debug for CloneScope<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloneScope")
            .field("type_name", &T::TYPE_NAME)
            .finish_non_exhaustive()
    }
}

/// Encodes [`Shared<T>`] values from a snapshot, with reference ids.
pub struct CloningCodec<T: Record> {
    name: String,
    inner: FieldCodec<T>,
    strategy: Box<dyn CloneStrategy<T>>,
}

impl<T: Record> CloningCodec<T> {
    /// Wraps `inner`, taking snapshots with `strategy`.
    pub fn new(
        inner: FieldCodec<T>,
        strategy: impl CloneStrategy<T> + 'static,
    ) -> Self {
        Self { name: shared_name::<T>(), inner, strategy: Box::new(strategy) }
    }

    /// Returns the wrapped field codec.
    #[must_use]
    pub const fn inner(&self) -> &FieldCodec<T> { &self.inner }

    fn snapshot(
        &self,
        shared: &Shared<T>,
        registry: &TypeRegistry,
        context: &SerializationContext,
    ) -> Result<T, CloneFailure> {
        let scope =
            CloneScope { codec: &self.inner, registry, parent: context };
        let value = shared.read_recursive();

        panic::catch_unwind(AssertUnwindSafe(|| {
            self.strategy.clone_value(&value, &scope)
        }))
        .unwrap_or_else(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "clone strategy panicked".to_owned());
            Err(CloneFailure::new(T::TYPE_NAME, reason))
        })
    }

    fn write_shared(
        &self,
        shared: &Shared<T>,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        let identity = shared.identity();
        if let Some(id) = context.written_id(identity) {
            encoder.emit_u32(id);
            return Ok(());
        }

        encoder.emit_u32(0);
        context.register_written(identity, shared.erase())?;

        let type_id = TypeId::of::<T>();
        if !context.begin_clone(type_id) {
            return self.inner.write_fields(
                &shared.read_recursive(),
                encoder,
                registry,
                context,
            );
        }

        let result = match self.snapshot(shared, registry, context) {
            Ok(snapshot) => {
                self.inner.write_fields(&snapshot, encoder, registry, context)
            }
            Err(failure) => {
                tracing::warn!(
                    type_name = T::TYPE_NAME,
                    %failure,
                    "clone failed, encoding the original value"
                );
                self.inner.write_fields(
                    &shared.read_recursive(),
                    encoder,
                    registry,
                    context,
                )
            }
        };

        context.end_clone(type_id);
        result
    }

    fn read_shared(
        &self,
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Shared<T>, SerializationFault> {
        let id = decoder.read_u32()?;
        if id != 0 {
            let object = context.resolve_read(id)?;
            return Shared::from_erased(object).ok_or_else(|| {
                SerializationFault::ReferenceTypeMismatch {
                    id,
                    expected: T::TYPE_NAME.to_owned(),
                }
            });
        }

        let shared = Shared::new(T::default());
        context.register_read(shared.erase())?;

        let mut value = T::default();
        self.inner.read_into(&mut value, decoder, registry, context)?;
        *shared.write() = value;

        Ok(shared)
    }
}

impl<T: Record> fmt::Debug for CloningCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloningCodec")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<T: Record> Codec for CloningCodec<T> {
    fn type_name(&self) -> &str { &self.name }

    fn value_type(&self) -> TypeId { TypeId::of::<Shared<T>>() }

    fn write(
        &self,
        value: &dyn Any,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        let shared = downcast::<Shared<T>>(value, &self.name)?;
        self.write_shared(shared, encoder, registry, context)
    }

    fn read(
        &self,
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationFault> {
        Ok(Box::new(self.read_shared(decoder, registry, context)?))
    }
}

#[cfg(test)]
mod test;
