//! Identity-preserving encoding of shared objects.
//!
//! The [`ReferenceTrackingCodec`] wraps a [`FieldCodec`] and adds a varint
//! reference id in front of every [`Shared`] value:
//!
//! - `0` means a new object follows; both sides assign it the next id
//!   (starting at 1) *before* its fields are encoded, so children may refer
//!   back to their ancestors.
//! - Any other value refers to an object already seen in this operation, and
//!   nothing else is written.
//!
//! This is what makes cyclic graphs terminate and shared instances come back
//! as a single instance.

use std::{
    any::{Any, TypeId},
    fmt,
    sync::Arc,
};

use crate::{
    context::SerializationContext,
    error::SerializationFault,
    field::Record,
    field_codec::FieldCodec,
    fixup::PostRead,
    registry::{Codec, TypeRegistry, downcast},
    shared::Shared,
    wire::{Decoder, Encoder},
};

/// The stable name of `Shared<T>`, distinct from the name of `T` itself so
/// that both can be registered.
pub(crate) fn shared_name<T: Record>() -> String {
    format!("Shared<{}>", T::TYPE_NAME)
}

/// Encodes [`Shared<T>`] values with reference ids.
pub struct ReferenceTrackingCodec<T: Record> {
    name: String,
    inner: FieldCodec<T>,
    fixups: Vec<Arc<dyn PostRead<Shared<T>>>>,
}

impl<T: Record> ReferenceTrackingCodec<T> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: FieldCodec<T>) -> Self {
        Self { name: shared_name::<T>(), inner, fixups: Vec::new() }
    }

    /// Runs `fixup` once on each outermost `Shared<T>` read.
    #[must_use]
    pub fn with_fixup(
        mut self,
        fixup: impl PostRead<Shared<T>> + 'static,
    ) -> Self {
        self.fixups.push(Arc::new(fixup));
        self
    }

    /// Returns the wrapped field codec.
    #[must_use]
    pub const fn inner(&self) -> &FieldCodec<T> { &self.inner }

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

        let value = shared.read_recursive();
        self.inner.write_fields(&value, encoder, registry, context)
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

        // registered before its fields are read so that descendants can
        // resolve a reference back to it
        let mut shared = Shared::new(T::default());
        context.register_read(shared.erase())?;

        let type_id = TypeId::of::<T>();
        context.enter_read(type_id);
        let mut value = T::default();
        let result =
            self.inner.read_into(&mut value, decoder, registry, context);
        let outermost = context.exit_read(type_id);
        result?;

        *shared.write() = value;

        if outermost {
            for fixup in &self.fixups {
                fixup.after_read(&mut shared)?;
            }
        }

        Ok(shared)
    }
}

impl<T: Record> fmt::Debug for ReferenceTrackingCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceTrackingCodec")
            .field("inner", &self.inner)
            .field("fixups", &self.fixups.len())
            .finish()
    }
}

impl<T: Record> Codec for ReferenceTrackingCodec<T> {
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
