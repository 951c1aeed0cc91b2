//! The compatible, marker-driven record codec.
//!
//! A [`FieldCodec<T>`] encodes the fields of a [`Record`] that are present in
//! the record's released schema. The layout of one record is:
//!
//! ```text
//! [header, once per type per context: varint count, count × varint marker]
//! per field, in ascending name order: [varint length][payload]
//! ```
//!
//! A length of `0` means null. Because every payload is length-prefixed and
//! the header names each field by its marker, a reader that does not know a
//! marker can skip that field's bytes, and a reader that knows markers the
//! writer did not send leaves those fields at their defaults.

use std::{
    any::{Any, TypeId},
    fmt,
    sync::Arc,
};

use fxhash::FxHashMap;

use crate::{
    context::SerializationContext,
    error::{RegistryError, SchemaMissingFault, SerializationFault},
    field::{FieldAccess, Record},
    fixup::PostRead,
    registry::{Codec, TypeRegistry, downcast},
    schema::SchemaSource,
    wire::{Decoder, Encoder},
};

/// One serialized field of a record.
struct FieldSlot<T> {
    name: &'static str,
    marker: u32,
    nullable: bool,
    access: Arc<dyn FieldAccess<T>>,
    codec: Option<Arc<dyn Codec>>,
}

impl<T> fmt::Debug for FieldSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSlot")
            .field("name", &self.name)
            .field("marker", &self.marker)
            .field("nullable", &self.nullable)
            .field("overridden", &self.codec.is_some())
            .finish()
    }
}

/// A header entry resolved against a reader's slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeaderEntry {
    /// The marker belongs to the slot at this index.
    Known(usize),

    /// The marker is not part of this reader's schema; its payload is
    /// skipped.
    Unknown(u32),
}

/// Encodes records field by field, keyed by schema markers.
pub struct FieldCodec<T: Record> {
    slots: Vec<FieldSlot<T>>,
    by_marker: FxHashMap<u32, usize>,
    fixups: Vec<Arc<dyn PostRead<T>>>,
}

impl<T: Record> FieldCodec<T> {
    /// Builds the slot table of `T` from the schema published for
    /// [`T::TYPE_NAME`](Record::TYPE_NAME).
    ///
    /// Transient fields and fields absent from the schema are dropped. Schema
    /// entries naming fields `T` does not have are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaMissingFault`] if the source has no schema for `T`.
    pub fn new(schemas: &dyn SchemaSource) -> Result<Self, SchemaMissingFault> {
        let schema = schemas.schema(T::TYPE_NAME).ok_or_else(|| {
            SchemaMissingFault { type_name: T::TYPE_NAME.to_owned() }
        })?;

        let mut slots = T::fields()
            .into_iter()
            .filter_map(|descriptor| {
                let access = descriptor.access()?.clone();
                let marker = schema.marker(descriptor.name())?;

                Some(FieldSlot {
                    name: descriptor.name(),
                    marker,
                    nullable: descriptor.nullable(),
                    access,
                    codec: None,
                })
            })
            .collect::<Vec<_>>();

        slots.sort_by(|a, b| a.name.cmp(b.name));

        let by_marker = slots
            .iter()
            .enumerate()
            .map(|(index, slot)| (slot.marker, index))
            .collect();

        tracing::debug!(
            type_name = T::TYPE_NAME,
            slots = slots.len(),
            "built field codec"
        );

        Ok(Self { slots, by_marker, fixups: Vec::new() })
    }

    /// Encodes `field` with `codec` instead of its type's own encoding.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownField`] if `T` does not serialize a
    /// field of that name, and [`RegistryError::OverrideTypeMismatch`] if the
    /// codec handles another type than the field holds.
    pub fn with_override(
        mut self,
        field: &str,
        codec: Arc<dyn Codec>,
    ) -> Result<Self, RegistryError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.name == field)
            .ok_or_else(|| RegistryError::UnknownField {
                type_name: T::TYPE_NAME.to_owned(),
                field: field.to_owned(),
            })?;

        if slot.access.override_type() != codec.value_type() {
            return Err(RegistryError::OverrideTypeMismatch {
                type_name: T::TYPE_NAME.to_owned(),
                field: field.to_owned(),
                codec: codec.type_name().to_owned(),
            });
        }

        slot.codec = Some(codec);
        Ok(self)
    }

    /// Runs `fixup` on every value this codec finishes reading.
    #[must_use]
    pub fn with_fixup(mut self, fixup: impl PostRead<T> + 'static) -> Self {
        self.fixups.push(Arc::new(fixup));
        self
    }

    /// Returns the serialized field names in wire order.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.iter().map(|slot| slot.name)
    }

    /// Writes the fields of `value`.
    ///
    /// # Errors
    ///
    /// Returns the first field fault, annotated with the field and type name.
    pub fn write_fields(
        &self,
        value: &T,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        if context.begin_header(TypeId::of::<T>()) {
            encoder.emit_usize(self.slots.len());
            for slot in &self.slots {
                encoder.emit_u32(slot.marker);
            }
        }

        for slot in &self.slots {
            if slot.access.is_null(value) {
                encoder.emit_u8(0);
                continue;
            }

            let mark = encoder.reserve_length();
            let result = match &slot.codec {
                Some(codec) => slot.access.write_with(
                    codec.as_ref(),
                    value,
                    encoder,
                    registry,
                    context,
                ),
                None => slot.access.write(value, encoder, registry, context),
            };
            result.map_err(|fault| fault.in_field(T::TYPE_NAME, slot.name))?;
            encoder.finish_length(mark);
        }

        Ok(())
    }

    /// Reads fields into `value`, then runs this codec's fixups.
    ///
    /// Fields the writer did not send keep their current value.
    ///
    /// # Errors
    ///
    /// Returns the first field fault, annotated with the field and type name.
    pub fn read_into(
        &self,
        value: &mut T,
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        let header = self.header(decoder, context)?;

        for entry in header.iter() {
            let length = decoder.read_usize()?;
            let payload = decoder.read_slice(length)?;

            let index = match *entry {
                HeaderEntry::Known(index) => index,
                HeaderEntry::Unknown(marker) => {
                    tracing::trace!(
                        type_name = T::TYPE_NAME,
                        marker,
                        length,
                        "skipped unknown field"
                    );
                    continue;
                }
            };
            let Some(slot) = self.slots.get(index) else { continue };

            if length == 0 {
                slot.access.set_null(value);
                continue;
            }

            let mut field_decoder = Decoder::new(payload);
            let result = match &slot.codec {
                Some(codec) => slot.access.read_with(
                    codec.as_ref(),
                    value,
                    &mut field_decoder,
                    registry,
                    context,
                ),
                None => slot.access.read(
                    value,
                    &mut field_decoder,
                    registry,
                    context,
                ),
            };
            result.map_err(|fault| fault.in_field(T::TYPE_NAME, slot.name))?;
        }

        for fixup in &self.fixups {
            fixup.after_read(value)?;
        }

        Ok(())
    }

    /// Returns the header for `T` in this context, reading it from the
    /// stream the first time.
    fn header(
        &self,
        decoder: &mut Decoder<'_>,
        context: &mut SerializationContext,
    ) -> Result<Arc<[HeaderEntry]>, SerializationFault> {
        let type_id = TypeId::of::<T>();
        if let Some(header) = context.read_header(type_id) {
            return Ok(header);
        }

        let count = decoder.read_usize()?;
        if count > decoder.remaining() {
            return Err(SerializationFault::OutOfRange(format!(
                "header of `{}` declares {count} fields but only {} bytes \
                 remain",
                T::TYPE_NAME,
                decoder.remaining(),
            )));
        }

        let header = (0..count)
            .map(|_| {
                let marker = decoder.read_u32()?;
                Ok(self
                    .by_marker
                    .get(&marker)
                    .map_or(HeaderEntry::Unknown(marker), |&index| {
                        HeaderEntry::Known(index)
                    }))
            })
            .collect::<Result<Arc<[_]>, SerializationFault>>()?;

        context.store_read_header(type_id, header.clone());
        Ok(header)
    }
}

impl<T: Record> fmt::Debug for FieldCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCodec")
            .field("type_name", &T::TYPE_NAME)
            .field("slots", &self.slots)
            .field("fixups", &self.fixups.len())
            .finish()
    }
}

/// Registered on its own, a `FieldCodec` encodes records by value: each
/// occurrence is written in full and has no identity.
impl<T: Record> Codec for FieldCodec<T> {
    fn type_name(&self) -> &str { T::TYPE_NAME }

    fn value_type(&self) -> TypeId { TypeId::of::<T>() }

    fn write(
        &self,
        value: &dyn Any,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        let value = downcast::<T>(value, T::TYPE_NAME)?;
        self.write_fields(value, encoder, registry, context)
    }

    fn read(
        &self,
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationFault> {
        let mut value = T::default();
        self.read_into(&mut value, decoder, registry, context)?;
        Ok(Box::new(value))
    }
}
