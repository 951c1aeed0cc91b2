//! The type registry: stable wire tags for runtime types.
//!
//! Every top-level record starts with a varint *type tag* naming the codec
//! that wrote it. Tags are assigned in registration order, starting at 1, and
//! are the only type identity that travels on the wire. They must therefore
//! be append-only across releases: a type is never moved to another tag, and
//! a type that is no longer produced keeps its slot through
//! [`RegistryBuilder::retired`] so that the tags after it do not shift.
//!
//! The first tags belong to the built-in leaf codecs, in a fixed order:
//!
//! | tag | type |
//! |---|---|
//! | 1 | `bool` |
//! | 2 | `u8` |
//! | 3 | `u16` |
//! | 4 | `u32` |
//! | 5 | `u64` |
//! | 6 | `i8` |
//! | 7 | `i16` |
//! | 8 | `i32` |
//! | 9 | `i64` |
//! | 10 | `f32` |
//! | 11 | `f64` |
//! | 12 | `char` |
//! | 13 | `String` |
//! | 14 | `Duration` |
//! | 15 | `SystemTime` |
//!
//! Application types start at [`FIRST_APPLICATION_TAG`].
//!
//! Tag `0` is reserved. Under [`UnregisteredTypePolicy::ByName`] it is
//! followed by the type's name as a string, for types registered with
//! [`RegistryBuilder::by_name`].

use std::{
    any::{Any, TypeId, type_name},
    fmt, io,
    sync::Arc,
    time::{Duration, SystemTime},
};

use fxhash::FxHashMap;

use crate::{
    cloning::{CloneStrategy, CloningCodec},
    config::{Config, DefaultConfig, UnregisteredTypePolicy},
    context::SerializationContext,
    error::{RegistryError, SerializationFault},
    field::Record,
    field_codec::FieldCodec,
    pool::ContextPool,
    primitive::PrimitiveCodec,
    reference::ReferenceTrackingCodec,
    schema::SchemaSource,
    wire::{Decoder, Encoder},
};

/// A stable integer standing in for a type on the wire.
pub type TypeTag = u32;

/// The tag announcing that a type name follows.
pub const BY_NAME_TAG: TypeTag = 0;

/// The first tag available to application types.
pub const FIRST_APPLICATION_TAG: TypeTag = 16;

/// Encodes and decodes values of one runtime type.
///
/// Codecs are shared across threads and must not keep per-operation state;
/// anything an operation needs to remember belongs in the
/// [`SerializationContext`].
pub trait Codec: Send + Sync {
    /// The stable name of the handled type, used for by-name records and
    /// diagnostics.
    fn type_name(&self) -> &str;

    /// The runtime type of the values [`write`](Self::write) accepts and
    /// [`read`](Self::read) produces.
    fn value_type(&self) -> TypeId;

    /// Writes `value`, which must be of [`value_type`](Self::value_type).
    ///
    /// # Errors
    ///
    /// Returns a fault if `value` has the wrong type or cannot be encoded.
    fn write(
        &self,
        value: &dyn Any,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault>;

    /// Reads a value of [`value_type`](Self::value_type).
    ///
    /// # Errors
    ///
    /// Returns a fault if the input is malformed.
    fn read(
        &self,
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationFault>;
}

/// Downcasts a value handed to a [`Codec`].
pub(crate) fn downcast<'a, T: 'static>(
    value: &'a dyn Any,
    expected: &str,
) -> Result<&'a T, SerializationFault> {
    value
        .downcast_ref::<T>()
        .ok_or_else(|| SerializationFault::type_mismatch(expected))
}

/// Holds the tag of a type that is no longer produced.
#[derive(Debug)]
struct RetiredCodec {
    type_name: String,
}

impl RetiredCodec {
    fn fault(&self) -> SerializationFault {
        SerializationFault::RetiredType { type_name: self.type_name.clone() }
    }
}

impl Codec for RetiredCodec {
    fn type_name(&self) -> &str { &self.type_name }

    fn value_type(&self) -> TypeId { TypeId::of::<Self>() }

    fn write(
        &self,
        _value: &dyn Any,
        _encoder: &mut Encoder,
        _registry: &TypeRegistry,
        _context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        Err(self.fault())
    }

    fn read(
        &self,
        _decoder: &mut Decoder<'_>,
        _registry: &TypeRegistry,
        _context: &mut SerializationContext,
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationFault> {
        Err(self.fault())
    }
}

#[derive(Clone)]
struct Entry {
    /// `None` for types written by name.
    tag: Option<TypeTag>,
    codec: Arc<dyn Codec>,
}

/// Assembles a [`TypeRegistry`].
///
/// Registration order is wire format: see the [module docs](self).
pub struct RegistryBuilder {
    schemas: Arc<dyn SchemaSource>,
    policy: UnregisteredTypePolicy,
    pool_size: usize,
    buffer_capacity: usize,
    tagged: Vec<Arc<dyn Codec>>,
    by_type: FxHashMap<TypeId, Entry>,
    by_name: FxHashMap<String, Arc<dyn Codec>>,
}

impl RegistryBuilder {
    /// Creates a builder configured by `C`, with the built-in codecs already
    /// registered.
    pub fn new<C: Config>(schemas: impl SchemaSource + 'static) -> Self {
        let mut builder = Self {
            schemas: Arc::new(schemas),
            policy: C::unregistered_type_policy(),
            pool_size: C::context_pool_size(),
            buffer_capacity: C::initial_buffer_capacity(),
            tagged: Vec::new(),
            by_type: FxHashMap::default(),
            by_name: FxHashMap::default(),
        };
        builder.register_builtins();
        builder
    }

    fn register_builtins(&mut self) {
        // never reorder: these are tags 1..FIRST_APPLICATION_TAG
        let builtins: [Arc<dyn Codec>; 15] = [
            Arc::new(PrimitiveCodec::<bool>::new()),
            Arc::new(PrimitiveCodec::<u8>::new()),
            Arc::new(PrimitiveCodec::<u16>::new()),
            Arc::new(PrimitiveCodec::<u32>::new()),
            Arc::new(PrimitiveCodec::<u64>::new()),
            Arc::new(PrimitiveCodec::<i8>::new()),
            Arc::new(PrimitiveCodec::<i16>::new()),
            Arc::new(PrimitiveCodec::<i32>::new()),
            Arc::new(PrimitiveCodec::<i64>::new()),
            Arc::new(PrimitiveCodec::<f32>::new()),
            Arc::new(PrimitiveCodec::<f64>::new()),
            Arc::new(PrimitiveCodec::<char>::new()),
            Arc::new(PrimitiveCodec::<String>::new()),
            Arc::new(PrimitiveCodec::<Duration>::new()),
            Arc::new(PrimitiveCodec::<SystemTime>::new()),
        ];

        for codec in builtins {
            self.insert_tagged(codec);
        }
    }

    fn insert_tagged(&mut self, codec: Arc<dyn Codec>) -> TypeTag {
        let tag = self.next_tag();
        self.by_name.insert(codec.type_name().to_owned(), codec.clone());
        self.by_type.insert(
            codec.value_type(),
            Entry { tag: Some(tag), codec: codec.clone() },
        );
        self.tagged.push(codec);
        tag
    }

    #[allow(clippy::cast_possible_truncation)]
    fn next_tag(&self) -> TypeTag { self.tagged.len() as TypeTag + 1 }

    fn claim(&self, codec: &dyn Codec) -> Result<(), RegistryError> {
        if self.by_type.contains_key(&codec.value_type()) {
            return Err(RegistryError::DuplicateType {
                type_name: codec.type_name().to_owned(),
            });
        }
        if self.by_name.contains_key(codec.type_name()) {
            return Err(RegistryError::DuplicateName {
                type_name: codec.type_name().to_owned(),
            });
        }
        Ok(())
    }

    /// Assigns the next tag to `codec`.
    ///
    /// # Errors
    ///
    /// Fails if the codec's runtime type or name is already registered.
    pub fn register(
        &mut self,
        codec: impl Codec + 'static,
    ) -> Result<&mut Self, RegistryError> {
        self.register_arc(Arc::new(codec))
    }

    /// Assigns the next tag to a shared `codec`.
    ///
    /// # Errors
    ///
    /// Fails if the codec's runtime type or name is already registered.
    pub fn register_arc(
        &mut self,
        codec: Arc<dyn Codec>,
    ) -> Result<&mut Self, RegistryError> {
        self.claim(codec.as_ref())?;

        let type_name = codec.type_name().to_owned();
        let tag = self.insert_tagged(codec);
        tracing::debug!(type_name, tag, "registered codec");

        Ok(self)
    }

    /// Keeps the next tag for a type that is no longer produced. Reading or
    /// writing it fails with [`SerializationFault::RetiredType`].
    ///
    /// # Errors
    ///
    /// Fails if the name is already registered.
    pub fn retired(
        &mut self,
        type_name: impl Into<String>,
    ) -> Result<&mut Self, RegistryError> {
        let type_name = type_name.into();
        if self.by_name.contains_key(&type_name) {
            return Err(RegistryError::DuplicateName { type_name });
        }

        let tag = self.next_tag();
        tracing::debug!(type_name, tag, "retired tag");

        let codec: Arc<dyn Codec> = Arc::new(RetiredCodec { type_name });
        self.by_name.insert(codec.type_name().to_owned(), codec.clone());
        self.tagged.push(codec);
        Ok(self)
    }

    /// Registers `codec` without a tag; its values are written by name.
    ///
    /// # Errors
    ///
    /// Fails with [`RegistryError::ByNameDisabled`] unless the configuration
    /// selects [`UnregisteredTypePolicy::ByName`], or if the type or name is
    /// already registered.
    pub fn by_name(
        &mut self,
        codec: impl Codec + 'static,
    ) -> Result<&mut Self, RegistryError> {
        if self.policy != UnregisteredTypePolicy::ByName {
            return Err(RegistryError::ByNameDisabled {
                type_name: codec.type_name().to_owned(),
            });
        }
        self.claim(&codec)?;

        tracing::debug!(type_name = codec.type_name(), "registered by name");

        let codec: Arc<dyn Codec> = Arc::new(codec);
        self.by_name.insert(codec.type_name().to_owned(), codec.clone());
        self.by_type.insert(codec.value_type(), Entry { tag: None, codec });
        Ok(self)
    }

    /// Builds a [`FieldCodec`] for `T` from this builder's schemas.
    ///
    /// # Errors
    ///
    /// Fails if no schema is published for `T`.
    pub fn field_codec<T: Record>(
        &self,
    ) -> Result<FieldCodec<T>, RegistryError> {
        Ok(FieldCodec::new(self.schemas.as_ref())?)
    }

    /// Registers `T` as a record encoded by value.
    ///
    /// # Errors
    ///
    /// Fails if no schema is published for `T` or `T` is already registered.
    pub fn record<T: Record>(&mut self) -> Result<&mut Self, RegistryError> {
        let codec = self.field_codec::<T>()?;
        self.register(codec)
    }

    /// Registers [`Shared<T>`](crate::Shared) with reference tracking.
    ///
    /// # Errors
    ///
    /// Fails if no schema is published for `T` or `Shared<T>` is already
    /// registered.
    pub fn tracked<T: Record>(&mut self) -> Result<&mut Self, RegistryError> {
        let codec = self.field_codec::<T>()?;
        self.register(ReferenceTrackingCodec::new(codec))
    }

    /// Registers [`Shared<T>`](crate::Shared) with snapshot cloning.
    ///
    /// # Errors
    ///
    /// Fails if no schema is published for `T` or `Shared<T>` is already
    /// registered.
    pub fn cloning<T: Record>(
        &mut self,
        strategy: impl CloneStrategy<T> + 'static,
    ) -> Result<&mut Self, RegistryError> {
        let codec = self.field_codec::<T>()?;
        self.register(CloningCodec::new(codec, strategy))
    }

    /// Finishes the registry.
    #[must_use]
    pub fn build(self) -> TypeRegistry {
        tracing::debug!(
            tags = self.tagged.len(),
            by_name = self.by_type.values().filter(|e| e.tag.is_none()).count(),
            "built type registry"
        );

        TypeRegistry {
            tagged: self.tagged,
            by_type: self.by_type,
            by_name: self.by_name,
            policy: self.policy,
            pool: ContextPool::new(self.pool_size, self.buffer_capacity),
        }
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("policy", &self.policy)
            .field("tags", &self.tagged.len())
            .finish_non_exhaustive()
    }
}

/// Maps runtime types to codecs and stable wire tags.
///
/// Immutable once built and safe to share across threads. Each top-level
/// call borrows its own encoder and [`SerializationContext`] from an
/// internal pool, so concurrent calls never see each other's state.
pub struct TypeRegistry {
    /// Index `n` holds tag `n + 1`.
    tagged: Vec<Arc<dyn Codec>>,
    by_type: FxHashMap<TypeId, Entry>,
    by_name: FxHashMap<String, Arc<dyn Codec>>,
    policy: UnregisteredTypePolicy,
    pool: ContextPool,
}

impl TypeRegistry {
    /// Starts a registry with the [`DefaultConfig`].
    pub fn builder(schemas: impl SchemaSource + 'static) -> RegistryBuilder {
        RegistryBuilder::new::<DefaultConfig>(schemas)
    }

    /// Starts a registry configured by `C`.
    pub fn builder_with<C: Config>(
        schemas: impl SchemaSource + 'static,
    ) -> RegistryBuilder {
        RegistryBuilder::new::<C>(schemas)
    }

    /// The active policy for types without a tag.
    #[must_use]
    pub const fn policy(&self) -> UnregisteredTypePolicy { self.policy }

    /// Returns the number of assigned tags, retired ones included.
    #[must_use]
    pub fn tag_count(&self) -> usize { self.tagged.len() }

    /// Returns the tag of `V`, `None` if it has none.
    #[must_use]
    pub fn tag_of<V: Any>(&self) -> Option<TypeTag> {
        self.by_type.get(&TypeId::of::<V>()).and_then(|entry| entry.tag)
    }

    /// Returns the codec holding `tag`.
    #[must_use]
    pub fn codec_by_tag(&self, tag: TypeTag) -> Option<&Arc<dyn Codec>> {
        let index = usize::try_from(tag).ok()?.checked_sub(1)?;
        self.tagged.get(index)
    }

    /// Returns the codec for values of `type_id`, tagged or by name.
    #[must_use]
    pub fn codec_for(&self, type_id: TypeId) -> Option<&Arc<dyn Codec>> {
        self.by_type.get(&type_id).map(|entry| &entry.codec)
    }

    /// Returns the codec for `V`.
    ///
    /// # Errors
    ///
    /// Fails with [`SerializationFault::UnregisteredType`] if `V` has none.
    pub fn codec_of<V: Any>(
        &self,
    ) -> Result<&Arc<dyn Codec>, SerializationFault> {
        self.codec_for(TypeId::of::<V>()).ok_or_else(|| {
            SerializationFault::UnregisteredType {
                type_name: type_name::<V>().to_owned(),
            }
        })
    }

    /// Writes `value` preceded by its type tag, or by tag `0` and its name.
    ///
    /// `type_name` only names the value in diagnostics.
    ///
    /// # Errors
    ///
    /// Fails with [`SerializationFault::UnregisteredType`] if the value's
    /// type can be written neither by tag nor by name, or with the codec's
    /// fault.
    pub fn write_tagged(
        &self,
        value: &dyn Any,
        type_name: &str,
        encoder: &mut Encoder,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        let type_id = value.type_id();
        match self.by_type.get(&type_id) {
            Some(Entry { tag: Some(tag), codec }) => {
                encoder.emit_u32(*tag);
                codec.write(value, encoder, self, context)
            }
            Some(Entry { tag: None, codec })
                if self.policy == UnregisteredTypePolicy::ByName =>
            {
                encoder.emit_u32(BY_NAME_TAG);
                encoder.emit_str(codec.type_name());
                codec.write(value, encoder, self, context)
            }
            _ => Err(SerializationFault::UnregisteredType {
                type_name: type_name.to_owned(),
            }),
        }
    }

    /// Reads a value preceded by its type tag or name.
    ///
    /// # Errors
    ///
    /// Fails with [`SerializationFault::UnknownTag`] or
    /// [`SerializationFault::UnknownTypeName`] if the stream names a type
    /// this registry does not know, or with the codec's fault.
    pub fn read_tagged(
        &self,
        decoder: &mut Decoder<'_>,
        context: &mut SerializationContext,
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationFault> {
        self.read_tagged_with(decoder, context).map(|(_, value)| value)
    }

    /// Like [`read_tagged`](Self::read_tagged), also returning the codec
    /// that read the value.
    ///
    /// # Errors
    ///
    /// Fails like [`read_tagged`](Self::read_tagged).
    pub fn read_tagged_with(
        &self,
        decoder: &mut Decoder<'_>,
        context: &mut SerializationContext,
    ) -> Result<
        (&Arc<dyn Codec>, Box<dyn Any + Send + Sync>),
        SerializationFault,
    > {
        let tag = decoder.read_u32()?;

        let codec = if tag == BY_NAME_TAG {
            let name = decoder.read_str()?;
            self.by_name.get(&name).ok_or(
                SerializationFault::UnknownTypeName { type_name: name },
            )?
        } else {
            self.codec_by_tag(tag)
                .ok_or(SerializationFault::UnknownTag { tag })?
        };

        let value = codec.read(decoder, self, context)?;
        Ok((codec, value))
    }

    /// Serializes `value` as one record into `sink`.
    ///
    /// The record is assembled in memory and handed to the sink with a
    /// single `write_all`.
    ///
    /// # Errors
    ///
    /// Fails if `value`'s type is not registered, if any part of it cannot
    /// be encoded, or if the sink fails.
    #[tracing::instrument(
        level = "trace",
        skip_all,
        fields(type_name = type_name::<V>())
    )]
    pub fn serialize<V: Any>(
        &self,
        value: &V,
        sink: &mut impl io::Write,
    ) -> Result<(), SerializationFault> {
        let mut bundle = self.pool.acquire();
        let (encoder, context) = bundle.parts();
        self.write_root(value, encoder, context)?;
        sink.write_all(encoder.as_bytes())?;
        Ok(())
    }

    /// Serializes `value` as one record and returns its bytes.
    ///
    /// # Errors
    ///
    /// Fails if `value`'s type is not registered or any part of it cannot be
    /// encoded.
    #[tracing::instrument(
        level = "trace",
        skip_all,
        fields(type_name = type_name::<V>())
    )]
    pub fn serialize_to_vec<V: Any>(
        &self,
        value: &V,
    ) -> Result<Vec<u8>, SerializationFault> {
        let mut bundle = self.pool.acquire();
        let (encoder, context) = bundle.parts();
        self.write_root(value, encoder, context)?;
        Ok(encoder.as_bytes().to_vec())
    }

    fn write_root<V: Any>(
        &self,
        value: &V,
        encoder: &mut Encoder,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        let writable = match self.by_type.get(&TypeId::of::<V>()) {
            Some(entry) => {
                entry.tag.is_some()
                    || self.policy == UnregisteredTypePolicy::ByName
            }
            None => false,
        };
        if !writable {
            return Err(SerializationFault::UnregisteredType {
                type_name: type_name::<V>().to_owned(),
            });
        }

        self.write_tagged(value, type_name::<V>(), encoder, context)
    }

    /// Deserializes one record from `source`.
    ///
    /// On success the decoder is positioned after the record, so a stream of
    /// records can be read with repeated calls.
    ///
    /// # Errors
    ///
    /// Fails if the record's tag is unknown or its payload is malformed.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn deserialize(
        &self,
        source: &mut Decoder<'_>,
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationFault> {
        let mut bundle = self.pool.acquire();
        self.read_tagged(source, &mut bundle.context)
    }

    /// Deserializes one record that must be a `V`.
    ///
    /// # Errors
    ///
    /// Fails like [`deserialize`](Self::deserialize), or with
    /// [`SerializationFault::TypeMismatch`] if the record holds another type.
    pub fn deserialize_as<V: Any>(
        &self,
        source: &mut Decoder<'_>,
    ) -> Result<V, SerializationFault> {
        self.deserialize(source)?
            .downcast::<V>()
            .map(|value| *value)
            .map_err(|_| SerializationFault::type_mismatch(type_name::<V>()))
    }

    /// Deserializes a `V` from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Fails like [`deserialize_as`](Self::deserialize_as).
    pub fn from_bytes<V: Any>(
        &self,
        bytes: &[u8],
    ) -> Result<V, SerializationFault> {
        self.deserialize_as(&mut Decoder::new(bytes))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("policy", &self.policy)
            .field("tags", &self.tagged.len())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test;
