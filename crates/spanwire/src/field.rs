//! Field descriptors and field value encoding.
//!
//! Records describe their fields through compile-time tables rather than
//! runtime introspection: `#[derive(Record)]` generates a [`Record`] impl
//! whose [`fields`](Record::fields) returns one [`FieldDescriptor`] per
//! struct field (including the fields of embedded base structs marked
//! `#[record(flatten)]`). A [`FieldCodec`](crate::FieldCodec) turns these
//! descriptors into its slot table once, at construction.
//!
//! The payload of a single field is produced by its type's [`FieldValue`]
//! impl. Leaf values use their fixed [`Encode`]/[`Decode`] layout; shared
//! objects and nested records are delegated to whichever codec the
//! [`TypeRegistry`] holds for their type, without a type tag, because the
//! declared type already identifies the codec. Only [`AnyValue`] fields,
//! whose concrete type is known at runtime only, carry a type tag.

use std::{
    any::{Any, TypeId, type_name},
    borrow::Cow,
    collections::{BTreeMap, HashMap, VecDeque},
    fmt,
    hash::{BuildHasher, Hash},
    num::{NonZeroU32, NonZeroU64, Wrapping},
    sync::Arc,
    time::{Duration, SystemTime},
};

use crate::{
    context::SerializationContext,
    error::SerializationFault,
    primitive::{Decode, Encode},
    registry::{Codec, TypeRegistry},
    shared::Shared,
    wire::{Decoder, Encoder},
};

/// A struct whose fields can be encoded by a
/// [`FieldCodec`](crate::FieldCodec).
///
/// Implement with `#[derive(Record)]`.
pub trait Record: Default + Send + Sync + 'static {
    /// The stable name schemas are looked up by.
    const TYPE_NAME: &'static str;

    /// Describes every field of the record, transient ones included.
    fn fields() -> Vec<FieldDescriptor<Self>>;
}

/// A value that can be stored in a record field.
pub trait FieldValue: Sized + Send + Sync + 'static {
    /// Whether the field may be null on the wire.
    const NULLABLE: bool = false;

    /// Returns `true` if the value is null and its payload is omitted.
    fn is_null(&self) -> bool { false }

    /// The value a null payload decodes to, if the type has one.
    fn null() -> Option<Self> { None }

    /// Writes the payload.
    ///
    /// # Errors
    ///
    /// Returns a fault if the value or anything it refers to cannot be
    /// encoded.
    fn write_value(
        &self,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault>;

    /// Reads a payload.
    ///
    /// # Errors
    ///
    /// Returns a fault if the payload is malformed.
    fn read_value(
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Self, SerializationFault>;

    /// The runtime type an override codec for this field must handle.
    fn override_type() -> TypeId { TypeId::of::<Self>() }

    /// Exposes the value to an override codec, `None` when null.
    fn as_override_input(&self) -> Option<&dyn Any> { Some(self) }

    /// Accepts a value produced by an override codec.
    ///
    /// # Errors
    ///
    /// Returns [`SerializationFault::TypeMismatch`] if the override produced
    /// a value of another type.
    fn from_override_output(
        value: Box<dyn Any + Send + Sync>,
    ) -> Result<Self, SerializationFault> {
        value
            .downcast::<Self>()
            .map(|value| *value)
            .map_err(|_| SerializationFault::type_mismatch(type_name::<Self>()))
    }
}

// =============================================================================
// Field access
// =============================================================================

/// Reads and writes one field of a `T`.
///
/// Implementations are generated by `#[derive(Record)]`; the trait is public
/// so that hand-written records can provide their own.
pub trait FieldAccess<T>: Send + Sync {
    /// Returns `true` if the field is currently null.
    fn is_null(&self, record: &T) -> bool;

    /// Writes the field's payload.
    ///
    /// # Errors
    ///
    /// Propagates the value's encoding fault.
    fn write(
        &self,
        record: &T,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault>;

    /// Reads a payload into the field.
    ///
    /// # Errors
    ///
    /// Propagates the value's decoding fault.
    fn read(
        &self,
        record: &mut T,
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault>;

    /// Assigns the null value, if the field has one.
    fn set_null(&self, record: &mut T);

    /// The runtime type an override codec must handle.
    fn override_type(&self) -> TypeId;

    /// Writes the field through an override codec.
    ///
    /// # Errors
    ///
    /// Propagates the codec's fault.
    fn write_with(
        &self,
        codec: &dyn Codec,
        record: &T,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault>;

    /// Reads the field through an override codec.
    ///
    /// # Errors
    ///
    /// Propagates the codec's fault, or a type mismatch if the codec
    /// produced a value the field cannot hold.
    fn read_with(
        &self,
        codec: &dyn Codec,
        record: &mut T,
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault>;
}

/// A [`FieldAccess`] over a struct field of type `F`.
pub struct Field<T, F> {
    get: fn(&T) -> &F,
    get_mut: fn(&mut T) -> &mut F,
}

impl<T, F> Field<T, F> {
    /// Creates an accessor from a pair of projections.
    #[must_use]
    pub const fn new(get: fn(&T) -> &F, get_mut: fn(&mut T) -> &mut F) -> Self {
        Self { get, get_mut }
    }
}

impl<T: 'static, F: FieldValue> FieldAccess<T> for Field<T, F> {
    fn is_null(&self, record: &T) -> bool { (self.get)(record).is_null() }

    fn write(
        &self,
        record: &T,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        (self.get)(record).write_value(encoder, registry, context)
    }

    fn read(
        &self,
        record: &mut T,
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        *(self.get_mut)(record) = F::read_value(decoder, registry, context)?;
        Ok(())
    }

    fn set_null(&self, record: &mut T) {
        if let Some(null) = F::null() {
            *(self.get_mut)(record) = null;
        }
    }

    fn override_type(&self) -> TypeId { F::override_type() }

    fn write_with(
        &self,
        codec: &dyn Codec,
        record: &T,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        match (self.get)(record).as_override_input() {
            Some(value) => codec.write(value, encoder, registry, context),
            None => Ok(()),
        }
    }

    fn read_with(
        &self,
        codec: &dyn Codec,
        record: &mut T,
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        let value = codec.read(decoder, registry, context)?;
        *(self.get_mut)(record) = F::from_override_output(value)?;
        Ok(())
    }
}

/// Lifts a [`FieldAccess`] of an embedded base struct `B` to the record `T`
/// that embeds it.
struct Flattened<T, B> {
    inner: Arc<dyn FieldAccess<B>>,
    project: fn(&T) -> &B,
    project_mut: fn(&mut T) -> &mut B,
}

impl<T, B: 'static> FieldAccess<T> for Flattened<T, B> {
    fn is_null(&self, record: &T) -> bool {
        self.inner.is_null((self.project)(record))
    }

    fn write(
        &self,
        record: &T,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        self.inner.write((self.project)(record), encoder, registry, context)
    }

    fn read(
        &self,
        record: &mut T,
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        self.inner.read((self.project_mut)(record), decoder, registry, context)
    }

    fn set_null(&self, record: &mut T) {
        self.inner.set_null((self.project_mut)(record));
    }

    fn override_type(&self) -> TypeId { self.inner.override_type() }

    fn write_with(
        &self,
        codec: &dyn Codec,
        record: &T,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        self.inner.write_with(
            codec,
            (self.project)(record),
            encoder,
            registry,
            context,
        )
    }

    fn read_with(
        &self,
        codec: &dyn Codec,
        record: &mut T,
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        self.inner.read_with(
            codec,
            (self.project_mut)(record),
            decoder,
            registry,
            context,
        )
    }
}

/// Describes one field of a record.
pub struct FieldDescriptor<T> {
    name: &'static str,
    nullable: bool,
    access: Option<Arc<dyn FieldAccess<T>>>,
}

impl<T: 'static> FieldDescriptor<T> {
    /// Describes a serializable field.
    #[must_use]
    pub fn new<F: FieldValue>(
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        Self {
            name,
            nullable: F::NULLABLE,
            access: Some(Arc::new(Field::new(get, get_mut))),
        }
    }

    /// Describes a field that is never serialized.
    #[must_use]
    pub const fn transient(name: &'static str) -> Self {
        Self { name, nullable: true, access: None }
    }

    /// Re-targets a descriptor of an embedded base struct `T` to the record
    /// `P` that embeds it.
    #[must_use]
    pub fn project<P: 'static>(
        self,
        project: fn(&P) -> &T,
        project_mut: fn(&mut P) -> &mut T,
    ) -> FieldDescriptor<P> {
        FieldDescriptor {
            name: self.name,
            nullable: self.nullable,
            access: self.access.map(|inner| {
                Arc::new(Flattened { inner, project, project_mut })
                    as Arc<dyn FieldAccess<P>>
            }),
        }
    }
}

impl<T> FieldDescriptor<T> {
    /// The field's name, as used in schemas.
    #[must_use]
    pub const fn name(&self) -> &'static str { self.name }

    /// Whether the field may be null on the wire.
    #[must_use]
    pub const fn nullable(&self) -> bool { self.nullable }

    /// Whether the field is excluded from serialization.
    #[must_use]
    pub const fn is_transient(&self) -> bool { self.access.is_none() }

    /// The accessor, `None` for transient fields.
    #[must_use]
    pub fn access(&self) -> Option<&Arc<dyn FieldAccess<T>>> {
        self.access.as_ref()
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("nullable", &self.nullable)
            .field("transient", &self.is_transient())
            .finish()
    }
}

// =============================================================================
// Values resolved through the registry
// =============================================================================

/// Writes `value` with the codec registered for its exact type, without a
/// type tag.
///
/// # Errors
///
/// Returns [`SerializationFault::UnregisteredType`] if no codec handles `V`.
pub fn write_registered<V: Any>(
    value: &V,
    encoder: &mut Encoder,
    registry: &TypeRegistry,
    context: &mut SerializationContext,
) -> Result<(), SerializationFault> {
    registry.codec_of::<V>()?.write(value, encoder, registry, context)
}

/// Reads a `V` with the codec registered for it.
///
/// # Errors
///
/// Returns [`SerializationFault::UnregisteredType`] if no codec handles `V`.
pub fn read_registered<V: Any>(
    decoder: &mut Decoder<'_>,
    registry: &TypeRegistry,
    context: &mut SerializationContext,
) -> Result<V, SerializationFault> {
    let value = registry.codec_of::<V>()?.read(decoder, registry, context)?;
    value
        .downcast::<V>()
        .map(|value| *value)
        .map_err(|_| SerializationFault::type_mismatch(type_name::<V>()))
}

impl<T: Send + Sync + 'static> FieldValue for Shared<T> {
    fn write_value(
        &self,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        write_registered(self, encoder, registry, context)
    }

    fn read_value(
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Self, SerializationFault> {
        read_registered(decoder, registry, context)
    }
}

/// A polymorphic field value whose concrete type is only known at runtime.
///
/// The value is written with its type tag, so it must be of a type the
/// registry knows.
#[derive(Clone)]
pub struct AnyValue {
    value: Arc<dyn Any + Send + Sync>,
    type_name: Cow<'static, str>,
}

impl AnyValue {
    /// Wraps `value`.
    pub fn new<V: Any + Send + Sync>(value: V) -> Self {
        Self { value: Arc::new(value), type_name: type_name::<V>().into() }
    }

    /// Returns the value if it is a `V`.
    #[must_use]
    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        self.value.downcast_ref::<V>()
    }

    /// Returns `true` if the value is a `V`.
    #[must_use]
    pub fn is<V: Any>(&self) -> bool { self.value.is::<V>() }

    /// The runtime type of the wrapped value.
    #[must_use]
    pub fn value_type(&self) -> TypeId { (*self.value).type_id() }

    /// The name of the wrapped value's type: its Rust type name when
    /// wrapped locally, its registered name when decoded.
    #[must_use]
    pub fn type_name(&self) -> &str { &self.type_name }

    /// Borrows the wrapped value.
    #[must_use]
    pub fn as_any(&self) -> &(dyn Any + Send + Sync) { &*self.value }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnyValue").field(&self.type_name).finish()
    }
}

impl FieldValue for AnyValue {
    fn write_value(
        &self,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        registry.write_tagged(self.as_any(), &self.type_name, encoder, context)
    }

    fn read_value(
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Self, SerializationFault> {
        let (codec, value) = registry.read_tagged_with(decoder, context)?;
        Ok(Self {
            value: value.into(),
            type_name: codec.type_name().to_owned().into(),
        })
    }
}

// =============================================================================
// Leaf values
// =============================================================================

macro_rules! impl_leaf {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                fn write_value(
                    &self,
                    encoder: &mut Encoder,
                    _registry: &TypeRegistry,
                    _context: &mut SerializationContext,
                ) -> Result<(), SerializationFault> {
                    Ok(self.encode(encoder)?)
                }

                fn read_value(
                    decoder: &mut Decoder<'_>,
                    _registry: &TypeRegistry,
                    _context: &mut SerializationContext,
                ) -> Result<Self, SerializationFault> {
                    Ok(<$ty>::decode(decoder)?)
                }
            }
        )*
    };
}

impl_leaf!(
    u8,
    u16,
    u32,
    u64,
    usize,
    i8,
    i16,
    i32,
    i64,
    f32,
    f64,
    bool,
    char,
    String,
    Duration,
    SystemTime,
    NonZeroU32,
    NonZeroU64,
);

impl<T> FieldValue for Wrapping<T>
where
    T: Encode + Decode + Send + Sync + 'static,
{
    fn write_value(
        &self,
        encoder: &mut Encoder,
        _registry: &TypeRegistry,
        _context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        Ok(self.encode(encoder)?)
    }

    fn read_value(
        decoder: &mut Decoder<'_>,
        _registry: &TypeRegistry,
        _context: &mut SerializationContext,
    ) -> Result<Self, SerializationFault> {
        Ok(Self::decode(decoder)?)
    }
}

// =============================================================================
// Containers
// =============================================================================

/// A `None` is null. A `Some` carries a presence byte so that options nested
/// in collections stay distinguishable from empty payloads.
impl<T: FieldValue> FieldValue for Option<T> {
    const NULLABLE: bool = true;

    fn is_null(&self) -> bool { self.is_none() }

    fn null() -> Option<Self> { Some(None) }

    fn write_value(
        &self,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        match self {
            Some(value) => {
                encoder.emit_bool(true);
                value.write_value(encoder, registry, context)
            }
            None => {
                encoder.emit_bool(false);
                Ok(())
            }
        }
    }

    fn read_value(
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Self, SerializationFault> {
        if decoder.read_bool()? {
            T::read_value(decoder, registry, context).map(Some)
        } else {
            Ok(None)
        }
    }

    fn override_type() -> TypeId { T::override_type() }

    fn as_override_input(&self) -> Option<&dyn Any> {
        self.as_ref().and_then(|value| value.as_override_input())
    }

    fn from_override_output(
        value: Box<dyn Any + Send + Sync>,
    ) -> Result<Self, SerializationFault> {
        T::from_override_output(value).map(Some)
    }
}

fn write_sequence<'a, T: FieldValue>(
    len: usize,
    items: impl Iterator<Item = &'a T>,
    encoder: &mut Encoder,
    registry: &TypeRegistry,
    context: &mut SerializationContext,
) -> Result<(), SerializationFault> {
    encoder.emit_usize(len);
    for item in items {
        item.write_value(encoder, registry, context)?;
    }
    Ok(())
}

fn read_sequence<T: FieldValue, C: FromIterator<T>>(
    decoder: &mut Decoder<'_>,
    registry: &TypeRegistry,
    context: &mut SerializationContext,
) -> Result<C, SerializationFault> {
    let len = decoder.read_usize()?;
    (0..len).map(|_| T::read_value(decoder, registry, context)).collect()
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn write_value(
        &self,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        write_sequence(self.len(), self.iter(), encoder, registry, context)
    }

    fn read_value(
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Self, SerializationFault> {
        read_sequence(decoder, registry, context)
    }
}

impl<T: FieldValue> FieldValue for VecDeque<T> {
    fn write_value(
        &self,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        write_sequence(self.len(), self.iter(), encoder, registry, context)
    }

    fn read_value(
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Self, SerializationFault> {
        read_sequence(decoder, registry, context)
    }
}

fn write_entries<'a, K: FieldValue, V: FieldValue>(
    len: usize,
    entries: impl Iterator<Item = (&'a K, &'a V)>,
    encoder: &mut Encoder,
    registry: &TypeRegistry,
    context: &mut SerializationContext,
) -> Result<(), SerializationFault> {
    encoder.emit_usize(len);
    for (key, value) in entries {
        key.write_value(encoder, registry, context)?;
        value.write_value(encoder, registry, context)?;
    }
    Ok(())
}

fn read_entries<K: FieldValue, V: FieldValue, C: FromIterator<(K, V)>>(
    decoder: &mut Decoder<'_>,
    registry: &TypeRegistry,
    context: &mut SerializationContext,
) -> Result<C, SerializationFault> {
    let len = decoder.read_usize()?;
    (0..len)
        .map(|_| {
            let key = K::read_value(decoder, registry, context)?;
            let value = V::read_value(decoder, registry, context)?;
            Ok((key, value))
        })
        .collect()
}

impl<K: FieldValue + Ord, V: FieldValue> FieldValue for BTreeMap<K, V> {
    fn write_value(
        &self,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        write_entries(self.len(), self.iter(), encoder, registry, context)
    }

    fn read_value(
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Self, SerializationFault> {
        read_entries(decoder, registry, context)
    }
}

impl<K, V, S> FieldValue for HashMap<K, V, S>
where
    K: FieldValue + Eq + Hash,
    V: FieldValue,
    S: BuildHasher + Default + Send + Sync + 'static,
{
    fn write_value(
        &self,
        encoder: &mut Encoder,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        write_entries(self.len(), self.iter(), encoder, registry, context)
    }

    fn read_value(
        decoder: &mut Decoder<'_>,
        registry: &TypeRegistry,
        context: &mut SerializationContext,
    ) -> Result<Self, SerializationFault> {
        read_entries(decoder, registry, context)
    }
}
