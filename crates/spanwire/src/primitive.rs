//! Fixed codecs for well-known leaf values.
//!
//! [`Encode`] and [`Decode`] cover the values that never take part in the
//! object graph: integers, floats, strings, durations and timestamps. They
//! carry no header, no identity and no schema; their layout is fixed by the
//! [`wire`](crate::wire) format.
//!
//! [`PrimitiveCodec`] lifts any such leaf into a registry [`Codec`] so that a
//! leaf can be stored behind a polymorphic [`AnyValue`](crate::AnyValue) or
//! serialized at top level. [`BoundedStringCodec`] is an opt-in field
//! override for callers that clamp string lengths.

use std::{
    any::{Any, TypeId},
    io,
    marker::PhantomData,
    num::{NonZeroU32, NonZeroU64, Wrapping},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{
    context::SerializationContext,
    error::SerializationFault,
    registry::{Codec, TypeRegistry, downcast},
    wire::{Decoder, Encoder},
};

/// A leaf value with a fixed binary layout.
pub trait Encode {
    /// Writes this value to `encoder`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented on the wire.
    fn encode(&self, encoder: &mut Encoder) -> io::Result<()>;
}

/// A leaf value that can be read back from its fixed binary layout.
pub trait Decode: Sized {
    /// Reads a value from `decoder`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is truncated or malformed.
    fn decode(decoder: &mut Decoder<'_>) -> io::Result<Self>;
}

// =============================================================================
// Implementations for primitive types
// =============================================================================

macro_rules! impl_primitive {
    ($($ty:ty => $emit:ident, $read:ident;)*) => {
        $(
            impl Encode for $ty {
                fn encode(&self, encoder: &mut Encoder) -> io::Result<()> {
                    encoder.$emit(*self);
                    Ok(())
                }
            }

            impl Decode for $ty {
                fn decode(decoder: &mut Decoder<'_>) -> io::Result<Self> {
                    decoder.$read()
                }
            }
        )*
    };
}

impl_primitive! {
    u8 => emit_u8, read_u8;
    u16 => emit_u16, read_u16;
    u32 => emit_u32, read_u32;
    u64 => emit_u64, read_u64;
    usize => emit_usize, read_usize;
    i8 => emit_i8, read_i8;
    i16 => emit_i16, read_i16;
    i32 => emit_i32, read_i32;
    i64 => emit_i64, read_i64;
    f32 => emit_f32, read_f32;
    f64 => emit_f64, read_f64;
    bool => emit_bool, read_bool;
    char => emit_char, read_char;
}

impl Encode for String {
    fn encode(&self, encoder: &mut Encoder) -> io::Result<()> {
        encoder.emit_str(self);
        Ok(())
    }
}

impl Decode for String {
    fn decode(decoder: &mut Decoder<'_>) -> io::Result<Self> {
        decoder.read_str()
    }
}

impl Encode for Duration {
    fn encode(&self, encoder: &mut Encoder) -> io::Result<()> {
        encoder.emit_u64(self.as_secs());
        encoder.emit_u32(self.subsec_nanos());
        Ok(())
    }
}

impl Decode for Duration {
    fn decode(decoder: &mut Decoder<'_>) -> io::Result<Self> {
        let secs = decoder.read_u64()?;
        let nanos = decoder.read_u32()?;
        if nanos >= 1_000_000_000 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sub-second nanos out of range: {nanos}"),
            ));
        }
        Ok(Self::new(secs, nanos))
    }
}

/// Timestamps are stored as the [`Duration`] since the Unix epoch.
impl Encode for SystemTime {
    fn encode(&self, encoder: &mut Encoder) -> io::Result<()> {
        let since_epoch = self.duration_since(UNIX_EPOCH).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "timestamps before the Unix epoch cannot be encoded",
            )
        })?;
        since_epoch.encode(encoder)
    }
}

impl Decode for SystemTime {
    fn decode(decoder: &mut Decoder<'_>) -> io::Result<Self> {
        let since_epoch = Duration::decode(decoder)?;
        UNIX_EPOCH.checked_add(since_epoch).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "timestamp out of range for this platform",
            )
        })
    }
}

macro_rules! impl_non_zero {
    ($($ty:ty => $inner:ty;)*) => {
        $(
            impl Encode for $ty {
                fn encode(&self, encoder: &mut Encoder) -> io::Result<()> {
                    self.get().encode(encoder)
                }
            }

            impl Decode for $ty {
                fn decode(decoder: &mut Decoder<'_>) -> io::Result<Self> {
                    Self::new(<$inner>::decode(decoder)?).ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            concat!("zero value for ", stringify!($ty)),
                        )
                    })
                }
            }
        )*
    };
}

impl_non_zero! {
    NonZeroU32 => u32;
    NonZeroU64 => u64;
}

impl<T: Encode> Encode for Wrapping<T> {
    fn encode(&self, encoder: &mut Encoder) -> io::Result<()> {
        self.0.encode(encoder)
    }
}

impl<T: Decode> Decode for Wrapping<T> {
    fn decode(decoder: &mut Decoder<'_>) -> io::Result<Self> {
        Ok(Self(T::decode(decoder)?))
    }
}

// =============================================================================
// Registry adapters
// =============================================================================

/// Adapts a leaf value type into a registry [`Codec`].
pub struct PrimitiveCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> PrimitiveCodec<T> {
    /// Creates the codec.
    #[must_use]
    pub const fn new() -> Self { Self { _marker: PhantomData } }
}

impl<T> Default for PrimitiveCodec<T> {
    fn default() -> Self { Self::new() }
}

impl<T> std::fmt::Debug for PrimitiveCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveCodec")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Encode + Decode + Any + Send + Sync> Codec for PrimitiveCodec<T> {
    fn type_name(&self) -> &str { std::any::type_name::<T>() }

    fn value_type(&self) -> TypeId { TypeId::of::<T>() }

    fn write(
        &self,
        value: &dyn Any,
        encoder: &mut Encoder,
        _registry: &TypeRegistry,
        _context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        let value = downcast::<T>(value, self.type_name())?;
        value.encode(encoder)?;
        Ok(())
    }

    fn read(
        &self,
        decoder: &mut Decoder<'_>,
        _registry: &TypeRegistry,
        _context: &mut SerializationContext,
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationFault> {
        Ok(Box::new(T::decode(decoder)?))
    }
}

/// A string codec that clamps values to at most `max_chars` characters.
///
/// Clamping is a caller policy, not a property of the wire format: install
/// this codec as a field override (see
/// [`FieldCodec::with_override`](crate::FieldCodec::with_override)) on the
/// fields that need it. Reading is unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedStringCodec {
    max_chars: usize,
}

impl BoundedStringCodec {
    /// Creates a codec that keeps at most `max_chars` characters.
    #[must_use]
    pub const fn new(max_chars: usize) -> Self { Self { max_chars } }

    /// Returns the configured character limit.
    #[must_use]
    pub const fn max_chars(&self) -> usize { self.max_chars }

    fn clamp<'s>(&self, value: &'s str) -> &'s str {
        match value.char_indices().nth(self.max_chars) {
            Some((cut, _)) => &value[..cut],
            None => value,
        }
    }
}

impl Codec for BoundedStringCodec {
    fn type_name(&self) -> &str { std::any::type_name::<String>() }

    fn value_type(&self) -> TypeId { TypeId::of::<String>() }

    fn write(
        &self,
        value: &dyn Any,
        encoder: &mut Encoder,
        _registry: &TypeRegistry,
        _context: &mut SerializationContext,
    ) -> Result<(), SerializationFault> {
        let value = downcast::<String>(value, self.type_name())?;
        encoder.emit_str(self.clamp(value));
        Ok(())
    }

    fn read(
        &self,
        decoder: &mut Decoder<'_>,
        _registry: &TypeRegistry,
        _context: &mut SerializationContext,
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationFault> {
        Ok(Box::new(decoder.read_str()?))
    }
}
