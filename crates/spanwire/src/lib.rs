//! Spanwire: the persistence codec for telemetry object graphs.
//!
//! This crate turns in-memory telemetry objects (call-tree nodes, timing
//! snapshots, index entries) into compact binary records and back. It is
//! built around four ideas:
//!
//! - **Compatible field encoding**: every record field is identified on the
//!   wire by a stable integer *marker* taken from an external schema, and
//!   every field payload is length-prefixed. Readers skip markers they do not
//!   know and leave fields they do not find at their defaults, so producers
//!   and consumers can add and remove fields independently.
//! - **Reference tracking**: [`Shared`] values are written once per
//!   operation; later occurrences (including back-edges of cycles) are
//!   written as a short integer id.
//! - **Snapshot cloning**: values that other threads keep mutating can be
//!   cloned before encoding so the bytes reflect one consistent state.
//! - **Stable type tags**: the [`TypeRegistry`] maps runtime types to
//!   append-only integer tags, which is what travels on the wire instead of
//!   type names.
//!
//! # Overview
//!
//! ```ignore
//! use spanwire::{InMemorySchemas, Record, SchemaDescriptor, TypeRegistry};
//!
//! #[derive(Debug, Default, Clone, Record)]
//! struct Timer {
//!     count: u64,
//!     total_nanos: u64,
//! }
//!
//! let schemas = InMemorySchemas::new();
//! schemas.insert(
//!     Timer::TYPE_NAME,
//!     SchemaDescriptor::new().field("count", 1).field("total_nanos", 2),
//! );
//!
//! let mut builder = TypeRegistry::builder(schemas);
//! builder.record::<Timer>()?;
//! let registry = builder.build();
//!
//! let timer = Timer { count: 3, total_nanos: 90 };
//! let bytes = registry.serialize_to_vec(&timer)?;
//! let timer: Timer = registry.from_bytes(&bytes)?;
//! ```
//!
//! # Contexts
//!
//! Every top-level [`TypeRegistry::serialize`] or
//! [`TypeRegistry::deserialize`] call runs inside its own
//! [`SerializationContext`], borrowed from a small pool and reset before use.
//! Header bookkeeping and reference ids never leak from one call to the next.

// Allow the derive macro to reference this crate as `spanwire` internally
extern crate self as spanwire;

pub mod cloning;
pub mod config;
pub mod context;
pub mod error;
pub mod field;
pub mod field_codec;
pub mod fixup;
pub mod model;
pub mod pool;
pub mod primitive;
pub mod reference;
pub mod registry;
pub mod schema;
pub mod shared;
pub mod wire;

pub use cloning::{
    CloneScope, CloneStrategy, CloneViaClone, CloneViaRoundTrip, CloningCodec,
};
pub use config::{ByNameConfig, Config, DefaultConfig, UnregisteredTypePolicy};
pub use context::SerializationContext;
pub use error::{
    CloneFailure, InvalidReferenceFault, RegistryError, SchemaMissingFault,
    SerializationFault,
};
pub use field::{AnyValue, FieldDescriptor, FieldValue, Record};
pub use field_codec::FieldCodec;
pub use fixup::{ParentLinkReconstructor, ParentLinked, PostRead};
pub use primitive::{Decode, Encode};
pub use reference::ReferenceTrackingCodec;
pub use registry::{Codec, RegistryBuilder, TypeRegistry, TypeTag};
pub use schema::{InMemorySchemas, SchemaDescriptor, SchemaSource};
pub use shared::{Shared, WeakShared};
// Re-export derive macros
pub use spanwire_derive::Record;
pub use wire::{Decoder, Encoder};
